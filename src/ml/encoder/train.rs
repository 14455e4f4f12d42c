//! Encoder training: mini-batch SGD with backpropagation through time.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, seq::SliceRandom};

use super::model::{DirectionWeights, EncoderKind, EncoderModel};

/// Training hyperparameters for the sequence encoder.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Recurrent state width. Zero selects the dense summarizer.
    pub units: usize,
    pub bidirectional: bool,
    /// Inverted dropout on the summary vector during training.
    pub dropout: f32,
    /// Hidden width of the dense summarizer used when `units == 0`.
    pub dense_hidden: usize,
    pub embedding_size: usize,
    pub epochs: usize,
    pub batch_size: usize,
    /// Early-stopping patience in epochs, monitored on training loss.
    pub patience: usize,
    pub learning_rate: f32,
    /// Per-batch gradient norm ceiling; long sequences blow up otherwise.
    pub grad_clip: f32,
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            units: 64,
            bidirectional: false,
            dropout: 0.2,
            dense_hidden: 64,
            embedding_size: 32,
            epochs: 100,
            batch_size: 16,
            patience: 15,
            learning_rate: 0.005,
            grad_clip: 5.0,
            seed: 42,
        }
    }
}

struct DirectionGrads {
    wx: Vec<f32>,
    wh: Vec<f32>,
    b: Vec<f32>,
}

impl DirectionGrads {
    fn zeros(units: usize, n_features: usize) -> Self {
        Self {
            wx: vec![0.0; units * n_features],
            wh: vec![0.0; units * units],
            b: vec![0.0; units],
        }
    }
}

struct Grads {
    we: Vec<f32>,
    be: Vec<f32>,
    wo: Vec<f32>,
    bo: f32,
    forward: DirectionGrads,
    reverse: DirectionGrads,
    dense_w1: Vec<f32>,
    dense_b1: Vec<f32>,
}

/// Per-sample forward intermediates needed by the backward pass.
struct ForwardCache {
    /// `(timestep, previous_state, state)` in processing order.
    forward_steps: Vec<(usize, Vec<f32>, Vec<f32>)>,
    reverse_steps: Vec<(usize, Vec<f32>, Vec<f32>)>,
    dense_pre: Vec<f32>,
    summary: Vec<f32>,
    /// Inverted-dropout multiplier per summary unit (all ones at eval).
    dropout_scale: Vec<f32>,
    emb_pre: Vec<f32>,
    emb: Vec<f32>,
    yhat: f32,
}

/// Train the encoder on the training-partition sequences.
///
/// Early stopping monitors the epoch's mean training loss; the best weights
/// seen are restored before returning.
pub fn train_encoder(
    sequences: &[Vec<f32>],
    targets: &[f32],
    n_features: usize,
    max_timesteps: usize,
    options: &TrainOptions,
) -> Result<EncoderModel, String> {
    if sequences.len() != targets.len() {
        return Err("Mismatched sequence/target lengths".to_string());
    }
    if sequences.is_empty() {
        return Err("Empty training partition".to_string());
    }
    if n_features == 0 || max_timesteps == 0 {
        return Err("Sequences must have at least one feature and timestep".to_string());
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut model = init_model(n_features, max_timesteps, options, &mut rng);
    let dropout = options.dropout.clamp(0.0, 0.9);
    let batch_size = options.batch_size.max(1);

    let mut best = model.clone();
    let mut best_loss = mean_loss(&model, sequences, targets);
    let mut stale_epochs = 0usize;

    let mut indices: Vec<usize> = (0..sequences.len()).collect();
    for epoch in 0..options.epochs {
        indices.shuffle(&mut rng);
        for batch in indices.chunks(batch_size) {
            let mut grads = zero_grads(&model);
            for &idx in batch {
                let cache = forward(&model, &sequences[idx], Some((&mut rng, dropout)));
                let d_yhat = cache.yhat - targets[idx];
                backward(&model, &sequences[idx], &cache, d_yhat, &mut grads);
            }
            clip_grads(&mut grads, options.grad_clip);
            apply_grads(&mut model, &grads, options.learning_rate / batch.len() as f32);
        }

        let loss = mean_loss(&model, sequences, targets);
        if loss + 1e-7 < best_loss {
            best_loss = loss;
            best = model.clone();
            stale_epochs = 0;
        } else {
            stale_epochs += 1;
            if stale_epochs > options.patience {
                tracing::debug!(
                    "Encoder early stop at epoch {epoch} (best training loss {best_loss:.6})"
                );
                break;
            }
        }
    }

    tracing::info!("Encoder trained; best training loss {best_loss:.6}");
    Ok(best)
}

fn init_vec(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| (rng.random::<f32>() - 0.5) * 0.1).collect()
}

fn init_model(
    n_features: usize,
    max_timesteps: usize,
    options: &TrainOptions,
    rng: &mut StdRng,
) -> EncoderModel {
    let kind = if options.units > 0 {
        let units = options.units;
        let forward = DirectionWeights {
            wx: init_vec(rng, units * n_features),
            wh: init_vec(rng, units * units),
            b: vec![0.0; units],
        };
        let reverse = options.bidirectional.then(|| DirectionWeights {
            wx: init_vec(rng, units * n_features),
            wh: init_vec(rng, units * units),
            b: vec![0.0; units],
        });
        EncoderKind::Recurrent {
            units,
            forward,
            reverse,
        }
    } else {
        let hidden = options.dense_hidden.max(1);
        EncoderKind::Dense {
            hidden,
            w1: init_vec(rng, hidden * max_timesteps * n_features),
            b1: vec![0.0; hidden],
        }
    };

    let summary = match &kind {
        EncoderKind::Recurrent { units, reverse, .. } => {
            units * if reverse.is_some() { 2 } else { 1 }
        }
        EncoderKind::Dense { hidden, .. } => *hidden,
    };
    let embedding = options.embedding_size.max(1);
    EncoderModel {
        model_version: 1,
        n_features,
        max_timesteps,
        embedding_size: embedding,
        kind,
        we: init_vec(rng, embedding * summary),
        be: vec![0.0; embedding],
        wo: init_vec(rng, embedding),
        bo: 0.0,
    }
}

fn zero_grads(model: &EncoderModel) -> Grads {
    let summary = model.summary_len();
    let (forward, reverse, dense_w1, dense_b1) = match &model.kind {
        EncoderKind::Recurrent { units, reverse, .. } => (
            DirectionGrads::zeros(*units, model.n_features),
            if reverse.is_some() {
                DirectionGrads::zeros(*units, model.n_features)
            } else {
                DirectionGrads::zeros(0, 0)
            },
            Vec::new(),
            Vec::new(),
        ),
        EncoderKind::Dense { hidden, .. } => (
            DirectionGrads::zeros(0, 0),
            DirectionGrads::zeros(0, 0),
            vec![0.0; hidden * model.max_timesteps * model.n_features],
            vec![0.0; *hidden],
        ),
    };
    Grads {
        we: vec![0.0; model.embedding_size * summary],
        be: vec![0.0; model.embedding_size],
        wo: vec![0.0; model.embedding_size],
        bo: 0.0,
        forward,
        reverse,
        dense_w1,
        dense_b1,
    }
}

/// Tanh recurrence storing each step's states for backpropagation.
fn trace_direction(
    dir: &DirectionWeights,
    units: usize,
    n_features: usize,
    seq: &[f32],
    steps: impl Iterator<Item = usize>,
) -> Vec<(usize, Vec<f32>, Vec<f32>)> {
    let mut out = Vec::new();
    let mut h = vec![0.0f32; units];
    for t in steps {
        let x = &seq[t * n_features..(t + 1) * n_features];
        let mut next = vec![0.0f32; units];
        for u in 0..units {
            let mut sum = dir.b[u];
            let wx_base = u * n_features;
            for (f, &value) in x.iter().enumerate() {
                sum += dir.wx[wx_base + f] * value;
            }
            let wh_base = u * units;
            for (v, &state) in h.iter().enumerate() {
                sum += dir.wh[wh_base + v] * state;
            }
            next[u] = sum.tanh();
        }
        out.push((t, h, next.clone()));
        h = next;
    }
    out
}

fn forward(
    model: &EncoderModel,
    seq: &[f32],
    dropout: Option<(&mut StdRng, f32)>,
) -> ForwardCache {
    let n_features = model.n_features;
    let mut forward_steps = Vec::new();
    let mut reverse_steps = Vec::new();
    let mut dense_pre = Vec::new();

    let summary: Vec<f32> = match &model.kind {
        EncoderKind::Recurrent {
            units,
            forward: fw,
            reverse,
        } => {
            let steps = model.valid_steps(seq);
            forward_steps = trace_direction(fw, *units, n_features, seq, steps.iter().copied());
            let mut summary = forward_steps
                .last()
                .map(|(_, _, h)| h.clone())
                .unwrap_or_else(|| vec![0.0; *units]);
            if let Some(rv) = reverse {
                reverse_steps =
                    trace_direction(rv, *units, n_features, seq, steps.iter().rev().copied());
                summary.extend(
                    reverse_steps
                        .last()
                        .map(|(_, _, h)| h.clone())
                        .unwrap_or_else(|| vec![0.0; *units]),
                );
            }
            summary
        }
        EncoderKind::Dense { hidden, w1, b1 } => {
            let width = model.max_timesteps * n_features;
            dense_pre = (0..*hidden)
                .map(|h| {
                    let base = h * width;
                    let mut sum = b1[h];
                    for (i, &value) in seq.iter().take(width).enumerate() {
                        sum += w1[base + i] * value;
                    }
                    sum
                })
                .collect();
            dense_pre.iter().map(|&v| v.max(0.0)).collect()
        }
    };

    let mut dropout_scale = vec![1.0f32; summary.len()];
    if let Some((rng, rate)) = dropout {
        if rate > 0.0 {
            for scale in dropout_scale.iter_mut() {
                *scale = if rng.random::<f32>() < rate {
                    0.0
                } else {
                    1.0 / (1.0 - rate)
                };
            }
        }
    }

    let s_len = summary.len();
    let mut emb_pre = Vec::with_capacity(model.embedding_size);
    for k in 0..model.embedding_size {
        let base = k * s_len;
        let mut sum = model.be[k];
        for j in 0..s_len {
            sum += model.we[base + j] * summary[j] * dropout_scale[j];
        }
        emb_pre.push(sum);
    }
    let emb: Vec<f32> = emb_pre.iter().map(|&v| v.max(0.0)).collect();
    let mut yhat = model.bo;
    for (k, &value) in emb.iter().enumerate() {
        yhat += model.wo[k] * value;
    }

    ForwardCache {
        forward_steps,
        reverse_steps,
        dense_pre,
        summary,
        dropout_scale,
        emb_pre,
        emb,
        yhat,
    }
}

fn backward(
    model: &EncoderModel,
    seq: &[f32],
    cache: &ForwardCache,
    d_yhat: f32,
    grads: &mut Grads,
) {
    let s_len = cache.summary.len();

    grads.bo += d_yhat;
    let mut d_emb_pre = vec![0.0f32; model.embedding_size];
    for k in 0..model.embedding_size {
        grads.wo[k] += d_yhat * cache.emb[k];
        if cache.emb_pre[k] > 0.0 {
            d_emb_pre[k] = d_yhat * model.wo[k];
        }
    }

    let mut d_summary = vec![0.0f32; s_len];
    for k in 0..model.embedding_size {
        let dk = d_emb_pre[k];
        if dk == 0.0 {
            continue;
        }
        grads.be[k] += dk;
        let base = k * s_len;
        for j in 0..s_len {
            grads.we[base + j] += dk * cache.summary[j] * cache.dropout_scale[j];
            d_summary[j] += model.we[base + j] * dk * cache.dropout_scale[j];
        }
    }

    match &model.kind {
        EncoderKind::Recurrent {
            units,
            forward: fw,
            reverse,
        } => {
            backward_direction(
                fw,
                &mut grads.forward,
                *units,
                model.n_features,
                seq,
                &cache.forward_steps,
                &d_summary[..*units],
            );
            if let Some(rv) = reverse {
                backward_direction(
                    rv,
                    &mut grads.reverse,
                    *units,
                    model.n_features,
                    seq,
                    &cache.reverse_steps,
                    &d_summary[*units..],
                );
            }
        }
        EncoderKind::Dense { hidden, .. } => {
            let width = model.max_timesteps * model.n_features;
            for h in 0..*hidden {
                if cache.dense_pre[h] <= 0.0 || d_summary[h] == 0.0 {
                    continue;
                }
                let dh = d_summary[h];
                grads.dense_b1[h] += dh;
                let base = h * width;
                for (i, &value) in seq.iter().take(width).enumerate() {
                    grads.dense_w1[base + i] += dh * value;
                }
            }
        }
    }
}

/// Backpropagation through time for one direction. Only the final state
/// receives an external gradient; earlier steps get theirs through `Wh`.
fn backward_direction(
    dir: &DirectionWeights,
    grads: &mut DirectionGrads,
    units: usize,
    n_features: usize,
    seq: &[f32],
    steps: &[(usize, Vec<f32>, Vec<f32>)],
    d_final: &[f32],
) {
    let mut d_h = d_final.to_vec();
    for (t, h_prev, h) in steps.iter().rev() {
        let x = &seq[t * n_features..(t + 1) * n_features];
        let mut d_h_prev = vec![0.0f32; units];
        for u in 0..units {
            let d_pre = d_h[u] * (1.0 - h[u] * h[u]);
            if d_pre == 0.0 {
                continue;
            }
            grads.b[u] += d_pre;
            let wx_base = u * n_features;
            for (f, &value) in x.iter().enumerate() {
                grads.wx[wx_base + f] += d_pre * value;
            }
            let wh_base = u * units;
            for v in 0..units {
                grads.wh[wh_base + v] += d_pre * h_prev[v];
                d_h_prev[v] += dir.wh[wh_base + v] * d_pre;
            }
        }
        d_h = d_h_prev;
    }
}

fn clip_grads(grads: &mut Grads, max_norm: f32) {
    if max_norm <= 0.0 {
        return;
    }
    let mut sq = grads.bo as f64 * grads.bo as f64;
    for vec in [
        &grads.we,
        &grads.be,
        &grads.wo,
        &grads.forward.wx,
        &grads.forward.wh,
        &grads.forward.b,
        &grads.reverse.wx,
        &grads.reverse.wh,
        &grads.reverse.b,
        &grads.dense_w1,
        &grads.dense_b1,
    ] {
        for &g in vec.iter() {
            sq += g as f64 * g as f64;
        }
    }
    let norm = sq.sqrt() as f32;
    if norm <= max_norm || norm == 0.0 {
        return;
    }
    let scale = max_norm / norm;
    grads.bo *= scale;
    for vec in [
        &mut grads.we,
        &mut grads.be,
        &mut grads.wo,
        &mut grads.forward.wx,
        &mut grads.forward.wh,
        &mut grads.forward.b,
        &mut grads.reverse.wx,
        &mut grads.reverse.wh,
        &mut grads.reverse.b,
        &mut grads.dense_w1,
        &mut grads.dense_b1,
    ] {
        for g in vec.iter_mut() {
            *g *= scale;
        }
    }
}

fn apply_vec(params: &mut [f32], grads: &[f32], scale: f32) {
    for (p, &g) in params.iter_mut().zip(grads.iter()) {
        *p -= scale * g;
    }
}

fn apply_grads(model: &mut EncoderModel, grads: &Grads, scale: f32) {
    apply_vec(&mut model.we, &grads.we, scale);
    apply_vec(&mut model.be, &grads.be, scale);
    apply_vec(&mut model.wo, &grads.wo, scale);
    model.bo -= scale * grads.bo;
    match &mut model.kind {
        EncoderKind::Recurrent {
            forward, reverse, ..
        } => {
            apply_vec(&mut forward.wx, &grads.forward.wx, scale);
            apply_vec(&mut forward.wh, &grads.forward.wh, scale);
            apply_vec(&mut forward.b, &grads.forward.b, scale);
            if let Some(reverse) = reverse {
                apply_vec(&mut reverse.wx, &grads.reverse.wx, scale);
                apply_vec(&mut reverse.wh, &grads.reverse.wh, scale);
                apply_vec(&mut reverse.b, &grads.reverse.b, scale);
            }
        }
        EncoderKind::Dense { w1, b1, .. } => {
            apply_vec(w1, &grads.dense_w1, scale);
            apply_vec(b1, &grads.dense_b1, scale);
        }
    }
}

fn mean_loss(model: &EncoderModel, sequences: &[Vec<f32>], targets: &[f32]) -> f32 {
    let mut sum = 0.0f64;
    for (seq, &target) in sequences.iter().zip(targets.iter()) {
        let diff = (model.predict(seq) - target) as f64;
        sum += diff * diff;
    }
    (sum / sequences.len().max(1) as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sequences whose target is the sum of their first feature over valid
    /// steps; easy enough for a few epochs to make visible progress.
    fn synthetic_dataset(n: usize, timesteps: usize, features: usize) -> (Vec<Vec<f32>>, Vec<f32>) {
        let mut rng = StdRng::seed_from_u64(11);
        let mut sequences = Vec::with_capacity(n);
        let mut targets = Vec::with_capacity(n);
        for _ in 0..n {
            let mut seq = vec![0.0f32; timesteps * features];
            let valid = 1 + (rng.random::<u32>() as usize % timesteps);
            let mut total = 0.0f32;
            for t in 0..valid {
                for f in 0..features {
                    let v = 0.1 + rng.random::<f32>() * 0.8;
                    seq[t * features + f] = v;
                    if f == 0 {
                        total += v;
                    }
                }
            }
            sequences.push(seq);
            targets.push(total);
        }
        (sequences, targets)
    }

    fn quick_options(units: usize, bidirectional: bool) -> TrainOptions {
        TrainOptions {
            units,
            bidirectional,
            dropout: 0.0,
            dense_hidden: 8,
            embedding_size: 4,
            epochs: 40,
            batch_size: 4,
            patience: 40,
            learning_rate: 0.01,
            grad_clip: 5.0,
            seed: 42,
        }
    }

    #[test]
    fn training_reduces_loss_on_synthetic_sequences() {
        let (sequences, targets) = synthetic_dataset(24, 5, 2);
        let options = quick_options(6, false);

        let mut rng = StdRng::seed_from_u64(options.seed);
        let initial = init_model(2, 5, &options, &mut rng);
        let initial_loss = mean_loss(&initial, &sequences, &targets);

        let trained = train_encoder(&sequences, &targets, 2, 5, &options).unwrap();
        let trained_loss = mean_loss(&trained, &sequences, &targets);
        assert!(
            trained_loss < initial_loss,
            "loss did not improve: {trained_loss} >= {initial_loss}"
        );
    }

    #[test]
    fn training_is_deterministic_for_a_seed() {
        let (sequences, targets) = synthetic_dataset(12, 4, 2);
        let options = quick_options(4, true);
        let a = train_encoder(&sequences, &targets, 2, 4, &options).unwrap();
        let b = train_encoder(&sequences, &targets, 2, 4, &options).unwrap();
        assert_eq!(a.we, b.we);
        assert_eq!(a.predict(&sequences[0]), b.predict(&sequences[0]));
    }

    #[test]
    fn zero_units_trains_the_dense_variant() {
        let (sequences, targets) = synthetic_dataset(12, 1, 3);
        let options = quick_options(0, false);
        let model = train_encoder(&sequences, &targets, 3, 1, &options).unwrap();
        assert!(matches!(model.kind, EncoderKind::Dense { .. }));
        assert!(model.validate().is_ok());
        assert_eq!(model.embed(&sequences[0]).len(), 4);
    }

    #[test]
    fn empty_training_partition_is_an_error() {
        let err = train_encoder(&[], &[], 2, 4, &TrainOptions::default()).unwrap_err();
        assert!(err.contains("Empty"));
    }

    #[test]
    fn trained_model_passes_validation() {
        let (sequences, targets) = synthetic_dataset(8, 3, 2);
        let options = quick_options(3, true);
        let model = train_encoder(&sequences, &targets, 2, 3, &options).unwrap();
        assert!(model.validate().is_ok());
        assert_eq!(model.summary_len(), 6);
    }
}
