//! Encoder weights and inference.

use serde::{Deserialize, Serialize};

/// Weights for one recurrence direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionWeights {
    /// Input weights, shape `[units][n_features]` row-major.
    pub wx: Vec<f32>,
    /// Recurrent weights, shape `[units][units]` row-major.
    pub wh: Vec<f32>,
    /// Cell bias.
    pub b: Vec<f32>,
}

/// Sequence summarizer variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    /// Tanh recurrence over valid timesteps; final state(s) are the summary.
    Recurrent {
        units: usize,
        forward: DirectionWeights,
        /// Present iff the encoder is bidirectional.
        reverse: Option<DirectionWeights>,
    },
    /// Flatten the (single-step) sequence and project through a ReLU layer.
    Dense {
        hidden: usize,
        /// Shape `[hidden][max_timesteps * n_features]` row-major.
        w1: Vec<f32>,
        b1: Vec<f32>,
    },
}

/// Trained sequence encoder with its embedding bottleneck and scalar head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderModel {
    /// Model format version.
    pub model_version: i64,
    pub n_features: usize,
    pub max_timesteps: usize,
    pub embedding_size: usize,
    pub kind: EncoderKind,
    /// Embedding weights, shape `[embedding_size][summary_len]` row-major.
    pub we: Vec<f32>,
    pub be: Vec<f32>,
    /// Linear head over the embedding, used only during encoder training.
    pub wo: Vec<f32>,
    pub bo: f32,
}

/// A timestep is padding iff every feature value is exactly zero, the
/// sentinel the sequence builder writes for the padded tail.
pub(crate) fn step_is_padded(step: &[f32]) -> bool {
    step.iter().all(|&v| v == 0.0)
}

impl EncoderModel {
    /// Width of the summary vector feeding the embedding layer.
    pub fn summary_len(&self) -> usize {
        match &self.kind {
            EncoderKind::Recurrent { units, reverse, .. } => {
                units * if reverse.is_some() { 2 } else { 1 }
            }
            EncoderKind::Dense { hidden, .. } => *hidden,
        }
    }

    /// Validate structural invariants of the model.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_features == 0 || self.max_timesteps == 0 || self.embedding_size == 0 {
            return Err("Encoder dimensions must be non-zero".to_string());
        }
        match &self.kind {
            EncoderKind::Recurrent {
                units,
                forward,
                reverse,
            } => {
                if *units == 0 {
                    return Err("Recurrent encoder needs at least one unit".to_string());
                }
                for (name, dir) in [("forward", Some(forward)), ("reverse", reverse.as_ref())] {
                    let Some(dir) = dir else { continue };
                    if dir.wx.len() != units * self.n_features {
                        return Err(format!("{name} wx length mismatch"));
                    }
                    if dir.wh.len() != units * units {
                        return Err(format!("{name} wh length mismatch"));
                    }
                    if dir.b.len() != *units {
                        return Err(format!("{name} bias length mismatch"));
                    }
                }
            }
            EncoderKind::Dense { hidden, w1, b1 } => {
                if *hidden == 0 {
                    return Err("Dense encoder needs a non-zero hidden width".to_string());
                }
                if w1.len() != hidden * self.max_timesteps * self.n_features {
                    return Err("dense w1 length mismatch".to_string());
                }
                if b1.len() != *hidden {
                    return Err("dense b1 length mismatch".to_string());
                }
            }
        }
        let summary = self.summary_len();
        if self.we.len() != self.embedding_size * summary {
            return Err("we length mismatch".to_string());
        }
        if self.be.len() != self.embedding_size {
            return Err("be length mismatch".to_string());
        }
        if self.wo.len() != self.embedding_size {
            return Err("wo length mismatch".to_string());
        }
        Ok(())
    }

    /// Run the summarizer over one flat `[max_timesteps * n_features]`
    /// sequence.
    pub fn summarize(&self, seq: &[f32]) -> Vec<f32> {
        match &self.kind {
            EncoderKind::Recurrent {
                units,
                forward,
                reverse,
            } => {
                let steps = self.valid_steps(seq);
                let mut summary =
                    run_direction(forward, *units, self.n_features, seq, steps.iter().copied());
                if let Some(reverse) = reverse {
                    summary.extend(run_direction(
                        reverse,
                        *units,
                        self.n_features,
                        seq,
                        steps.iter().rev().copied(),
                    ));
                }
                summary
            }
            EncoderKind::Dense { hidden, w1, b1 } => {
                let width = self.max_timesteps * self.n_features;
                let mut out = Vec::with_capacity(*hidden);
                for h in 0..*hidden {
                    let base = h * width;
                    let mut sum = b1[h];
                    for (i, &v) in seq.iter().take(width).enumerate() {
                        sum += w1[base + i] * v;
                    }
                    out.push(sum.max(0.0));
                }
                out
            }
        }
    }

    /// Embedding vector for one sequence.
    pub fn embed(&self, seq: &[f32]) -> Vec<f32> {
        self.embed_summary(&self.summarize(seq))
    }

    /// Embedding from an already-computed summary.
    pub fn embed_summary(&self, summary: &[f32]) -> Vec<f32> {
        let s = summary.len();
        let mut emb = Vec::with_capacity(self.embedding_size);
        for k in 0..self.embedding_size {
            let base = k * s;
            let mut sum = self.be[k];
            for (j, &v) in summary.iter().enumerate() {
                sum += self.we[base + j] * v;
            }
            emb.push(sum.max(0.0));
        }
        emb
    }

    /// Scalar prediction from the linear head, used for encoder training.
    pub fn predict(&self, seq: &[f32]) -> f32 {
        let emb = self.embed(seq);
        let mut sum = self.bo;
        for (k, &v) in emb.iter().enumerate() {
            sum += self.wo[k] * v;
        }
        sum
    }

    /// Indices of the non-padded timesteps, in chronological order.
    pub(crate) fn valid_steps(&self, seq: &[f32]) -> Vec<usize> {
        (0..self.max_timesteps)
            .filter(|&t| {
                let start = t * self.n_features;
                !step_is_padded(&seq[start..start + self.n_features])
            })
            .collect()
    }
}

/// Run a tanh recurrence over the given timestep order; the final state is
/// the direction's summary. Padded steps never reach this function.
pub(crate) fn run_direction(
    dir: &DirectionWeights,
    units: usize,
    n_features: usize,
    seq: &[f32],
    steps: impl Iterator<Item = usize>,
) -> Vec<f32> {
    let mut h = vec![0.0f32; units];
    let mut next = vec![0.0f32; units];
    for t in steps {
        let x = &seq[t * n_features..(t + 1) * n_features];
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
        std::mem::swap(&mut h, &mut next);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_model(bidirectional: bool) -> EncoderModel {
        let units = 2;
        let n_features = 2;
        let direction = DirectionWeights {
            wx: vec![0.5, -0.25, 0.1, 0.3],
            wh: vec![0.2, 0.0, 0.0, 0.2],
            b: vec![0.01, -0.02],
        };
        let summary = units * if bidirectional { 2 } else { 1 };
        EncoderModel {
            model_version: 1,
            n_features,
            max_timesteps: 4,
            embedding_size: 3,
            kind: EncoderKind::Recurrent {
                units,
                forward: direction.clone(),
                reverse: bidirectional.then_some(direction),
            },
            we: vec![0.1; 3 * summary],
            be: vec![0.0; 3],
            wo: vec![1.0; 3],
            bo: 0.0,
        }
    }

    #[test]
    fn padded_tail_does_not_change_the_summary() {
        let model = tiny_model(false);
        // Two valid steps followed by two padded ones.
        let padded = vec![0.3, -0.1, 0.2, 0.4, 0.0, 0.0, 0.0, 0.0];
        let mut short_model = tiny_model(false);
        short_model.max_timesteps = 2;
        let unpadded = vec![0.3, -0.1, 0.2, 0.4];

        assert_eq!(model.summarize(&padded), short_model.summarize(&unpadded));
    }

    #[test]
    fn interior_zero_rows_are_skipped() {
        let model = tiny_model(false);
        let with_gap = vec![0.3, -0.1, 0.0, 0.0, 0.2, 0.4, 0.0, 0.0];
        let mut short_model = tiny_model(false);
        short_model.max_timesteps = 2;
        let contiguous = vec![0.3, -0.1, 0.2, 0.4];

        assert_eq!(model.summarize(&with_gap), short_model.summarize(&contiguous));
    }

    #[test]
    fn bidirectional_summary_concatenates_both_directions() {
        let model = tiny_model(true);
        let seq = vec![0.3, -0.1, 0.2, 0.4, 0.0, 0.0, 0.0, 0.0];
        let summary = model.summarize(&seq);
        assert_eq!(summary.len(), 4);
        assert_eq!(model.summary_len(), 4);
        // A symmetric single-step sequence reads the same both ways.
        let single = vec![0.3, -0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let s = model.summarize(&single);
        assert_eq!(&s[..2], &s[2..]);
    }

    #[test]
    fn embedding_applies_relu() {
        let mut model = tiny_model(false);
        model.we = vec![-1.0; 3 * 2];
        model.be = vec![0.0; 3];
        let seq = vec![0.5, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let emb = model.embed(&seq);
        assert!(emb.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn validate_catches_shape_mismatches() {
        let mut model = tiny_model(false);
        assert!(model.validate().is_ok());
        model.wo.pop();
        assert!(model.validate().is_err());
    }
}
