//! Library exports for the soy-yield prediction pipeline.
/// Agronomic feature engineering.
pub mod features;
/// Logging setup shared by the stage binaries.
pub mod logging;
/// Master dataset assembly and re-aggregation.
pub mod master;
/// Sequence encoder, boosted regressor and the hybrid trainer.
pub mod ml;
/// Stage orchestration and error containment.
pub mod pipeline;
/// Crop-season labels.
pub mod season;
/// Pipeline configuration.
pub mod settings;
/// Cleaned tabular inputs and CSV plumbing.
pub mod tables;
