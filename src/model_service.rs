use async_trait::async_trait;
use ndarray::{Array2, Array4};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to load model: {0}")]
    Load(#[from] ort::Error),
    #[error("model declares no outputs")]
    NoOutputs,
    #[error("failed to build tensor: {0}")]
    Tensor(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("failed to extract output `{name}`: {reason}")]
    Output { name: String, reason: String },
    #[error("unexpected output shape {0:?}, expected (batch, classes)")]
    OutputShape(Vec<usize>),
    #[error("session mutex poisoned: {0}")]
    Poisoned(String),
    #[error("inference task failed: {0}")]
    Join(String),
}

/// Forward pass of a loaded classifier.
///
/// `batch` is NHWC pixels as `f32`; the result holds one score row per batch
/// entry.
#[async_trait]
pub trait ModelService: Send + Sync + Clone + 'static {
    async fn infer(&self, batch: Array4<f32>) -> Result<Array2<f32>, ModelError>;
}
