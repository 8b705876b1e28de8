use crate::{
    config::{ModelConfig, Validatable},
    model_service::{ModelError, ModelService},
};
use async_trait::async_trait;
use ndarray::{Array2, Array4, Dimension, Ix2};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Pool of ONNX Runtime sessions over the same model file.
///
/// `Session::run` needs exclusive access, so each session is locked for the
/// duration of one forward pass and requests are spread round-robin.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: Arc<str>,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        let declared: Vec<String> = sessions[0].outputs.iter().map(|o| o.name.clone()).collect();
        let output_name = resolve_output_name(model_config.output_name.as_deref(), &declared)?;

        tracing::info!(
            output = %output_name,
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            sessions: Arc::new(
                sessions
                    .into_iter()
                    .map(|session| Arc::new(Mutex::new(session)))
                    .collect(),
            ),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name: output_name.into(),
        })
    }

    pub fn run_inference(&self, input: &Array4<f32>) -> Result<Array2<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ModelError::Tensor(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let output = outputs
            .get(&*self.output_name)
            .ok_or_else(|| ModelError::Output {
                name: self.output_name.to_string(),
                reason: "no such output".to_string(),
            })?;

        let (shape, data) =
            output
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::Output {
                    name: self.output_name.to_string(),
                    reason: e.to_string(),
                })?;

        scores_from_output(&self.output_name, shape.to_ixdyn().slice(), data)
    }
}

/// Configured output name, or the first output the graph declares.
fn resolve_output_name(configured: Option<&str>, declared: &[String]) -> Result<String, ModelError> {
    match configured {
        Some(name) => Ok(name.to_string()),
        None => declared.first().cloned().ok_or(ModelError::NoOutputs),
    }
}

/// Reshapes a raw output tensor into one score row per batch entry.
fn scores_from_output(name: &str, shape: &[usize], data: &[f32]) -> Result<Array2<f32>, ModelError> {
    let scores = ndarray::ArrayD::from_shape_vec(shape, data.to_vec()).map_err(|e| {
        ModelError::Output {
            name: name.to_string(),
            reason: e.to_string(),
        }
    })?;

    scores
        .into_dimensionality::<Ix2>()
        .map_err(|_| ModelError::OutputShape(shape.to_vec()))
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn infer(&self, batch: Array4<f32>) -> Result<Array2<f32>, ModelError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.run_inference(&batch))
            .await
            .map_err(|e| ModelError::Join(e.to_string()))?
    }
}
