use crate::config::{LabelsConfig, Validatable};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Read(#[from] config::ConfigError),
    #[error("Labels file declares no labels")]
    Empty,
    #[error("Duplicate label `{0}`")]
    Duplicate(String),
    #[error("Model produces {outputs} scores but {labels} labels are configured")]
    Mismatch { outputs: usize, labels: usize },
}

/// Ordered class names, position `i` naming output index `i` of the model
/// identified by `model`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClassLabels {
    pub version: u32,
    pub model: String,
    labels: Vec<String>,
}

impl ClassLabels {
    #[cfg(test)]
    pub fn new(version: u32, model: &str, labels: Vec<String>) -> Result<Self, LabelsError> {
        let class_labels = Self {
            version,
            model: model.to_string(),
            labels,
        };
        class_labels.check()?;
        Ok(class_labels)
    }

    pub fn from_file(path: &Path) -> Result<Self, LabelsError> {
        let class_labels = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .build()?
            .try_deserialize::<ClassLabels>()?;
        class_labels.check()?;
        Ok(class_labels)
    }

    fn check(&self) -> Result<(), LabelsError> {
        if self.labels.is_empty() {
            return Err(LabelsError::Empty);
        }
        for (i, label) in self.labels.iter().enumerate() {
            if self.labels[..i].contains(label) {
                return Err(LabelsError::Duplicate(label.clone()));
            }
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// Fails when the model's score vector length differs from the label count.
    pub fn ensure_aligned(&self, outputs: usize) -> Result<(), LabelsError> {
        if outputs != self.labels.len() {
            return Err(LabelsError::Mismatch {
                outputs,
                labels: self.labels.len(),
            });
        }
        Ok(())
    }
}

pub trait State: Send + Sync + 'static {
    fn new(labels_cfg: &LabelsConfig) -> Result<Self, LabelsError>
    where
        Self: Sized;
    fn get_labels(&self) -> &ClassLabels;
}

#[derive(Debug)]
pub struct ServiceState {
    class_labels: ClassLabels,
}

impl ServiceState {
    #[cfg(test)]
    pub fn from_labels(class_labels: ClassLabels) -> Self {
        Self { class_labels }
    }
}

impl State for ServiceState {
    fn new(labels_cfg: &LabelsConfig) -> Result<ServiceState, LabelsError> {
        let class_labels = ClassLabels::from_file(&labels_cfg.get_path())?;
        tracing::info!(
            version = class_labels.version,
            model = %class_labels.model,
            "Loaded {} class labels",
            class_labels.len()
        );
        Ok(ServiceState { class_labels })
    }

    fn get_labels(&self) -> &ClassLabels {
        &self.class_labels
    }
}
