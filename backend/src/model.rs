use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tract_onnx::prelude::*;

use crate::config::ModelConfig;
use crate::pipeline::normalize::{CHANNELS, INPUT_SIZE};
use crate::pipeline::{Classifier, InferenceError, NormalizedTensor};

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to load model {path}: {message}")]
    Tract { path: PathBuf, message: String },
}

/// ONNX classifier compiled once into an optimized tract plan.
pub struct OnnxClassifier {
    plan: TypedRunnableModel<TypedModel>,
    path: PathBuf,
}

impl OnnxClassifier {
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        if !path.is_file() {
            return Err(ModelLoadError::NotFound(path.to_path_buf()));
        }

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| {
                model.with_input_fact(0, f32::fact([1, INPUT_SIZE, INPUT_SIZE, CHANNELS]).into())
            })
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| ModelLoadError::Tract {
                path: path.to_path_buf(),
                message: format!("{:#}", e),
            })?;

        Ok(Self {
            plan,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, batch: &NormalizedTensor) -> Result<Array2<f32>, InferenceError> {
        let data: Vec<f32> = batch.view().iter().copied().collect();
        let input = Tensor::from_shape(&batch.shape(), &data)
            .map_err(|e| InferenceError::Model(format!("{:#}", e)))?;

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| InferenceError::Model(format!("{:#}", e)))?;
        let first = outputs
            .first()
            .ok_or_else(|| InferenceError::MalformedOutput("model produced no outputs".into()))?;
        scores_from_output(first)
    }
}

/// Copies a rank 1 or rank 2 f32 output tensor into a (batch, outputs) matrix.
pub(crate) fn scores_from_output(output: &Tensor) -> Result<Array2<f32>, InferenceError> {
    let view = output
        .to_array_view::<f32>()
        .map_err(|e| InferenceError::MalformedOutput(format!("{:#}", e)))?;
    let shape = match *view.shape() {
        [n] => (1, n),
        [rows, cols] => (rows, cols),
        ref other => {
            return Err(InferenceError::MalformedOutput(format!(
                "expected a rank 1 or 2 score tensor, got shape {:?}",
                other
            )));
        }
    };
    let data: Vec<f32> = view.iter().copied().collect();
    Array2::from_shape_vec(shape, data).map_err(|e| InferenceError::MalformedOutput(e.to_string()))
}

/// Stands in for a model that failed to load; every prediction fails.
pub struct UnavailableClassifier {
    reason: String,
}

impl UnavailableClassifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Classifier for UnavailableClassifier {
    fn predict(&self, _batch: &NormalizedTensor) -> Result<Array2<f32>, InferenceError> {
        Err(InferenceError::Unavailable(self.reason.clone()))
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Loads the configured model once for the lifetime of the process.
///
/// A required model that fails to load is an error; otherwise the failure is
/// logged and analyses report the classifier as unavailable.
pub fn load_classifier(config: &ModelConfig) -> Result<Arc<dyn Classifier>, ModelLoadError> {
    log::info!("Loading classifier from {}", config.path.display());
    match OnnxClassifier::load(&config.path) {
        Ok(classifier) => {
            log::info!("Classifier ready: {}", classifier.path().display());
            Ok(Arc::new(classifier))
        }
        Err(e) if !config.required => {
            log::error!("Failed to load classifier, analyses will be rejected: {}", e);
            Ok(Arc::new(UnavailableClassifier::new(e.to_string())))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_model_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.onnx");
        assert!(matches!(
            OnnxClassifier::load(&path),
            Err(ModelLoadError::NotFound(p)) if p == path
        ));
    }

    #[test]
    fn garbage_model_file_fails_to_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a protobuf model").unwrap();
        assert!(matches!(
            OnnxClassifier::load(file.path()),
            Err(ModelLoadError::Tract { .. })
        ));
    }

    #[test]
    fn optional_model_degrades_to_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig {
            path: dir.path().join("absent.onnx"),
            required: false,
        };
        let classifier = load_classifier(&config).unwrap();
        assert!(!classifier.is_available());
        let err = classifier
            .predict(&NormalizedTensor::filled(0.0))
            .unwrap_err();
        assert!(matches!(err, InferenceError::Unavailable(_)));
    }

    #[test]
    fn required_model_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig {
            path: dir.path().join("absent.onnx"),
            required: true,
        };
        assert!(load_classifier(&config).is_err());
    }

    #[test]
    fn reads_sigmoid_output_matrix() {
        let output = Tensor::from_shape(&[1, 1], &[0.25f32]).unwrap();
        let scores = scores_from_output(&output).unwrap();
        assert_eq!(scores.shape(), &[1, 1]);
        assert_eq!(scores[[0, 0]], 0.25);
    }

    #[test]
    fn flat_output_is_treated_as_one_batch_row() {
        let output = Tensor::from_shape(&[2], &[0.7f32, 0.3]).unwrap();
        let scores = scores_from_output(&output).unwrap();
        assert_eq!(scores.shape(), &[1, 2]);
        assert_eq!(scores[[0, 0]], 0.7);
    }

    #[test]
    fn rejects_high_rank_and_non_float_outputs() {
        let cube = Tensor::from_shape(&[1, 1, 1], &[0.5f32]).unwrap();
        assert!(matches!(
            scores_from_output(&cube),
            Err(InferenceError::MalformedOutput(_))
        ));
        let ints = Tensor::from_shape(&[1, 1], &[1i64]).unwrap();
        assert!(matches!(
            scores_from_output(&ints),
            Err(InferenceError::MalformedOutput(_))
        ));
    }
}
