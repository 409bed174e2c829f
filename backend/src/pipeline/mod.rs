//! Scan analysis: decode and normalize an upload, then classify it.
//!
//! Each call runs start to finish on the calling thread. The only shared state
//! is the read-only classifier held by [`InferenceInvoker`].

pub mod classify;
pub mod normalize;

pub use classify::{ClassificationResult, Classifier, InferenceError, InferenceInvoker};
pub use normalize::{DecodeError, ImageNormalizer, NormalizedTensor};

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Decoding,
    Inference,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Decoding => write!(f, "decoding"),
            Stage::Inference => write!(f, "inference"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl AnalysisError {
    pub fn stage(&self) -> Stage {
        match self {
            AnalysisError::Decode(_) => Stage::Decoding,
            AnalysisError::Inference(_) => Stage::Inference,
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    normalizer: ImageNormalizer,
    invoker: InferenceInvoker,
}

impl Pipeline {
    pub fn new(normalizer: ImageNormalizer, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            normalizer,
            invoker: InferenceInvoker::new(classifier),
        }
    }

    pub fn classifier_available(&self) -> bool {
        self.invoker.classifier_available()
    }

    pub fn analyze(&self, raw: &[u8]) -> Result<ClassificationResult, AnalysisError> {
        let tensor = self.normalizer.normalize(raw)?;
        log::debug!("Normalized upload to tensor of shape {:?}", tensor.shape());
        let result = self.invoker.classify(&tensor)?;
        log::debug!(
            "Classifier score {:.4} -> {} ({:.3})",
            result.score,
            result.label(),
            result.confidence
        );
        Ok(result)
    }
}
