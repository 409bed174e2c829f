use ndarray::Array2;
use shared::Diagnosis;
use std::sync::Arc;

use super::normalize::NormalizedTensor;

/// Scores below this value are reported as a detected condition.
pub const DECISION_THRESHOLD: f32 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),
    #[error("Classifier failed during prediction: {0}")]
    Model(String),
    #[error("Classifier returned malformed output: {0}")]
    MalformedOutput(String),
    #[error("Classifier score {0} is outside [0, 1]")]
    InvalidScore(f32),
}

/// Forward pass of a pre-trained binary classifier.
///
/// Returns a (batch, outputs) score matrix; the score of interest is at [0, 0].
pub trait Classifier: Send + Sync {
    fn predict(&self, batch: &NormalizedTensor) -> Result<Array2<f32>, InferenceError>;

    fn is_available(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    pub diagnosis: Diagnosis,
    pub score: f32,
    /// Probability of the predicted class, always in [0.5, 1.0].
    pub confidence: f32,
}

impl ClassificationResult {
    pub fn from_score(score: f32) -> Result<Self, InferenceError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(InferenceError::InvalidScore(score));
        }
        let (diagnosis, confidence) = if score < DECISION_THRESHOLD {
            (Diagnosis::ConditionDetected, 1.0 - score)
        } else {
            (Diagnosis::Normal, score)
        };
        Ok(Self {
            diagnosis,
            score,
            confidence,
        })
    }

    pub fn label(&self) -> &'static str {
        match self.diagnosis {
            Diagnosis::ConditionDetected => "condition detected",
            Diagnosis::Normal => "normal",
        }
    }

    pub fn advisory(&self) -> &'static [&'static str] {
        self.diagnosis.advisory()
    }
}

#[derive(Clone)]
pub struct InferenceInvoker {
    classifier: Arc<dyn Classifier>,
}

impl InferenceInvoker {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    pub fn classifier_available(&self) -> bool {
        self.classifier.is_available()
    }

    pub fn classify(&self, tensor: &NormalizedTensor) -> Result<ClassificationResult, InferenceError> {
        let scores = self.classifier.predict(tensor)?;
        let score = scores.get((0, 0)).copied().ok_or_else(|| {
            InferenceError::MalformedOutput(format!("no score at [0][0] in output of shape {:?}", scores.shape()))
        })?;
        ClassificationResult::from_score(score)
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use std::sync::atomic::Ordering;

    fn invoker(classifier: impl Classifier + 'static) -> InferenceInvoker {
        InferenceInvoker::new(Arc::new(classifier))
    }

    fn blank() -> NormalizedTensor {
        NormalizedTensor::filled(0.5)
    }

    #[test]
    fn low_score_is_condition_detected() {
        let result = invoker(FixedScore::new(0.2)).classify(&blank()).unwrap();
        assert_eq!(result.diagnosis, Diagnosis::ConditionDetected);
        assert_eq!(result.label(), "condition detected");
        assert!((result.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn high_score_is_normal() {
        let result = invoker(FixedScore::new(0.9)).classify(&blank()).unwrap();
        assert_eq!(result.diagnosis, Diagnosis::Normal);
        assert_eq!(result.label(), "normal");
        assert!((result.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn exact_threshold_is_normal() {
        let result = invoker(FixedScore::new(0.5)).classify(&blank()).unwrap();
        assert_eq!(result.diagnosis, Diagnosis::Normal);
        assert_eq!(result.confidence, 0.5);

        let just_below = invoker(FixedScore::new(0.499_999)).classify(&blank()).unwrap();
        assert_eq!(just_below.diagnosis, Diagnosis::ConditionDetected);
    }

    #[test]
    fn confidence_never_drops_below_half() {
        for step in 0..=1000 {
            let score = step as f32 / 1000.0;
            let result = ClassificationResult::from_score(score).unwrap();
            assert!(result.confidence >= 0.5, "score {} gave {}", score, result.confidence);
            assert!(result.confidence <= 1.0);
            assert_eq!(
                result.diagnosis == Diagnosis::ConditionDetected,
                score < DECISION_THRESHOLD
            );
        }
    }

    #[test]
    fn bounds_are_fully_confident() {
        let zero = ClassificationResult::from_score(0.0).unwrap();
        assert_eq!((zero.diagnosis, zero.confidence), (Diagnosis::ConditionDetected, 1.0));
        let one = ClassificationResult::from_score(1.0).unwrap();
        assert_eq!((one.diagnosis, one.confidence), (Diagnosis::Normal, 1.0));
    }

    #[test]
    fn classify_is_idempotent() {
        let fake = Arc::new(FixedScore::new(0.37));
        let invoker = InferenceInvoker::new(fake.clone());
        let tensor = blank();
        let first = invoker.classify(&tensor).unwrap();
        let second = invoker.classify(&tensor).unwrap();
        assert_eq!(first, second);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn input_dependent_classifier_sees_tensor() {
        let invoker = invoker(MeanIntensity);
        let dark = invoker.classify(&NormalizedTensor::filled(0.1)).unwrap();
        assert_eq!(dark.diagnosis, Diagnosis::ConditionDetected);
        let bright = invoker.classify(&NormalizedTensor::filled(0.9)).unwrap();
        assert_eq!(bright.diagnosis, Diagnosis::Normal);
    }

    #[test]
    fn classifier_failure_is_an_inference_error() {
        let err = invoker(Failing).classify(&blank()).unwrap_err();
        assert!(matches!(err, InferenceError::Model(_)));
    }

    #[test]
    fn empty_output_is_malformed() {
        let err = invoker(EmptyOutput).classify(&blank()).unwrap_err();
        assert!(matches!(err, InferenceError::MalformedOutput(_)));
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        for score in [f32::NAN, -0.1, 1.5, f32::INFINITY] {
            let err = invoker(FixedScore::new(score)).classify(&blank()).unwrap_err();
            assert!(matches!(err, InferenceError::InvalidScore(_)));
        }
    }

    #[test]
    fn advisory_follows_label() {
        let detected = ClassificationResult::from_score(0.1).unwrap();
        assert_eq!(detected.advisory(), Diagnosis::ConditionDetected.advisory());
        let normal = ClassificationResult::from_score(0.8).unwrap();
        assert_eq!(normal.advisory(), Diagnosis::Normal.advisory());
    }
}
