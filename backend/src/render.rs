use minijinja::Environment;
use serde::Serialize;
use shared::format_confidence;

use crate::pipeline::ClassificationResult;
use crate::upload::UploadPolicy;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),
}

#[derive(Debug, Serialize)]
pub struct ResultView {
    pub file_name: String,
    pub title: &'static str,
    pub css_class: &'static str,
    pub confidence: String,
    pub advisory: &'static [&'static str],
}

impl ResultView {
    pub fn new(result: &ClassificationResult, file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            title: result.diagnosis.title(),
            css_class: result.diagnosis.css_class(),
            confidence: format_confidence(result.confidence),
            advisory: result.advisory(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorView {
    pub message: String,
}

#[derive(Debug, Serialize)]
struct PageContext<'a> {
    accept: String,
    max_upload_mb: String,
    result: Option<&'a ResultView>,
    error: Option<&'a ErrorView>,
}

#[derive(Clone)]
pub struct Renderer {
    env: Environment<'static>,
}

impl Renderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut env = Environment::new();
        env.add_template("layout.html", include_str!("../templates/layout.html"))?;
        env.add_template("index.html", include_str!("../templates/index.html"))?;
        Ok(Self { env })
    }

    pub fn page(
        &self,
        policy: &UploadPolicy,
        result: Option<&ResultView>,
        error: Option<&ErrorView>,
    ) -> Result<String, RenderError> {
        let ctx = PageContext {
            accept: policy.accept_attribute(),
            max_upload_mb: format!("{:.1}", policy.max_bytes() as f64 / (1024.0 * 1024.0)),
            result,
            error,
        };
        Ok(self.env.get_template("index.html")?.render(ctx)?)
    }
}
