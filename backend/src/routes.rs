use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::error::InternalError;
use actix_web::{web, HttpResponse};
use log::{error, info, warn};
use shared::{
    format_confidence, AnalysisResponse, ErrorKind, ErrorResponse, HealthResponse, InferenceRequest,
};
use std::path::PathBuf;
use uuid::Uuid;

use crate::pipeline::{AnalysisError, ClassificationResult, InferenceError, Pipeline};
use crate::render::{ErrorView, Renderer, ResultView};
use crate::upload::{UploadError, UploadPolicy, UploadedImage};

#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RequestError {
    fn status(&self) -> StatusCode {
        match self {
            RequestError::Upload(UploadError::TooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
            RequestError::Upload(_) => StatusCode::BAD_REQUEST,
            RequestError::Analysis(AnalysisError::Decode(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            RequestError::Analysis(AnalysisError::Inference(InferenceError::Unavailable(_))) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RequestError::Analysis(AnalysisError::Inference(_)) | RequestError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            RequestError::Upload(_) => ErrorKind::Upload,
            RequestError::Analysis(AnalysisError::Decode(_)) => ErrorKind::Decode,
            RequestError::Analysis(AnalysisError::Inference(_)) => ErrorKind::Inference,
            RequestError::Internal(_) => ErrorKind::Internal,
        }
    }

    fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: PathBuf, max_upload_bytes: usize) {
    // Leaves room for base64 inflation and the JSON envelope.
    let json_limit = max_upload_bytes / 3 * 4 + 4096;

    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/analyze").route(web::post().to(analyze)))
        .service(
            web::resource("/api/inference")
                .app_data(
                    web::JsonConfig::default()
                        .limit(json_limit)
                        .error_handler(|err, _req| {
                            let body = ErrorResponse {
                                error: err.to_string(),
                                kind: ErrorKind::Upload,
                            };
                            InternalError::from_response(
                                err,
                                HttpResponse::BadRequest().json(body),
                            )
                            .into()
                        }),
                )
                .route(web::post().to(handle_inference)),
        )
        .service(web::resource("/health").route(web::get().to(health)))
        .service(Files::new("/static", static_dir));
}

async fn index(policy: web::Data<UploadPolicy>, renderer: web::Data<Renderer>) -> HttpResponse {
    render_page(&renderer, &policy, StatusCode::OK, None, None)
}

async fn analyze(
    pipeline: web::Data<Pipeline>,
    policy: web::Data<UploadPolicy>,
    renderer: web::Data<Renderer>,
    payload: Multipart,
) -> HttpResponse {
    let request_id = Uuid::new_v4();

    let outcome = match policy.read_multipart(payload).await {
        Ok(upload) => run_analysis(pipeline, upload, request_id).await,
        Err(e) => Err(e.into()),
    };

    match outcome {
        Ok((result, upload)) => {
            let view = ResultView::new(&result, upload.display_name());
            render_page(&renderer, &policy, StatusCode::OK, Some(&view), None)
        }
        Err(e) => {
            log_failure(request_id, &e);
            let view = ErrorView {
                message: e.to_string(),
            };
            render_page(&renderer, &policy, e.status(), None, Some(&view))
        }
    }
}

async fn handle_inference(
    pipeline: web::Data<Pipeline>,
    policy: web::Data<UploadPolicy>,
    request: web::Json<InferenceRequest>,
) -> HttpResponse {
    let request_id = Uuid::new_v4();
    let InferenceRequest {
        image_data,
        file_name,
    } = request.into_inner();

    let outcome = match policy.from_base64(&image_data, file_name) {
        Ok(upload) => run_analysis(pipeline, upload, request_id).await,
        Err(e) => Err(e.into()),
    };

    match outcome {
        Ok((result, upload)) => HttpResponse::Ok().json(AnalysisResponse {
            request_id: request_id.to_string(),
            label: result.diagnosis,
            title: result.diagnosis.title().to_string(),
            confidence: result.confidence,
            confidence_display: format_confidence(result.confidence),
            advisory: result.advisory().iter().map(|tip| tip.to_string()).collect(),
            image_sha256: upload.sha256(),
        }),
        Err(e) => {
            log_failure(request_id, &e);
            HttpResponse::build(e.status()).json(e.to_response())
        }
    }
}

async fn health(pipeline: web::Data<Pipeline>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".into(),
        model_loaded: pipeline.classifier_available(),
    })
}

/// Runs the pipeline on actix's blocking pool; the forward pass may take a while.
async fn run_analysis(
    pipeline: web::Data<Pipeline>,
    upload: UploadedImage,
    request_id: Uuid,
) -> Result<(ClassificationResult, UploadedImage), RequestError> {
    info!(
        "[{}] Analyzing {} ({} bytes, sha256 {})",
        request_id,
        upload.display_name(),
        upload.bytes.len(),
        upload.sha256()
    );

    let (result, upload) = web::block(move || {
        let result = pipeline.analyze(&upload.bytes);
        (result, upload)
    })
    .await
    .map_err(|e| RequestError::Internal(e.to_string()))?;

    let result = result?;
    info!(
        "[{}] Result: {} (confidence {})",
        request_id,
        result.label(),
        format_confidence(result.confidence)
    );
    Ok((result, upload))
}

fn log_failure(request_id: Uuid, e: &RequestError) {
    match e {
        RequestError::Upload(_) => warn!("[{}] Rejected upload: {}", request_id, e),
        RequestError::Analysis(analysis) => {
            error!("[{}] Analysis failed during {}: {}", request_id, analysis.stage(), e)
        }
        RequestError::Internal(_) => error!("[{}] {}", request_id, e),
    }
}

fn render_page(
    renderer: &Renderer,
    policy: &UploadPolicy,
    status: StatusCode,
    result: Option<&ResultView>,
    error: Option<&ErrorView>,
) -> HttpResponse {
    match renderer.page(policy, result, error) {
        Ok(html) => HttpResponse::build(status)
            .content_type("text/html; charset=utf-8")
            .body(html),
        Err(e) => {
            error!("Failed to render page: {}", e);
            HttpResponse::InternalServerError().body("Failed to render page")
        }
    }
}
