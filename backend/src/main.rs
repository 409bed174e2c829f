mod config;
mod model;
mod pipeline;
mod render;
mod routes;
mod upload;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use config::AppConfig;
use pipeline::{ImageNormalizer, Pipeline};
use render::Renderer;
use routes::configure_routes;
use upload::UploadPolicy;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let (config, source) = AppConfig::load().map_err(|e| {
        log::error!("Failed to load configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    match &source {
        Some(path) => log::info!("Loaded configuration from {}", path.display()),
        None => log::info!("Using built-in configuration"),
    }

    let filter = config
        .image
        .preprocessing
        .filter()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    let classifier = model::load_classifier(&config.model).map_err(|e| {
        log::error!("Failed to preload model at startup: {}", e);
        std::io::Error::other(format!("Model loading failed: {}", e))
    })?;

    let pipeline = web::Data::new(Pipeline::new(ImageNormalizer::new(filter), classifier));
    let policy = web::Data::new(UploadPolicy::new(&config.upload));
    let renderer = web::Data::new(Renderer::new().map_err(|e| std::io::Error::other(e.to_string()))?);

    let static_dir = config.server.static_dir.clone();
    let max_upload_bytes = config.upload.max_bytes;
    let bind_address = config.bind_address();

    if !pipeline.classifier_available() {
        log::warn!("Serving without a classifier; every analysis will fail until the model is available");
    }
    log::info!("Starting server on {}", bind_address);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(pipeline.clone())
            .app_data(policy.clone())
            .app_data(renderer.clone())
            .configure(|cfg| configure_routes(cfg, static_dir.clone(), max_upload_bytes))
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
