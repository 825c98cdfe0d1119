mod auth;
mod config;
mod db;
mod error;
mod forms;
mod inference;
mod routes;
mod state;
mod storage;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use auth::service::AuthService;
use config::{Settings, Variant};
use db::user_repository::UserRepository;
use inference::config::PreprocessingConfig;
use inference::ClassifierHandle;
use state::AppState;
use std::env;
use std::io;
use storage::uploads::UploadStore;

fn startup_error(context: &str, err: impl std::fmt::Display) -> io::Error {
    log::error!("{}: {}", context, err);
    io::Error::other(format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let settings = Settings::from_env().map_err(|e| startup_error("Invalid configuration", e))?;

    if let Some(db_dir) = settings.database_dir() {
        std::fs::create_dir_all(&db_dir)
            .map_err(|e| startup_error("Failed to create database directory", e))?;
    }
    let users = UserRepository::connect(&settings.database_url)
        .await
        .map_err(|e| startup_error("Failed to open user database", e))?;

    let uploads = UploadStore::open(&settings.upload_folder, settings.max_upload_bytes)
        .map_err(|e| startup_error("Failed to prepare upload folder", e))?;

    let preprocessing = PreprocessingConfig::load(&settings.preprocessing_config)
        .map_err(|e| startup_error("Failed to load preprocessing config", e))?;

    // Loaded once; a missing or incompatible file is reported per request.
    let classifier = ClassifierHandle::load(&settings.model_path, preprocessing, settings.device);
    if classifier.is_loaded() {
        log::info!("Model ready from {}", settings.model_path.display());
    }

    let state = web::Data::new(AppState::new(AuthService::new(users), uploads, classifier));
    let variant = settings.variant;
    let bind_address = settings.bind_address();
    log::info!("Starting {:?} server on {}", variant, bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(state.clone())
            .configure(|cfg| match variant {
                Variant::Api => routes::configure_routes(cfg),
                Variant::Forms => forms::configure_routes(cfg),
            })
    })
    .bind(&bind_address)?
    .run()
    .await
}
