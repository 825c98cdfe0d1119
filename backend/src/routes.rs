use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use log::info;
use serde_json::json;
use shared::{Condition, HealthResponse, UploadResponse};
use std::path::PathBuf;

use crate::auth;
use crate::error::AppError;
use crate::inference::PredictionResult;
use crate::state::AppState;
use crate::storage::multipart::read_file_field;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/api/health").route(web::get().to(health_check)))
        .service(web::resource("/api/register").route(web::post().to(auth::routes::register)))
        .service(web::resource("/api/login").route(web::post().to(auth::routes::login)))
        .service(web::resource("/api/upload").route(web::post().to(upload_file)))
        .service(web::resource("/api/predict/{filename}").route(web::get().to(get_prediction)));
}

/// Malformed or non-JSON bodies are client errors, reported in the usual envelope.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| AppError::Validation(format!("Invalid JSON body: {}", err)).into())
}

/// Runs the blocking pipeline off the async workers.
pub(crate) async fn run_prediction(
    state: &AppState,
    image_path: PathBuf,
) -> Result<PredictionResult, AppError> {
    let classifier = state.classifier.clone();
    let result = web::block(move || classifier.classify_file(&image_path)).await??;
    Ok(result)
}

async fn index() -> HttpResponse {
    let supported: Vec<&str> = Condition::all().map(Condition::summary).collect();
    HttpResponse::Ok().json(json!({
        "name": "Eye Disease Prediction API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "REST API for predicting eye diseases from uploaded images",
        "endpoints": {
            "POST /api/register": "Register a new user",
            "POST /api/login": "Login user",
            "POST /api/upload": "Upload image and get prediction",
            "GET /api/predict/<filename>": "Get prediction for uploaded file",
            "GET /api/health": "Health check"
        },
        "supported_conditions": supported
    }))
}

async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        message: "Eye Disease Prediction API is running".to_string(),
        model_loaded: state.classifier.is_loaded(),
    })
}

async fn upload_file(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let part = read_file_field(payload, state.uploads.max_bytes()).await?;
    let stored = state.uploads.save(&part.filename, &part.data).await?;

    let result = run_prediction(&state, stored.path).await?;
    info!("Predicted {} for {}", result.condition, stored.filename);

    Ok(HttpResponse::Ok().json(UploadResponse {
        message: "File uploaded successfully".to_string(),
        filename: stored.filename,
        prediction: result.to_prediction(),
    }))
}

async fn get_prediction(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let filename = path.into_inner();
    let image_path = state.uploads.resolve(&filename)?;
    let result = run_prediction(&state, image_path).await?;
    info!("Predicted {} for {}", result.condition, filename);
    Ok(HttpResponse::Ok().json(result.to_prediction()))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::inference::config::PreprocessingConfig;
    use crate::inference::{testing::loaded_handle, ClassifierHandle};
    use crate::state::testing::app_state;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use serde_json::Value;
    use shared::{ErrorResponse, LoginResponse, Prediction};
    use std::path::Path;

    macro_rules! api {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .configure(configure_routes),
            )
            .await
        };
    }

    fn upload_request(field: &str, filename: &str, data: &[u8]) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/upload")
            .insert_header((header::CONTENT_TYPE, multipart_content_type()))
            .set_payload(multipart_body(field, filename, data))
    }

    fn missing_model(dir: &Path) -> ClassifierHandle {
        ClassifierHandle::load(
            &dir.join("missing.safetensors"),
            PreprocessingConfig::default(),
            tch::Device::Cpu,
        )
    }

    #[actix_web::test]
    async fn health_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let app = api!(app_state(dir.path(), loaded_handle(dir.path())).await);

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: HealthResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.status, "healthy");
        assert!(body.model_loaded);

        let req = test::TestRequest::get().uri("/").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["name"], "Eye Disease Prediction API");
        assert_eq!(body["supported_conditions"].as_array().unwrap().len(), 6);
        assert_eq!(body["supported_conditions"][0], "AMD (Age-related Macular Degeneration)");
    }

    #[actix_web::test]
    async fn register_and_login_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = api!(app_state(dir.path(), missing_model(dir.path())).await);

        let new_user = json!({"email": "a@example.com", "username": "alice", "password": "pw123"});
        let req = test::TestRequest::post().uri("/api/register").set_json(&new_user).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::post().uri("/api/register").set_json(&new_user).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "User already exists");
        assert_eq!(body.kind, "conflict");

        let req = test::TestRequest::post()
            .uri("/api/login")
            .set_json(json!({"email": "a@example.com", "password": "pw123"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: LoginResponse = test::read_body_json(resp).await;
        assert_eq!(body.message, "Login successful");
        assert_eq!(body.user.username, "alice");
        assert_eq!(body.user.email.as_deref(), Some("a@example.com"));

        let req = test::TestRequest::post()
            .uri("/api/login")
            .set_json(json!({"email": "a@example.com", "password": "wrong"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "Invalid credentials");
    }

    #[actix_web::test]
    async fn register_validates_fields_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let app = api!(app_state(dir.path(), missing_model(dir.path())).await);

        let req = test::TestRequest::post()
            .uri("/api/register")
            .set_json(json!({"email": "a@example.com"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "Missing required fields");

        let req = test::TestRequest::post()
            .uri("/api/register")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.kind, "validation");
    }

    #[actix_web::test]
    async fn upload_returns_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let app = api!(app_state(dir.path(), loaded_handle(dir.path())).await);

        let req = upload_request("file", "retina.jpg", &jpeg_bytes()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: UploadResponse = test::read_body_json(resp).await;
        assert_eq!(body.message, "File uploaded successfully");
        assert_eq!(body.filename, "retina.jpg");
        assert_eq!(body.prediction.confidence, "High");
        assert_eq!(body.prediction.description, body.prediction.condition.description());
        assert!(dir.path().join("uploads/retina.jpg").is_file());

        let req = test::TestRequest::get().uri("/api/predict/retina.jpg").to_request();
        let again: Prediction = test::call_and_read_body_json(&app, req).await;
        assert_eq!(again, body.prediction);
    }

    #[actix_web::test]
    async fn disallowed_extension_is_rejected_before_inference() {
        let dir = tempfile::tempdir().unwrap();
        // With no model loaded, reaching inference would produce a 404.
        let app = api!(app_state(dir.path(), missing_model(dir.path())).await);

        let req = upload_request("file", "retina.bmp", &jpeg_bytes()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "Invalid file type");
        assert_eq!(std::fs::read_dir(dir.path().join("uploads")).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn upload_without_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = api!(app_state(dir.path(), loaded_handle(dir.path())).await);

        let req = upload_request("document", "retina.jpg", &jpeg_bytes()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "No file provided");

        let req = upload_request("file", "", b"").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "No file selected");
    }

    #[actix_web::test]
    async fn upload_without_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = api!(app_state(dir.path(), loaded_handle(dir.path())).await);

        let req = test::TestRequest::post().uri("/api/upload").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.kind, "validation");
        assert!(!body.error.is_empty());
    }

    #[actix_web::test]
    async fn undecodable_upload_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = api!(app_state(dir.path(), loaded_handle(dir.path())).await);

        let req = upload_request("file", "test_image.jpg", b"dummy image content for testing").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.kind, "decode");
    }

    #[actix_web::test]
    async fn missing_model_fails_predictions_with_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = api!(app_state(dir.path(), missing_model(dir.path())).await);

        let req = upload_request("file", "retina.jpg", &jpeg_bytes()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.kind, "not_found");
        assert!(body.error.contains("Model file not found"));

        let req = test::TestRequest::get().uri("/api/predict/retina.jpg").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn predicting_unknown_upload_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = api!(app_state(dir.path(), loaded_handle(dir.path())).await);

        let req = test::TestRequest::get().uri("/api/predict/ghost.png").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "Image file not found: ghost.png");
    }
}
