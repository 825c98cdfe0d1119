//! Server-rendered variant: form login/registration, an upload page and a
//! result page. Pages are small inline HTML, there is no template engine.

use actix_multipart::Multipart;
use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpResponse, ResponseError};
use html_escape::encode_text;
use serde::Deserialize;

use crate::error::AppError;
use crate::routes::run_prediction;
use crate::state::AppState;
use crate::storage::multipart::read_file_field;

const OK_MARKER: &str = "1";
const FAIL_MARKER: &str = "-1";

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/")
            .route(web::get().to(login_page))
            .route(web::post().to(auth_form)),
    )
    .service(web::resource("/dashboard").route(web::get().to(dashboard)))
    .service(
        web::resource("/success")
            .route(web::get().to(back_to_dashboard))
            .route(web::post().to(upload_form)),
    )
    .service(web::resource("/predict_image/{name}").route(web::get().to(predict_page)));
}

/// `reqst` is `r` for registration and `l` for login.
#[derive(Debug, Deserialize)]
pub struct AuthForm {
    pub email: Option<String>,
    #[serde(rename = "pass")]
    pub password: Option<String>,
    pub reqst: Option<String>,
    pub username: Option<String>,
}

fn see_other(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, location))
        .finish()
}

fn marker(status: StatusCode, body: &'static str) -> HttpResponse {
    HttpResponse::build(status)
        .content_type("text/plain; charset=utf-8")
        .body(body)
}

fn html(status: StatusCode, title: &str, body: &str) -> HttpResponse {
    HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .body(format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title></head>\
             <body>{}</body></html>",
            encode_text(title),
            body
        ))
}

fn error_page(err: &AppError) -> HttpResponse {
    if matches!(err, AppError::Internal(_) | AppError::Inference(_)) {
        log::error!("{}", err);
    }
    let message = match err {
        AppError::Internal(_) => "Internal server error".to_string(),
        other => other.to_string(),
    };
    html(
        err.status_code(),
        "Error",
        &format!(
            "<h1>Something went wrong</h1><p>{}</p><p><a href=\"/dashboard\">Back</a></p>",
            encode_text(&message)
        ),
    )
}

async fn login_page() -> HttpResponse {
    html(
        StatusCode::OK,
        "Eye Disease Prediction",
        "<h1>Eye Disease Prediction</h1>\
         <form method=\"post\" action=\"/\">\
         <input type=\"hidden\" name=\"reqst\" value=\"l\">\
         <input name=\"email\" type=\"email\" placeholder=\"Email\">\
         <input name=\"pass\" type=\"password\" placeholder=\"Password\">\
         <button type=\"submit\">Login</button></form>\
         <form method=\"post\" action=\"/\">\
         <input type=\"hidden\" name=\"reqst\" value=\"r\">\
         <input name=\"username\" placeholder=\"Username\">\
         <input name=\"email\" type=\"email\" placeholder=\"Email\">\
         <input name=\"pass\" type=\"password\" placeholder=\"Password\">\
         <button type=\"submit\">Register</button></form>",
    )
}

async fn auth_form(state: web::Data<AppState>, form: web::Form<AuthForm>) -> HttpResponse {
    let form = form.into_inner();
    match form.reqst.as_deref() {
        Some("r") => match state
            .auth
            .register(
                form.email.as_deref(),
                form.username.as_deref(),
                form.password.as_deref(),
            )
            .await
        {
            Ok(_) => marker(StatusCode::OK, OK_MARKER),
            Err(AppError::Internal(msg)) => {
                log::error!("Registration failed: {}", msg);
                marker(StatusCode::INTERNAL_SERVER_ERROR, FAIL_MARKER)
            }
            Err(_) => marker(StatusCode::OK, FAIL_MARKER),
        },
        Some("l") => match state
            .auth
            .login(form.email.as_deref(), form.password.as_deref())
            .await
        {
            Ok(_) => see_other("/dashboard"),
            Err(AppError::Internal(msg)) => {
                log::error!("Login failed: {}", msg);
                marker(StatusCode::INTERNAL_SERVER_ERROR, FAIL_MARKER)
            }
            Err(_) => marker(StatusCode::OK, FAIL_MARKER),
        },
        _ => marker(StatusCode::BAD_REQUEST, FAIL_MARKER),
    }
}

async fn dashboard() -> HttpResponse {
    html(
        StatusCode::OK,
        "Dashboard",
        "<h1>Upload a fundus image</h1>\
         <form method=\"post\" action=\"/success\" enctype=\"multipart/form-data\">\
         <input type=\"file\" name=\"file\" accept=\".png,.jpg,.jpeg,.gif\">\
         <button type=\"submit\">Predict</button></form>",
    )
}

async fn back_to_dashboard() -> HttpResponse {
    see_other("/dashboard")
}

async fn upload_form(state: web::Data<AppState>, payload: Multipart) -> HttpResponse {
    let stored = async {
        let part = read_file_field(payload, state.uploads.max_bytes()).await?;
        state
            .uploads
            .save(&part.filename, &part.data)
            .await
            .map_err(AppError::from)
    }
    .await;
    match stored {
        Ok(stored) => see_other(&format!(
            "/predict_image/{}",
            urlencoding::encode(&stored.filename)
        )),
        Err(err) => error_page(&err),
    }
}

async fn predict_page(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let name = path.into_inner();
    let result = async {
        let image_path = state.uploads.resolve(&name)?;
        run_prediction(&state, image_path).await
    }
    .await;

    match result {
        Ok(result) => {
            log::info!("Predicted {} for {}", result.condition, name);
            let prediction = result.to_prediction();
            html(
                StatusCode::OK,
                "Prediction",
                &format!(
                    "<h1>{}</h1><p>{}</p><p>Confidence: {}</p><p>Image: {}</p>\
                     <p><a href=\"/dashboard\">Upload another image</a></p>",
                    encode_text(prediction.condition.name()),
                    encode_text(&prediction.description),
                    encode_text(&prediction.confidence),
                    encode_text(&name)
                ),
            )
        }
        Err(err) => error_page(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::testing::loaded_handle;
    use crate::routes::testing::{jpeg_bytes, multipart_body, multipart_content_type};
    use crate::state::testing::app_state;
    use actix_web::{test, App};

    macro_rules! forms_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .configure(configure_routes),
            )
            .await
        };
    }

    fn form_post(body: &[(&str, &str)]) -> test::TestRequest {
        test::TestRequest::post().uri("/").set_form(body)
    }

    #[actix_web::test]
    async fn error_page_escapes_markup() {
        let err = AppError::Validation("<script>alert(1)</script> & more".to_string());
        let resp = error_page(&err);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let page = String::from_utf8(body.to_vec()).unwrap();
        assert!(page.contains("&lt;script&gt;alert(1)&lt;/script&gt; &amp; more"), "{}", page);
        assert!(!page.contains("<script>"));
    }

    #[actix_web::test]
    async fn register_and_login_markers() {
        let dir = tempfile::tempdir().unwrap();
        let app = forms_app!(app_state(dir.path(), loaded_handle(dir.path())).await);

        let register = [
            ("reqst", "r"),
            ("email", "t@example.com"),
            ("username", "tester"),
            ("pass", "testpassword123"),
        ];
        let body = test::call_and_read_body(&app, form_post(&register).to_request()).await;
        assert_eq!(body, "1");
        let body = test::call_and_read_body(&app, form_post(&register).to_request()).await;
        assert_eq!(body, "-1");

        let login = [("reqst", "l"), ("email", "t@example.com"), ("pass", "testpassword123")];
        let resp = test::call_service(&app, form_post(&login).to_request()).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/dashboard");

        let bad = [("reqst", "l"), ("email", "invalid@example.com"), ("pass", "wrong")];
        let body = test::call_and_read_body(&app, form_post(&bad).to_request()).await;
        assert_eq!(body, "-1");
    }

    #[actix_web::test]
    async fn upload_redirects_to_result_page() {
        let dir = tempfile::tempdir().unwrap();
        let app = forms_app!(app_state(dir.path(), loaded_handle(dir.path())).await);

        let req = test::TestRequest::post()
            .uri("/success")
            .insert_header((header::CONTENT_TYPE, multipart_content_type()))
            .set_payload(multipart_body("file", "my retina.jpg", &jpeg_bytes()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap().to_string();
        assert_eq!(location, "/predict_image/my_retina.jpg");

        let resp = test::call_service(&app, test::TestRequest::get().uri(&location).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let page = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(shared::Condition::all().any(|c| page.contains(&format!("<h1>{}</h1>", c.name()))));
    }

    #[actix_web::test]
    async fn invalid_upload_renders_error_page() {
        let dir = tempfile::tempdir().unwrap();
        let app = forms_app!(app_state(dir.path(), loaded_handle(dir.path())).await);

        let req = test::TestRequest::post()
            .uri("/success")
            .insert_header((header::CONTENT_TYPE, multipart_content_type()))
            .set_payload(multipart_body("file", "notes.txt", b"hello"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let page = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(page.contains("Invalid file type"));
    }

    #[actix_web::test]
    async fn pages_render() {
        let dir = tempfile::tempdir().unwrap();
        let app = forms_app!(app_state(dir.path(), loaded_handle(dir.path())).await);

        for uri in ["/", "/dashboard"] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK, "{}", uri);
        }
        let resp = test::call_service(&app, test::TestRequest::get().uri("/success").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/predict_image/ghost.png").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
