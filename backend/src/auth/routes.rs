use actix_web::{web, HttpResponse};
use shared::{LoginRequest, LoginResponse, MessageResponse, RegisterRequest, UserInfo};

use crate::error::AppError;
use crate::state::AppState;

pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    let req = body.into_inner();
    state
        .auth
        .register(
            req.email.as_deref(),
            req.username.as_deref(),
            req.password.as_deref(),
        )
        .await?;
    Ok(HttpResponse::Created().json(MessageResponse {
        message: "User registered successfully".to_string(),
    }))
}

pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let req = body.into_inner();
    let user = state
        .auth
        .login(req.email.as_deref(), req.password.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(LoginResponse {
        message: "Login successful".to_string(),
        user: UserInfo::from(user),
    }))
}
