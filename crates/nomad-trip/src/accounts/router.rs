use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::auth::Authenticated;
use super::mailer::Mailer;
use super::service::{AccountService, ProfileChanges, Registration};
use crate::marketplace::domain::UserId;
use crate::marketplace::router::json_body;
use crate::marketplace::ServiceError;
use crate::repository::Store;
use crate::storage::ObjectStorage;

type Accounts<S, O, M> = Arc<AccountService<S, O, M>>;

#[derive(Debug, Deserialize)]
pub struct OtpRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Sign-up, sign-in, and profile routes under `/api/v1/users`.
pub fn account_router<S, O, M>(service: Accounts<S, O, M>) -> Router
where
    S: Store,
    O: ObjectStorage + 'static,
    M: Mailer + 'static,
{
    Router::new()
        .route("/api/v1/users/send-otp", post(send_otp_handler::<S, O, M>))
        .route("/api/v1/users/verify-otp", post(register_handler::<S, O, M>))
        .route("/api/v1/users/login", post(login_handler::<S, O, M>))
        .route("/api/v1/users/refresh", post(refresh_handler::<S, O, M>))
        .route(
            "/api/v1/users/profile",
            get(profile_handler::<S, O, M>).put(update_profile_handler::<S, O, M>),
        )
        .route(
            "/api/v1/users/profile/:user_id",
            get(public_profile_handler::<S, O, M>),
        )
        .route("/api/v1/users", delete(delete_account_handler::<S, O, M>))
        .with_state(service)
}

pub(crate) async fn send_otp_handler<S, O, M>(
    State(service): State<Accounts<S, O, M>>,
    payload: Result<Json<OtpRequest>, JsonRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
    M: Mailer + 'static,
{
    let request = json_body(payload)?;
    service.send_otp(&request.email).await?;
    Ok(Json(json!({ "detail": "OTP code sent successfully" })).into_response())
}

pub(crate) async fn register_handler<S, O, M>(
    State(service): State<Accounts<S, O, M>>,
    payload: Result<Json<Registration>, JsonRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
    M: Mailer + 'static,
{
    let registered = service.register(json_body(payload)?)?;
    Ok((StatusCode::CREATED, Json(registered)).into_response())
}

pub(crate) async fn login_handler<S, O, M>(
    State(service): State<Accounts<S, O, M>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
    M: Mailer + 'static,
{
    let credentials = json_body(payload)?;
    let tokens = service.login(&credentials.email, &credentials.password)?;
    Ok(Json(tokens).into_response())
}

pub(crate) async fn refresh_handler<S, O, M>(
    State(service): State<Accounts<S, O, M>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
    M: Mailer + 'static,
{
    let request = json_body(payload)?;
    let tokens = service.refresh(&request.refresh_token)?;
    Ok(Json(tokens).into_response())
}

pub(crate) async fn profile_handler<S, O, M>(
    State(service): State<Accounts<S, O, M>>,
    Authenticated(actor): Authenticated,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
    M: Mailer + 'static,
{
    Ok(Json(service.profile(actor.user_id)?).into_response())
}

pub(crate) async fn public_profile_handler<S, O, M>(
    State(service): State<Accounts<S, O, M>>,
    Path(user_id): Path<u64>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
    M: Mailer + 'static,
{
    Ok(Json(service.public_profile(UserId(user_id))?).into_response())
}

pub(crate) async fn update_profile_handler<S, O, M>(
    State(service): State<Accounts<S, O, M>>,
    Authenticated(actor): Authenticated,
    payload: Result<Json<ProfileChanges>, JsonRejection>,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
    M: Mailer + 'static,
{
    let view = service.update_profile(&actor, json_body(payload)?)?;
    Ok(Json(view).into_response())
}

pub(crate) async fn delete_account_handler<S, O, M>(
    State(service): State<Accounts<S, O, M>>,
    Authenticated(actor): Authenticated,
) -> Result<Response, ServiceError>
where
    S: Store,
    O: ObjectStorage + 'static,
    M: Mailer + 'static,
{
    service.delete_account(&actor).await?;
    Ok(Json(json!({ "detail": "User deleted successfully" })).into_response())
}
