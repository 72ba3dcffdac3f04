use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::{avatar::read_avatar, repo::StoreError, repo_types::ProfilePatch, repo_types::PublicUser};
use crate::{
    auth::{
        extractors::CurrentUser,
        handlers::{is_valid_email, non_blank, normalize_email},
    },
    error::ApiError,
    state::AppState,
};

/// Multipart framing allowance on top of the file size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: PublicUser,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Routes that expect `CurrentUser`; the caller layers `require_auth` on them.
pub fn profile_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/profile", get(get_profile).put(update_profile))
        .route(
            "/upload",
            post(upload_avatar)
                .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD)),
        )
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_profile(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse { user })
}

#[instrument(skip_all, fields(user_id = %current.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::validation(e.body_text()))?;

    let mut patch = ProfilePatch {
        name: non_blank(payload.name).map(|n| n.trim().to_string()),
        email: None,
    };

    if let Some(email) = non_blank(payload.email) {
        let email = normalize_email(&email);
        if !is_valid_email(&email) {
            return Err(ApiError::validation("Invalid email"));
        }
        if email != current.email {
            if let Some(other) = state.users.find_by_email(&email).await? {
                if other.id != current.id {
                    warn!(email = %email, "email already in use");
                    return Err(ApiError::conflict("Email already in use"));
                }
            }
            patch.email = Some(email);
        }
    }

    if patch.is_empty() {
        return Ok(Json(UserResponse { user: current }));
    }

    let user = match state.users.update_profile(current.id, patch).await {
        Ok(Some(user)) => user,
        // deleted between authentication and update
        Ok(None) => return Err(ApiError::Unauthenticated),
        Err(StoreError::EmailTaken) => return Err(ApiError::conflict("Email already in use")),
        Err(e) => return Err(e.into()),
    };

    info!("profile updated");
    Ok(Json(UserResponse { user }))
}

#[instrument(skip_all, fields(user_id = %current.id))]
pub async fn upload_avatar(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let mp = mp.map_err(|e| {
        warn!(error = %e, "upload is not multipart");
        ApiError::upload_rejected("No file uploaded")
    })?;
    let upload = read_avatar(mp, state.config.uploads.max_bytes).await?;

    // refuse to write a file no record could point to
    state
        .users
        .find_public_by_id(current.id)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    let key = upload.object_key(current.id, OffsetDateTime::now_utc());
    state
        .storage
        .put_object(&key, upload.body, &upload.content_type)
        .await?;
    let path = state.storage.public_path(&key);

    // previous avatar files are left in place
    let user = state
        .users
        .set_avatar(current.id, &path)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    info!(avatar = %path, "avatar uploaded");
    Ok(Json(UserResponse { user }))
}
