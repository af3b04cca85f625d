use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::application::auth::{AuthError, Principal};
use crate::application::error::ErrorReport;
use crate::domain::banners::BannerId;
use crate::util::time::from_unix_micros;

use super::error::ApiError;
use super::models::*;
use super::state::ApiState;

pub async fn get_user_banner(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<UserBannerQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|err| ApiError::bad_request(err.body_text()))?;

    if query.use_last_revision && !principal.role.is_admin() {
        return Err(AuthError::Forbidden.into());
    }

    let banner = state
        .banners
        .get_banner(
            query.tag_id,
            query.feature_id,
            query.use_last_revision,
            principal.only_active(),
        )
        .await?;

    Ok(Json(banner.content).into_response())
}

pub async fn list_banners(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<BannerListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    principal.require_admin()?;
    let Query(query) = query.map_err(|err| ApiError::bad_request(err.body_text()))?;

    if query.limit == Some(0) {
        return Err(ApiError::bad_request("limit must be greater than zero"));
    }

    let banners = state.banners.list_banners(query.into()).await?;
    let body: Vec<BannerResponse> = banners.into_iter().map(BannerResponse::from).collect();

    Ok(Json(body).into_response())
}

pub async fn create_banner(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<BannerCreateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    principal.require_admin()?;
    let Json(payload) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let command = payload.into_command().map_err(ApiError::bad_request)?;

    let banner_id = state.banners.create_banner(command).await?;

    Ok((
        StatusCode::CREATED,
        Json(BannerCreatedResponse { banner_id }),
    )
        .into_response())
}

pub async fn update_banner(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<BannerId>, PathRejection>,
    payload: Result<Json<BannerPatchRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    principal.require_admin()?;
    let Path(id) = id.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let Json(payload) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;

    state.banners.update_banner(id, payload.into()).await?;

    Ok(StatusCode::OK)
}

pub async fn delete_banner(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<BannerId>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    principal.require_admin()?;
    let Path(id) = id.map_err(|err| ApiError::bad_request(err.body_text()))?;

    state.banners.delete_banner(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_banner_versions(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<BannerId>, PathRejection>,
) -> Result<Response, ApiError> {
    principal.require_admin()?;
    let Path(id) = id.map_err(|err| ApiError::bad_request(err.body_text()))?;

    let versions = state.banners.list_banner_versions(id).await?;
    let body: Vec<BannerVersionResponse> = versions
        .into_iter()
        .map(BannerVersionResponse::from)
        .collect();

    Ok(Json(body).into_response())
}

pub async fn restore_banner_version(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    params: Result<Path<(BannerId, i64)>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    principal.require_admin()?;
    let Path((id, updated_at)) = params.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let updated_at = from_unix_micros(updated_at)
        .map_err(|err| ApiError::bad_request(format!("invalid updated_at: {err}")))?;

    state.banners.restore_version(id, updated_at).await?;

    Ok(StatusCode::OK)
}

/// Liveness plus a `SELECT 1` round trip when a database is wired in.
pub async fn health(State(state): State<ApiState>) -> Response {
    let Some(db) = state.db else {
        return StatusCode::NO_CONTENT.into_response();
    };

    match db.health_check().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let status = StatusCode::SERVICE_UNAVAILABLE;
            let mut response = status.into_response();
            ErrorReport::capture("infra::http::api::health", status, &err).attach(&mut response);
            response
        }
    }
}
