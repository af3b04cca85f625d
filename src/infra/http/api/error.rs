use std::error::Error as StdError;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::auth::AuthError;
use crate::application::banners::BannerServiceError;
use crate::application::error::ErrorReport;

const ORIGIN: &str = "infra::http::api";

/// Body of every failed response. Internal failures carry a generic message only.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

pub mod messages {
    pub const INTERNAL: &str = "internal server error";
    pub const CONFLICT: &str = "banner with this tag and feature already exists";
    pub const NOT_FOUND: &str = "banner not found";
    pub const UNAUTHORIZED: &str = "access token required";
    pub const FORBIDDEN: &str = "operation not permitted for this role";
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    report: ErrorReport,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>, report: ErrorReport) -> Self {
        Self {
            status,
            message: message.into(),
            report,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        let message = message.into();
        let report = ErrorReport::note(ORIGIN, StatusCode::BAD_REQUEST, message.clone());
        Self::new(StatusCode::BAD_REQUEST, message, report)
    }

    pub fn unauthorized(err: &AuthError) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            messages::UNAUTHORIZED,
            ErrorReport::capture(ORIGIN, StatusCode::UNAUTHORIZED, err),
        )
    }

    pub fn forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            messages::FORBIDDEN,
            ErrorReport::note(ORIGIN, StatusCode::FORBIDDEN, messages::FORBIDDEN),
        )
    }

    pub fn internal(origin: &'static str, err: &(dyn StdError + 'static)) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            messages::INTERNAL,
            ErrorReport::capture(origin, StatusCode::INTERNAL_SERVER_ERROR, err),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Forbidden => Self::forbidden(),
            AuthError::Missing | AuthError::Invalid | AuthError::Expired => {
                Self::unauthorized(&err)
            }
            AuthError::Issue(_) => Self::internal("infra::http::api::auth", &err),
        }
    }
}

impl From<BannerServiceError> for ApiError {
    fn from(err: BannerServiceError) -> Self {
        match &err {
            BannerServiceError::NotFound => Self::new(
                StatusCode::NOT_FOUND,
                messages::NOT_FOUND,
                ErrorReport::capture(ORIGIN, StatusCode::NOT_FOUND, &err),
            ),
            BannerServiceError::Conflict { .. } => Self::new(
                StatusCode::BAD_REQUEST,
                messages::CONFLICT,
                ErrorReport::capture(ORIGIN, StatusCode::BAD_REQUEST, &err),
            ),
            BannerServiceError::Validation(inner) => Self::bad_request(inner.to_string()),
            BannerServiceError::Repo(_) | BannerServiceError::Queue(_) => {
                Self::internal("infra::http::api::banners", &err)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.message,
        };
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::repos::RepoError;
    use crate::domain::error::DomainError;

    #[test]
    fn service_errors_map_to_status_codes() {
        let cases = [
            (BannerServiceError::NotFound, StatusCode::NOT_FOUND),
            (
                BannerServiceError::Conflict {
                    constraint: "banner_mappings_tag_id_feature_id_key".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                BannerServiceError::Validation(DomainError::EmptyTags),
                StatusCode::BAD_REQUEST,
            ),
            (
                BannerServiceError::Repo(RepoError::Timeout),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_errors_hide_detail_from_clients() {
        let err = ApiError::from(BannerServiceError::Repo(RepoError::from_persistence(
            "relation \"banners\" does not exist",
        )));

        assert_eq!(err.message, messages::INTERNAL);
        assert!(
            err.report
                .chain
                .iter()
                .any(|message| message.contains("does not exist"))
        );
    }

    #[test]
    fn auth_errors_split_between_401_and_403() {
        assert_eq!(
            ApiError::from(AuthError::Expired).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::Forbidden).status(),
            StatusCode::FORBIDDEN
        );
    }
}
