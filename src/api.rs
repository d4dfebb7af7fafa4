use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use crate::{
    url_repo::UrlMapping,
    url_service::{Redirect, ResolveError, SubmitError},
};

#[derive(Debug, Deserialize)]
pub struct SubmitUrlPayload {
    #[serde(alias = "longUrl")]
    pub long_url: String,
}

#[derive(Debug, Serialize)]
pub struct ShortenedUrl {
    pub short_url: String,
    pub short_token: String,
    pub long_url: String,
}

impl ShortenedUrl {
    /// Embeds the mapping's token into `public_base_url`.
    ///
    /// # Errors
    /// Will return [`Err`] if the token cannot be joined onto the base URL.
    pub fn new(
        public_base_url: &Url,
        UrlMapping {
            short_token,
            long_url,
        }: UrlMapping,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            short_url: public_base_url.join(short_token.as_str())?.into(),
            short_token: short_token.into_inner(),
            long_url,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct Error {
    pub error: String,
    pub error_id: String,
}

pub type ErrorResponse = (StatusCode, Json<Error>);

/// Rejects a long URL that could never be sent back in a `Location` header.
/// The URL itself is not validated.
///
/// # Errors
/// Will return a `400 Bad Request` [`ErrorResponse`] for such a URL.
pub fn check_redirectable(long_url: &str) -> Result<(), ErrorResponse> {
    HeaderValue::from_str(long_url).map(drop).map_err(|_| {
        let err_uuid = Uuid::new_v4();
        info!(?err_uuid, long_url, "User submitted a URL that is not a valid header value");
        (
            StatusCode::BAD_REQUEST,
            Json(Error {
                error: "long_url contains characters that cannot be redirected to".to_owned(),
                error_id: err_uuid.to_string(),
            }),
        )
    })
}

/// Builds the `307 Temporary Redirect` for a resolved token.
///
/// # Errors
/// Will return a `500` [`ErrorResponse`] if the stored URL is not a valid header value.
pub fn redirect_response(Redirect { url }: Redirect) -> Result<Response, ErrorResponse> {
    let location = HeaderValue::try_from(url.as_str()).map_err(|header_error| {
        let err_uuid = Uuid::new_v4();
        error!(?err_uuid, ?header_error, url, "Stored URL is not a valid Location header");
        internal_server_error(err_uuid)
    })?;
    Ok((StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, location)]).into_response())
}

#[must_use]
pub fn resolve_error_response(error: ResolveError) -> ErrorResponse {
    let err_uuid = Uuid::new_v4();
    match error {
        ResolveError::NotFound => (
            StatusCode::NOT_FOUND,
            Json(Error {
                error: "Not found".to_owned(),
                error_id: err_uuid.to_string(),
            }),
        ),
        ResolveError::StorageUnavailable(_) => {
            error!(?err_uuid, ?error, "Encountered error during a request");
            internal_server_error(err_uuid)
        }
    }
}

#[must_use]
pub fn submit_error_response(error: SubmitError) -> ErrorResponse {
    let err_uuid = Uuid::new_v4();
    match error {
        SubmitError::TokenSpaceExhausted { .. } | SubmitError::StorageUnavailable(_) => {
            error!(?err_uuid, ?error, "Encountered error during a request");
            internal_server_error(err_uuid)
        }
    }
}

#[must_use]
pub fn internal_server_error(err_uuid: Uuid) -> ErrorResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(Error {
            error: "Internal server error".to_owned(),
            error_id: err_uuid.to_string(),
        }),
    )
}
