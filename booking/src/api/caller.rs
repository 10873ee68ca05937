//! Caller identity extractor.
//!
//! Identity is an opaque `x-user-id` header set by whatever sits in front of
//! the service.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::error::ApiError;
use crate::types::UserId;

/// Header carrying the caller's user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(CallerId(user_id): CallerId) -> String {
///     format!("tickets for {user_id}")
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing x-user-id header"))?
            .to_str()
            .map_err(|_| ApiError::bad_request("Invalid x-user-id header"))?
            .trim();

        if raw.is_empty() {
            return Err(ApiError::unauthorized("Empty x-user-id header"));
        }
        Ok(Self(UserId::new(raw)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn extract(request: Request<()>) -> Result<CallerId, ApiError> {
        let (mut parts, ()) = request.into_parts();
        CallerId::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_trimmed_header() {
        let request = Request::builder().header(USER_ID_HEADER, " user-7 ").body(()).unwrap();
        assert_eq!(extract(request).await.unwrap(), CallerId(UserId::from("user-7")));
    }

    #[tokio::test]
    async fn missing_or_blank_header_is_unauthorized() {
        let missing = Request::builder().body(()).unwrap();
        assert_eq!(extract(missing).await.unwrap_err().status(), StatusCode::UNAUTHORIZED);

        let blank = Request::builder().header(USER_ID_HEADER, "  ").body(()).unwrap();
        assert_eq!(extract(blank).await.unwrap_err().status(), StatusCode::UNAUTHORIZED);
    }
}
