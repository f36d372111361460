//! Request identity extraction.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;
use std::fmt;
use uuid::Uuid;

/// Header carrying the caller-supplied request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The unique identifier of one inbound request.
///
/// Taken from the `x-request-id` header when the front door supplies one,
/// generated otherwise. Every task started for the request — awaited or
/// detached — is tagged with it, which is what makes background outcomes
/// attributable to a request at all.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(RequestId(id))
    }
}
