/// Body and query extractors that fail with the portal's error format
use crate::error::PortalError;
use axum::{
    async_trait,
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

/// JSON body that is deserialized and validated.
///
/// Malformed JSON and failed validation both become a 400 `ValidationError`.
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = PortalError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(json_rejection)?;
        value
            .validate()
            .map_err(|e| PortalError::Validation(e.to_string()))?;
        Ok(ValidatedJson(value))
    }
}

/// JSON body without field validation
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = PortalError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(json_rejection)?;
        Ok(JsonBody(value))
    }
}

/// JSON body that may be omitted entirely.
///
/// An empty body yields `None`; anything else must parse or the request fails
/// with a 400 `ValidationError`.
#[derive(Debug, Clone)]
pub struct OptionalJsonBody<T>(pub Option<T>);

#[async_trait]
impl<T, S> FromRequest<S> for OptionalJsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = PortalError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| PortalError::Validation(format!("Invalid request body: {}", e)))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(OptionalJsonBody(None));
        }
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| PortalError::Validation(format!("Invalid request body: {}", e)))?;
        Ok(OptionalJsonBody(Some(value)))
    }
}

fn json_rejection(rejection: JsonRejection) -> PortalError {
    tracing::debug!("Rejected request body: {}", rejection.body_text());
    PortalError::Validation(format!("Invalid request body: {}", rejection.body_text()))
}
