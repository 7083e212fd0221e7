use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// `Json<T>` whose rejections (bad content type, syntax errors, missing
/// fields) come back as `400 {"error": ...}` like every other client error.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// `Path<T>` with the same `400 {"error": ...}` rejection, e.g. for a link
/// id that is not a UUID.
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
        Ok(ApiPath(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request as HttpRequest};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Payload {
        url: String,
    }

    fn request(content_type: &str, body: &'static str) -> Request {
        HttpRequest::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn accepts_valid_json() {
        let ApiJson(payload) = tokio_test::assert_ok!(
            ApiJson::<Payload>::from_request(request("application/json", r#"{"url":"x"}"#), &())
                .await
        );
        assert_eq!(payload.url, "x");
    }

    #[tokio::test]
    async fn missing_field_is_a_validation_error() {
        let err = ApiJson::<Payload>::from_request(request("application/json", "{}"), &())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn syntax_error_is_a_validation_error() {
        let err = ApiJson::<Payload>::from_request(request("application/json", "{url"), &())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn wrong_content_type_is_a_validation_error() {
        let err = ApiJson::<Payload>::from_request(request("text/plain", r#"{"url":"x"}"#), &())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
