use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;

use warp::{reject, Filter, Rejection, Reply};

use crate::collage_pipeline::CollagePipeline;
use crate::collage_store::CollageStore;
use crate::collage_types::CollageError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub timestamp: String,
}

#[derive(Debug)]
pub struct AuthError {
    pub message: String,
}

impl reject::Reject for AuthError {}

#[derive(Debug)]
pub struct ValidationError {
    pub message: String,
}

impl reject::Reject for ValidationError {}

#[derive(Debug)]
pub struct UpstreamError {
    pub message: String,
}

impl reject::Reject for UpstreamError {}

#[derive(Debug)]
pub struct TimeoutError {
    pub message: String,
}

impl reject::Reject for TimeoutError {}

#[derive(Debug)]
pub struct InternalError {
    pub message: String,
}

impl reject::Reject for InternalError {}

#[derive(Debug)]
pub struct NotFoundError;
impl reject::Reject for NotFoundError {}

/// Turn a pipeline failure into the rejection for its user-visible category.
pub fn collage_rejection(err: CollageError) -> Rejection {
    let message = err.to_string();
    match err {
        CollageError::Auth(_) => reject::custom(AuthError { message }),
        CollageError::InvalidParameter(_) => reject::custom(ValidationError { message }),
        CollageError::Upstream(_) => reject::custom(UpstreamError { message }),
        CollageError::Timeout(_) => reject::custom(TimeoutError { message }),
        CollageError::Composition(_)
        | CollageError::ImageError(_)
        | CollageError::IoError(_)
        | CollageError::Storage(_) => reject::custom(InternalError { message }),
    }
}

pub fn with_pipeline(
    pipeline: Arc<CollagePipeline>,
) -> impl Filter<Extract = (Arc<CollagePipeline>,), Error = Infallible> + Clone {
    warp::any().map(move || pipeline.clone())
}

pub fn with_store(
    store: Arc<dyn CollageStore>,
) -> impl Filter<Extract = (Arc<dyn CollageStore>,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let code;
    let message;
    let timestamp = chrono::Utc::now().to_rfc3339();

    if err.is_not_found() || err.find::<NotFoundError>().is_some() {
        code = warp::http::StatusCode::NOT_FOUND;
        message = "Not Found".to_string();
    } else if let Some(auth_error) = err.find::<AuthError>() {
        code = warp::http::StatusCode::UNAUTHORIZED;
        message = auth_error.message.clone();
    } else if let Some(validation_error) = err.find::<ValidationError>() {
        code = warp::http::StatusCode::BAD_REQUEST;
        message = validation_error.message.clone();
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        code = warp::http::StatusCode::BAD_REQUEST;
        message = "Invalid query parameters".to_string();
    } else if let Some(upstream_error) = err.find::<UpstreamError>() {
        code = warp::http::StatusCode::BAD_GATEWAY;
        message = upstream_error.message.clone();
    } else if let Some(timeout_error) = err.find::<TimeoutError>() {
        code = warp::http::StatusCode::GATEWAY_TIMEOUT;
        message = timeout_error.message.clone();
    } else if let Some(internal_error) = err.find::<InternalError>() {
        code = warp::http::StatusCode::INTERNAL_SERVER_ERROR;
        message = internal_error.message.clone();
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        code = warp::http::StatusCode::METHOD_NOT_ALLOWED;
        message = "Method not allowed".to_string();
    } else {
        log::error!("Unhandled rejection: {:?}", err);
        code = warp::http::StatusCode::INTERNAL_SERVER_ERROR;
        message = "Internal server error".to_string();
    }

    let error_response = ErrorResponse {
        error: message,
        code: code.as_u16(),
        timestamp,
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&error_response),
        code,
    ))
}

pub fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type", "authorization"])
        .allow_methods(vec!["GET", "OPTIONS"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn status_of(err: CollageError) -> u16 {
        let reply = handle_rejection(collage_rejection(err)).await.unwrap();
        reply.into_response().status().as_u16()
    }

    #[tokio::test]
    async fn test_error_categories_map_to_status_codes() {
        assert_eq!(status_of(CollageError::Auth("expired".into())).await, 401);
        assert_eq!(
            status_of(CollageError::InvalidParameter("grid".into())).await,
            400
        );
        assert_eq!(status_of(CollageError::Upstream("404".into())).await, 502);
        assert_eq!(
            status_of(CollageError::Timeout(Duration::from_secs(1))).await,
            504
        );
        assert_eq!(
            status_of(CollageError::Composition("oom".into())).await,
            500
        );
        assert_eq!(status_of(CollageError::Storage("disk".into())).await, 500);
    }

    #[tokio::test]
    async fn test_not_found() {
        let reply = handle_rejection(reject::custom(NotFoundError)).await.unwrap();
        assert_eq!(reply.into_response().status().as_u16(), 404);
    }
}
