// ViewerContext - the acting user for a request
// Identity is established upstream; this layer only carries the resolved user id.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

pub const VIEWER_HEADER: &str = "x-viewer-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerContext {
    pub user_id: String,
}

impl ViewerContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        ViewerContext {
            user_id: user_id.into(),
        }
    }
}

impl<S> FromRequestParts<S> for ViewerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let viewer = parts
            .headers
            .get(VIEWER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ViewerContext::new)
            .ok_or_else(|| {
                AppError::InvalidArgument(format!("missing {} header", VIEWER_HEADER))
            });

        async move { viewer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_extracts_viewer_from_header() {
        let (mut parts, _) = Request::builder()
            .header(VIEWER_HEADER, " u1 ")
            .body(())
            .unwrap()
            .into_parts();
        let viewer = ViewerContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(viewer.user_id, "u1");
    }

    #[tokio::test]
    async fn test_missing_header_is_rejected() {
        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();
        let err = ViewerContext::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }
}
