use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct JsonResponse {
    pub status: String,
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success(msg: &str) -> impl IntoResponse {
        (
            StatusCode::OK,
            Json(JsonResponse {
                status: "success".to_string(),
                success: true,
                message: msg.to_string(),
            }),
        )
    }

    pub fn not_found(msg: &str) -> impl IntoResponse {
        (
            StatusCode::NOT_FOUND,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
            }),
        )
    }

    pub fn server_error(msg: &str) -> impl IntoResponse {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
            }),
        )
    }

    pub fn bad_request(msg: &str) -> impl IntoResponse {
        (
            StatusCode::BAD_REQUEST,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;
    use serde_json::from_slice;

    use crate::responses::JsonResponse;

    #[tokio::test]
    async fn test_success_response() {
        let resp = JsonResponse::success("ok").into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: JsonResponse = from_slice(&body).unwrap();
        assert_eq!(json.status, "success");
        assert!(json.success);
        assert_eq!(json.message, "ok");
    }

    #[tokio::test]
    async fn test_bad_request_response() {
        let resp = JsonResponse::bad_request("nope").into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: JsonResponse = from_slice(&body).unwrap();
        assert_eq!(json.status, "error");
        assert!(!json.success);
        assert_eq!(json.message, "nope");
    }
}
