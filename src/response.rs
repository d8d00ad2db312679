use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct Meta {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub total: Option<i64>,
}

impl Meta {
    pub fn new(page: i64, per_page: i64, total: i64) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
            total: Some(total),
        }
    }

    pub fn empty() -> Self {
        Self {
            page: None,
            per_page: None,
            total: None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: Option<T>,
    pub meta: Option<Meta>,
}

/// Payload of every error response.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct ErrorBody {
    pub error: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T, meta: Option<Meta>) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
            meta,
        }
    }
}

impl ApiResponse<ErrorBody> {
    /// Error envelope: the message is repeated under `data.error`.
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            data: Some(ErrorBody {
                error: message.clone(),
            }),
            message,
            meta: Some(Meta::empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_repeats_the_message() {
        let body = serde_json::to_value(ApiResponse::error("Cart is empty")).unwrap();
        assert_eq!(body["message"], "Cart is empty");
        assert_eq!(body["data"]["error"], "Cart is empty");
        assert!(body["meta"]["total"].is_null());
    }

    #[test]
    fn paged_meta_carries_counts() {
        let body = serde_json::to_value(ApiResponse::success(
            "OK",
            vec![1, 2],
            Some(Meta::new(2, 10, 12)),
        ))
        .unwrap();
        assert_eq!(body["data"], serde_json::json!([1, 2]));
        assert_eq!(body["meta"]["page"], 2);
        assert_eq!(body["meta"]["total"], 12);
    }
}
