use serde::{Deserialize, Serialize};

// -- Admin --

/// Body returned by every admin endpoint, success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdminResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_omits_message_field() {
        let body = serde_json::to_value(AdminResponse::failed("nope")).unwrap();
        assert_eq!(body, serde_json::json!({ "success": false, "error": "nope" }));
    }

    #[test]
    fn success_omits_error_field() {
        let body = serde_json::to_value(AdminResponse::ok("done")).unwrap();
        assert_eq!(body, serde_json::json!({ "success": true, "message": "done" }));
    }
}
