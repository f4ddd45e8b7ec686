//! The `{ success, data, error }` wrapper used by every API response.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                message: message.into(),
                code: Some(code.to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_envelope_shape() {
        let env = Envelope::<()>::failure("CONFLICT", "already decided");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(
            json,
            json!({ "success": false, "error": { "message": "already decided", "code": "CONFLICT" } })
        );
    }

    #[test]
    fn test_error_code_is_optional_on_input() {
        let env: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"success":false,"error":{"message":"boom"}}"#).unwrap();
        let err = env.error.unwrap();
        assert_eq!(err.message, "boom");
        assert!(err.code.is_none());
        assert!(env.data.is_none());
    }
}
