//! Uniform response envelope returned to calling endpoints.

use serde::{Deserialize, Serialize};

/// `{ success, data | errorMsg }` envelope.
///
/// Failures are ordinary values of this type so endpoints never special-case
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            error_msg: None,
            data: Some(data),
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            error_msg: None,
            data: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_msg: Some(message.into()),
            data: None,
        }
    }
}
