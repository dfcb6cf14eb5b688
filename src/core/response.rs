use serde::{Deserialize, Serialize};

/// `{success, data?, error?}` envelope handed to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ActionResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for ActionResponse<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}
