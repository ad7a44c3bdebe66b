/// HTTP surface of broadcast-service
///
/// Thin actix-web routes over the services; each module registers its
/// own scope.
use serde::{Deserialize, Serialize};

pub mod analytics;
pub mod ingest;
pub mod notifications;
pub mod social;
pub mod streams;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}
