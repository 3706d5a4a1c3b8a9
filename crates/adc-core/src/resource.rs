use crate::{NavModule, NavSubmodule};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("session rejected by server")]
    Unauthorized,
    #[error("request failed with status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("invalid resource path segment: {0}")]
    InvalidPath(String),
}

impl ResourceError {
    /// True when the server no longer accepts the current credential.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ResourceError::Unauthorized)
    }
}

/// Read side of the remote API that the navigation tree depends on.
#[async_trait]
pub trait ResourceLayer: Send + Sync {
    async fn list_modules(&self) -> Result<Vec<NavModule>, ResourceError>;

    async fn list_submodules(&self, module_id: &str) -> Result<Vec<NavSubmodule>, ResourceError>;
}
