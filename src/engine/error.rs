//! Renderer error types
//!
//! Unified error handling for both renderer backends. Only load failures
//! cross the renderer boundary (as `Failed` events after mount); everything
//! else is recovered locally by the owning renderer.

use thiserror::Error;

/// Unified renderer error type
#[derive(Debug, Error)]
pub enum RenderError {
    /// Container bytes do not match any supported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Corrupt or unreadable container
    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    /// Failed to parse document structure
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Page or section index out of range
    #[error("Item not found: index {0}")]
    ItemNotFound(usize),

    /// Failed to rasterize a page
    #[error("Render error: {0}")]
    RenderError(String),

    /// Renderer used outside its mounted/opened lifecycle window
    #[error("Renderer not ready: {0}")]
    NotReady(&'static str),

    /// Operation timed out (treated as a load failure)
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Whether this error is a load failure that must surface as a `Failed`
    /// event rather than being recovered locally.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            RenderError::UnsupportedFormat(_)
                | RenderError::InvalidContainer(_)
                | RenderError::ParseError(_)
                | RenderError::Timeout(_)
                | RenderError::Io(_)
        )
    }
}

/// Result type alias for renderer operations
pub type Result<T> = std::result::Result<T, RenderError>;

impl From<zip::result::ZipError> for RenderError {
    fn from(err: zip::result::ZipError) -> Self {
        RenderError::InvalidContainer(err.to_string())
    }
}

impl From<quick_xml::Error> for RenderError {
    fn from(err: quick_xml::Error) -> Self {
        RenderError::ParseError(err.to_string())
    }
}
