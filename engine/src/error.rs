//! Central error handling for the GI pipeline
//!
//! Build-time failures (shader parse/validation, device creation, bad config)
//! surface as `GiError`. Numeric edge cases inside the passes never do: they
//! resolve to validity/miss states and zero or pass-through outputs.

/// Centralized error type for all GI operations.
#[derive(thiserror::Error, Debug)]
pub enum GiError {
    /// WGSL parse or validation failure. Fatal, never retried.
    #[error("shader '{label}' failed to compile:\n{diagnostic}")]
    ShaderCompile { label: String, diagnostic: String },

    #[error("Device error: {0}")]
    Device(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page table error: {0}")]
    PageTable(String),

    #[error("Resource error: {0}")]
    Resource(String),
}

impl GiError {
    pub fn device<T: ToString>(msg: T) -> Self {
        GiError::Device(msg.to_string())
    }

    pub fn config<T: ToString>(msg: T) -> Self {
        GiError::Config(msg.to_string())
    }

    pub fn resource<T: ToString>(msg: T) -> Self {
        GiError::Resource(msg.to_string())
    }

    /// True for failures caused by malformed shader composition.
    pub fn is_shader_compile(&self) -> bool {
        matches!(self, GiError::ShaderCompile { .. })
    }
}

/// Result type alias for GI operations
pub type GiResult<T> = Result<T, GiError>;
