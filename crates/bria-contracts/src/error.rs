use thiserror::Error;

#[derive(Error, Debug)]
pub enum BriaError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{operation} request failed{}: {detail}", status_suffix(.status))]
    Transport {
        operation: String,
        status: Option<u16>,
        detail: String,
    },

    #[error("{operation} returned an invalid payload: {detail}")]
    InvalidResponse { operation: String, detail: String },

    #[error("{feature} is unavailable: missing {missing}. Install with: {install_hint}")]
    Unavailable {
        feature: String,
        missing: String,
        install_hint: String,
    },

    #[error("local runtime failed: {0}")]
    LocalRuntime(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BriaError>;

impl BriaError {
    pub fn config(message: impl Into<String>) -> Self {
        BriaError::Config(message.into())
    }

    pub fn transport(operation: &str, status: Option<u16>, detail: impl Into<String>) -> Self {
        BriaError::Transport {
            operation: operation.to_string(),
            status,
            detail: detail.into(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, BriaError::Config(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BriaError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}
