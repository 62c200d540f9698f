use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Request not found: {0}")]
    NotFound(String),

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        /// Captured stdout/stderr of the failing tool, if any
        output: Option<String>,
    },

    #[error("Request {id} is already {status}")]
    Terminal { id: String, status: String },

    #[error("Cancelled")]
    Cancelled,

    /// The service cannot take work right now (e.g. shutting down)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn execution(message: impl Into<String>, output: Option<String>) -> Self {
        Error::Execution {
            message: message.into(),
            output,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_display_omits_output() {
        let err = Error::execution("terraform apply exited with status 1", Some("boom".into()));
        assert_eq!(
            err.to_string(),
            "Execution failed: terraform apply exited with status 1"
        );
    }

    #[test]
    fn test_terminal_error_display() {
        let err = Error::Terminal {
            id: "abc".into(),
            status: "completed".into(),
        };
        assert_eq!(err.to_string(), "Request abc is already completed");
    }
}
