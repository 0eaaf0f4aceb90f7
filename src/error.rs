use std::path::PathBuf;

use thiserror::Error;

pub type ZbResult<T> = Result<T, ZbError>;

#[derive(Debug, Error)]
pub enum ZbError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("missing command `{command}` on PATH")]
    ConverterMissing { command: String },

    #[error("source unreadable: {0}")]
    SourceUnreadable(PathBuf),

    #[error("conversion failed: `{command}` (status: {status}){stderr_suffix}")]
    ConversionFailed {
        command: String,
        status: i32,
        stderr_suffix: String,
    },

    #[error("duration probe failed for `{path}`: {reason}")]
    ProbeFailed { path: PathBuf, reason: String },

    #[error("unsupported wav format: {0}")]
    UnsupportedWavFormat(String),

    #[error("recogniser init failed: {0}")]
    RecognizerInit(String),

    #[error("recogniser crashed on block {block}: {reason}")]
    RecognizerCrashed { block: usize, reason: String },

    #[error("vad model not found: {0}")]
    VadModelMissing(PathBuf),

    #[error("vad init failed: {0}")]
    VadInitFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl From<rusqlite::Error> for ZbError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl ZbError {
    #[must_use]
    pub fn from_converter_failure(command: String, status: i32, stderr: String) -> Self {
        let trimmed = stderr.trim();
        let stderr_suffix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("; stderr: {trimmed}")
        };
        Self::ConversionFailed {
            command,
            status,
            stderr_suffix,
        }
    }

    /// True for errors that terminate a job without entering the retry budget.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::ZbError;

    #[test]
    fn converter_failure_with_empty_stderr_omits_suffix() {
        let err = ZbError::from_converter_failure("ffmpeg -i in.mp3".to_owned(), 1, String::new());
        let text = err.to_string();
        assert!(text.contains("ffmpeg -i in.mp3"));
        assert!(text.contains("status: 1"));
        assert!(!text.contains("stderr"));
    }

    #[test]
    fn converter_failure_trims_stderr() {
        let err = ZbError::from_converter_failure(
            "ffmpeg -i in.mp3".to_owned(),
            1,
            "  no such filter  \n".to_owned(),
        );
        assert!(err.to_string().contains("stderr: no such filter"));
    }

    #[test]
    fn cancelled_is_recognised() {
        assert!(ZbError::Cancelled("shutdown".to_owned()).is_cancelled());
        assert!(!ZbError::Storage("locked".to_owned()).is_cancelled());
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<ZbError>();
        assert_sync::<ZbError>();
    }
}
