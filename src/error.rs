use crate::cache::artifacts::OutputFormat;

pub type PreviewResult<T> = Result<T, PreviewError>;

#[derive(thiserror::Error, Debug)]
pub enum PreviewError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("encoder init error: {0}")]
    EncoderInit(String),

    #[error("{format} encode error: {message}")]
    Encode {
        format: OutputFormat,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PreviewError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    pub fn encoder_init(msg: impl Into<String>) -> Self {
        Self::EncoderInit(msg.into())
    }

    pub fn encode(format: OutputFormat, msg: impl Into<String>) -> Self {
        Self::Encode {
            format,
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            PreviewError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            PreviewError::capture("x")
                .to_string()
                .contains("capture error:")
        );
        assert!(
            PreviewError::encoder_init("x")
                .to_string()
                .contains("encoder init error:")
        );
        assert!(
            PreviewError::encode(OutputFormat::Video, "x")
                .to_string()
                .contains("video encode error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = PreviewError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
