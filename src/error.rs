use thiserror::Error;

pub type SgResult<T> = Result<T, SgError>;

#[derive(Debug, Error)]
pub enum SgError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no usable input: {0}")]
    NoInput(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("caption parse failure: {0}")]
    Parse(String),
}

impl SgError {
    /// Stable, unique, machine-readable error code for every variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "SG-IO",
            Self::Json(_) => "SG-JSON",
            Self::NoInput(_) => "SG-NO-INPUT",
            Self::InvalidRequest(_) => "SG-INVALID-REQUEST",
            Self::Storage(_) => "SG-STORAGE",
            Self::Parse(_) => "SG-PARSE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SgError;

    #[test]
    fn error_codes_are_unique_and_prefixed() {
        let all_errors: Vec<SgError> = vec![
            SgError::Io(std::io::Error::other("disk fail")),
            SgError::Json(serde_json::from_str::<serde_json::Value>("{").unwrap_err()),
            SgError::NoInput("empty file".to_owned()),
            SgError::InvalidRequest("bad flag".to_owned()),
            SgError::Storage("torn write".to_owned()),
            SgError::Parse("no marker".to_owned()),
        ];

        let mut seen = std::collections::HashSet::new();
        for error in &all_errors {
            let code = error.error_code();
            assert!(code.starts_with("SG-"), "code must start with SG-: {code}");
            assert!(seen.insert(code), "duplicate error_code: {code}");
        }
    }

    #[test]
    fn display_messages_carry_detail() {
        let cases: Vec<(SgError, &str)> = vec![
            (SgError::NoInput("items.txt missing".to_owned()), "items.txt"),
            (SgError::Storage("status.json locked".to_owned()), "status.json"),
            (SgError::Parse("no caption format marker".to_owned()), "marker"),
        ];
        for (error, expected) in cases {
            let text = error.to_string();
            assert!(text.contains(expected), "expected `{expected}` in: {text}");
        }
    }

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let sg_err: SgError = io_err.into();
        assert!(matches!(sg_err, SgError::Io(_)));
        assert!(sg_err.to_string().contains("file not found"));
    }

    #[test]
    fn sg_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<SgError>();
        assert_sync::<SgError>();
    }
}
