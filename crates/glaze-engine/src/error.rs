use thiserror::Error;

/// Failure taxonomy for the whole engine. None of these escape a
/// `SessionController` action boundary; the controller converts every
/// failure into a chat message plus a dismissible error field.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad or missing user input: empty prompt, non-image upload,
    /// non-positive dimensions.
    #[error("{0}")]
    Validation(String),

    /// A remote image URL was unreachable or answered non-2xx.
    #[error("failed fetching {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Malformed base64 or bytes the image decoder cannot read.
    #[error("image decode failed: {0}")]
    Decode(String),

    /// A string that is neither an http(s) URL, a data URI, nor an
    /// existing file path.
    #[error("unsupported image source: {0}")]
    UnsupportedSource(String),

    /// The collaborator produced no usable payload.
    #[error("{0}")]
    Ai(String),

    /// Generic network or local I/O failure.
    #[error("{0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::EngineError;

    #[test]
    fn fetch_error_names_the_url() {
        let err = EngineError::Fetch {
            url: "https://example.com/a.png".to_string(),
            reason: "status 404".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed fetching https://example.com/a.png: status 404"
        );
    }

    #[test]
    fn validation_error_is_the_bare_message() {
        let err = EngineError::Validation("No prompt was provided".to_string());
        assert_eq!(err.to_string(), "No prompt was provided");
    }
}
