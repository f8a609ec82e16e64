use sidecar_protocol::DecodeError;

/// Every failure the sidecar can report to its host.
///
/// All variants except `Io` become exactly one outbound `error` message;
/// `Io` means the pipe itself is gone and the process should wind down.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    /// Malformed inbound line.
    #[error(transparent)]
    Protocol(#[from] DecodeError),

    /// Unknown action, or an action attempted in the wrong phase.
    #[error("{0}")]
    Validation(String),

    #[error("Failed to load model: {0:#}")]
    Load(anyhow::Error),

    #[error("Generation failed: {0:#}")]
    Generate(anyhow::Error),

    #[error("{0:#}")]
    Download(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SidecarError {
    /// True for failures raised by the model/download collaborator.
    pub fn is_collaborator(&self) -> bool {
        matches!(self, Self::Load(_) | Self::Generate(_) | Self::Download(_))
    }
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_messages_carry_context() {
        let err = SidecarError::Load(anyhow::anyhow!("out of memory"));
        assert_eq!(err.to_string(), "Failed to load model: out of memory");
        assert!(err.is_collaborator());

        let err = SidecarError::Generate(anyhow::anyhow!("device lost"));
        assert_eq!(err.to_string(), "Generation failed: device lost");
    }

    #[test]
    fn test_collaborator_messages_include_the_cause_chain() {
        let cause = anyhow::anyhow!("CUDA out of memory").context("llama.cpp could not load m");
        let err = SidecarError::Load(cause);
        assert_eq!(
            err.to_string(),
            "Failed to load model: llama.cpp could not load m: CUDA out of memory"
        );

        let cause = anyhow::anyhow!("connection refused").context("Failed to download model.safetensors");
        let err = SidecarError::Download(cause);
        assert_eq!(
            err.to_string(),
            "Failed to download model.safetensors: connection refused"
        );
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = SidecarError::Validation("Unknown action: frobnicate".to_string());
        assert_eq!(err.to_string(), "Unknown action: frobnicate");
        assert!(!err.is_collaborator());
    }

    #[test]
    fn test_protocol_error_is_transparent() {
        let decode = sidecar_protocol::decode_request("{not json").unwrap_err();
        let err = SidecarError::from(decode);
        assert!(err.to_string().starts_with("Invalid JSON: "));

        let decode = sidecar_protocol::decode_request_bytes(b"\xff\xfe\n").unwrap_err();
        let err = SidecarError::from(decode);
        assert!(matches!(err, SidecarError::Protocol(_)));
        assert!(!err.is_collaborator());
        assert!(err.to_string().starts_with("Invalid JSON: "));
    }

    #[test]
    fn test_panic_message_variants() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "Unknown panic");
    }
}
