//! Line codec: one JSON object per line in each direction.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use crate::messages::{SessionEvent, SessionRequest};

/// Why an inbound line could not be turned into a request.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The line is not valid UTF-8.
    #[error("Invalid JSON: {0}")]
    Encoding(#[source] std::str::Utf8Error),
    /// The line is not valid JSON.
    #[error("Invalid JSON: {0}")]
    Syntax(#[source] serde_json::Error),
    /// Valid JSON, but not an object.
    #[error("Invalid message: expected a JSON object")]
    NotAnObject,
    /// A known action whose fields have the wrong types.
    #[error("Invalid {action} request: {source}")]
    Fields {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode one inbound line.
///
/// Blank lines yield `Ok(None)` and must be skipped silently by the caller.
/// An unrecognised `action` decodes to [`SessionRequest::Unknown`].
pub fn decode_request(line: &str) -> Result<Option<SessionRequest>, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed).map_err(DecodeError::Syntax)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }

    let action = match value.get("action") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "null".to_string(),
    };

    let request = match action.as_str() {
        "init" => SessionRequest::Init(
            serde_json::from_value(value)
                .map_err(|source| DecodeError::Fields { action: "init", source })?,
        ),
        "generate" => SessionRequest::Generate(
            serde_json::from_value(value)
                .map_err(|source| DecodeError::Fields { action: "generate", source })?,
        ),
        "stop" => SessionRequest::Stop,
        _ => SessionRequest::Unknown { action },
    };

    Ok(Some(request))
}

/// Decode one raw inbound line as read from the pipe.
pub fn decode_request_bytes(line: &[u8]) -> Result<Option<SessionRequest>, DecodeError> {
    let line = std::str::from_utf8(line).map_err(DecodeError::Encoding)?;
    decode_request(line)
}

/// Decode one outbound session line (host side).
pub fn decode_event(line: &str) -> Result<Option<SessionEvent>, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(DecodeError::Syntax)
}

/// Writes messages as single JSON lines, flushing after each one so the
/// reader on the other end of the pipe never waits on buffered output.
#[derive(Debug)]
pub struct LineWriter<W: Write> {
    inner: W,
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Serialize `message`, append `\n`, write it in one call and flush.
    pub fn send<T: Serialize>(&mut self, message: &T) -> io::Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.inner.write_all(&line)?;
        self.inner.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{GenerateRequest, InitRequest};

    #[test]
    fn test_blank_lines_are_skipped() {
        assert!(decode_request("").unwrap().is_none());
        assert!(decode_request("   \t\r\n").unwrap().is_none());
    }

    #[test]
    fn test_malformed_json_reports_parse_failure() {
        let err = decode_request("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Syntax(_)));
        let message = err.to_string();
        assert!(message.starts_with("Invalid JSON: "), "{message}");
        assert!(message.contains("line 1"), "{message}");
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        let err = decode_request_bytes(b"\xff\xfe{}\n").unwrap_err();
        assert!(matches!(err, DecodeError::Encoding(_)));
        assert!(err.to_string().starts_with("Invalid JSON: "));

        assert!(matches!(
            decode_request_bytes(b"{\"action\":\"stop\"}\n"),
            Ok(Some(SessionRequest::Stop))
        ));
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(matches!(
            decode_request("[1, 2]").unwrap_err(),
            DecodeError::NotAnObject
        ));
    }

    #[test]
    fn test_init_defaults_are_left_to_the_session() {
        let request = decode_request(r#"{"action":"init"}"#).unwrap().unwrap();
        assert_eq!(request, SessionRequest::Init(InitRequest::default()));
    }

    #[test]
    fn test_init_fields_and_unknown_fields() {
        let request = decode_request(
            r#" {"action":"init","model_id":"a/b","compression":"8bit","max_length":256,"extra":true} "#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            request,
            SessionRequest::Init(InitRequest {
                model_id: Some("a/b".to_string()),
                compression: Some("8bit".to_string()),
                max_length: Some(256),
            })
        );
    }

    #[test]
    fn test_unvalidated_compression_passes_through() {
        let request = decode_request(r#"{"action":"init","compression":"3bit"}"#)
            .unwrap()
            .unwrap();
        match request {
            SessionRequest::Init(init) => assert_eq!(init.compression.as_deref(), Some("3bit")),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_generate_fields() {
        let request = decode_request(
            r#"{"action":"generate","prompt":"hi","max_new_tokens":8,"temperature":0.2}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            request,
            SessionRequest::Generate(GenerateRequest {
                prompt: "hi".to_string(),
                max_new_tokens: Some(8),
                temperature: Some(0.2),
                max_length: None,
            })
        );
    }

    #[test]
    fn test_wrong_field_type_is_a_field_error() {
        let err = decode_request(r#"{"action":"generate","max_new_tokens":"lots"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Fields { action: "generate", .. }));
    }

    #[test]
    fn test_unknown_and_missing_action() {
        assert_eq!(
            decode_request(r#"{"action":"frobnicate"}"#).unwrap().unwrap(),
            SessionRequest::Unknown {
                action: "frobnicate".to_string()
            }
        );
        assert_eq!(
            decode_request(r#"{"prompt":"x"}"#).unwrap().unwrap(),
            SessionRequest::Unknown {
                action: "null".to_string()
            }
        );
    }

    #[test]
    fn test_writer_emits_one_terminated_line_per_message() {
        let mut writer = LineWriter::new(Vec::new());
        writer.send(&SessionEvent::Ready).unwrap();
        writer
            .send(&SessionEvent::Chunk {
                text: "a\nb".to_string(),
            })
            .unwrap();

        let out = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines, vec![r#"{"type":"ready"}"#, r#"{"type":"chunk","text":"a\nb"}"#]);
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn test_decode_event() {
        assert_eq!(
            decode_event(r#"{"type":"done","text":"abc"}"#).unwrap(),
            Some(SessionEvent::Done {
                text: "abc".to_string()
            })
        );
        assert!(decode_event("").unwrap().is_none());
    }
}
