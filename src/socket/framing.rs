//! Wire codec for the extension protocol.
//!
//! Three message shapes exist on the wire:
//!
//! ```text
//! client → bridge   <policy-file-request/>\0              (raw sentinel)
//! bridge → client   <cross-domain-policy>...\n\0          (policy reply)
//! client → bridge   {"method": "...", "params": [...]}    (command frame)
//! bridge → client   {"method":"update","params":[[n,v],...]}\n
//! ```
//!
//! The inbound splitter is selected by [`Framing`](crate::config::Framing):
//! chunk framing takes every socket read as one unit, [`LineDecoder`]
//! buffers bytes until a newline.

use serde::Serialize;
use serde_json::Value;

use crate::constants::{POLICY_REQUEST, UPDATE_METHOD};
use crate::error::BridgeError;

/// A decoded command frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFrame {
    /// Method name, matched exactly against the method table.
    pub method: String,
    /// Positional arguments.
    pub params: Vec<Value>,
}

impl CommandFrame {
    /// Build a frame from a decoded JSON value.
    ///
    /// A missing or `null` `params` is treated as empty. Anything that is
    /// not an object with a string `method` and array `params` is reported
    /// the same way as an unregistered method.
    pub fn from_value(value: Value) -> Result<Self, BridgeError> {
        let mut obj = match value {
            Value::Object(obj) => obj,
            other => {
                return Err(BridgeError::UnknownMethod {
                    method: other.to_string(),
                })
            }
        };

        let method = match obj.remove("method") {
            Some(Value::String(method)) => method,
            other => {
                return Err(BridgeError::UnknownMethod {
                    method: other.map_or_else(String::new, |v| v.to_string()),
                })
            }
        };

        let params = match obj.remove("params") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(params)) => params,
            Some(_) => return Err(BridgeError::UnknownMethod { method }),
        };

        Ok(Self { method, params })
    }
}

/// One unit of inbound traffic after framing.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A policy-file request. Answered with [`policy_response`].
    PolicyRequest,
    /// A JSON value to be turned into a [`CommandFrame`].
    Json(Value),
}

/// Whether `text` carries a policy-file request anywhere in it.
pub fn is_policy_request(text: &str) -> bool {
    text.contains(POLICY_REQUEST)
}

/// The NUL-terminated cross-domain policy document for `port`.
pub fn policy_response(port: u16) -> String {
    format!(
        concat!(
            "<cross-domain-policy>\n",
            "  <allow-access-from domain=\"*\" to-ports=\"{port}\"/>\n",
            "</cross-domain-policy>\n\0",
        ),
        port = port
    )
}

/// Decode one chunk of text as a single JSON value.
pub fn decode_json(text: &str) -> Result<Value, BridgeError> {
    serde_json::from_str(text).map_err(|source| BridgeError::Parse {
        raw: text.to_string(),
        source,
    })
}

/// Classify a chunk in chunk framing: policy request or one JSON value.
pub fn decode_chunk(text: &str) -> Result<Inbound, BridgeError> {
    if is_policy_request(text) {
        return Ok(Inbound::PolicyRequest);
    }
    decode_json(text).map(Inbound::Json)
}

#[derive(Serialize)]
struct UpdateFrame<'a> {
    method: &'static str,
    params: &'a [(String, Value)],
}

/// Encode a poll reply: the update frame followed by `\n`.
pub fn encode_update(entries: &[(String, Value)]) -> Vec<u8> {
    let frame = UpdateFrame {
        method: UPDATE_METHOD,
        params: entries,
    };
    // Serializing `Value`s and strings into a Vec cannot fail.
    let mut buf = serde_json::to_vec(&frame).unwrap_or_default();
    buf.push(b'\n');
    buf
}

/// Newline-delimited decoder for line framing.
///
/// Accumulates bytes and yields each complete line as an [`Inbound`]
/// result, keeping any partial trailing line for the next call.
#[derive(Debug)]
pub struct LineDecoder {
    buf: Vec<u8>,
    max_line: usize,
}

impl LineDecoder {
    /// Create a decoder that drops partial lines longer than `max_line`.
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
        }
    }

    /// Feed bytes, returning every complete line decoded in order.
    ///
    /// Blank lines are skipped. A line that fails to parse yields an `Err`
    /// entry without affecting its neighbours.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Result<Inbound, BridgeError>> {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
            if text.is_empty() {
                continue;
            }
            out.push(decode_chunk(text));
        }

        if self.buf.len() > self.max_line {
            log::warn!(
                "[Socket] Dropping {} buffered bytes with no newline",
                self.buf.len()
            );
            self.buf.clear();
            out.push(Err(BridgeError::LineTooLong {
                limit: self.max_line,
            }));
        }

        out
    }

    /// Whether a partial line is buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_policy_response_exact_text() {
        assert_eq!(
            policy_response(12345),
            concat!(
                "<cross-domain-policy>\n",
                "  <allow-access-from domain=\"*\" to-ports=\"12345\"/>\n",
                "</cross-domain-policy>\n\0",
            )
        );
    }

    #[test]
    fn test_policy_request_wins_over_json() {
        let text = r#"{"method":"poll","params":[]}<policy-file-request/>"#;
        assert_eq!(decode_chunk(text).unwrap(), Inbound::PolicyRequest);
        assert_eq!(
            decode_chunk("<policy-file-request/>\0").unwrap(),
            Inbound::PolicyRequest
        );
    }

    #[test]
    fn test_decode_chunk_json() {
        let inbound = decode_chunk("{\"method\":\"write\",\"params\":[\"hello\"]}\n").unwrap();
        assert_eq!(inbound, Inbound::Json(json!({"method": "write", "params": ["hello"]})));
    }

    #[test]
    fn test_decode_chunk_malformed() {
        let err = decode_chunk("{\"method\": ").unwrap_err();
        assert!(matches!(err, BridgeError::Parse { .. }));
    }

    #[test]
    fn test_two_frames_in_one_chunk_is_a_parse_error() {
        let err = decode_chunk("{\"method\":\"a\"}{\"method\":\"b\"}").unwrap_err();
        assert!(matches!(err, BridgeError::Parse { .. }));
    }

    #[test]
    fn test_command_frame_from_value() {
        let frame =
            CommandFrame::from_value(json!({"method": "noteOn", "params": [60, 100, 1]})).unwrap();
        assert_eq!(frame.method, "noteOn");
        assert_eq!(frame.params, vec![json!(60), json!(100), json!(1)]);
    }

    #[test]
    fn test_command_frame_missing_params_is_empty() {
        let frame = CommandFrame::from_value(json!({"method": "poll"})).unwrap();
        assert!(frame.params.is_empty());
        let frame = CommandFrame::from_value(json!({"method": "poll", "params": null})).unwrap();
        assert!(frame.params.is_empty());
    }

    #[test]
    fn test_command_frame_structural_errors() {
        for bad in [
            json!([1, 2]),
            json!({"params": []}),
            json!({"method": 7, "params": []}),
            json!({"method": "write", "params": "hello"}),
        ] {
            let err = CommandFrame::from_value(bad.clone()).unwrap_err();
            assert!(
                matches!(err, BridgeError::UnknownMethod { .. }),
                "expected UnknownMethod for {bad}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_encode_update() {
        let bytes = encode_update(&[("PI".to_string(), json!(3.141_592_653_6))]);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "{\"method\":\"update\",\"params\":[[\"PI\",3.1415926536]]}\n"
        );
        assert_eq!(encode_update(&[]), b"{\"method\":\"update\",\"params\":[]}\n");
    }

    #[test]
    fn test_line_decoder_partial_and_coalesced() {
        let mut decoder = LineDecoder::new(1024);
        assert!(decoder.feed(b"{\"method\":\"po").is_empty());
        assert!(decoder.has_partial());

        let out = decoder.feed(b"ll\"}\n{\"method\":\"write\",\"params\":[1]}\n{\"meth");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), &Inbound::Json(json!({"method": "poll"})));
        assert_eq!(
            out[1].as_ref().unwrap(),
            &Inbound::Json(json!({"method": "write", "params": [1]}))
        );
        assert!(decoder.has_partial());
    }

    #[test]
    fn test_line_decoder_skips_blank_and_isolates_bad_lines() {
        let mut decoder = LineDecoder::new(1024);
        let out = decoder.feed(b"\n\r\nnot json\n{\"method\":\"poll\"}\r\n");
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(BridgeError::Parse { .. })));
        assert!(out[1].is_ok());
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_line_decoder_drops_oversized_partial() {
        let mut decoder = LineDecoder::new(8);
        let out = decoder.feed(b"0123456789");
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(BridgeError::LineTooLong { limit: 8 })));
        assert!(!decoder.has_partial());
    }
}
