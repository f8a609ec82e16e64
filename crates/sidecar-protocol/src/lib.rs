//! Wire protocol shared by the sidecar processes and their host.
//!
//! Uses JSON Lines (one JSON object per line) over stdin/stdout pipes.
//! Inbound session messages are tagged by `action`, every outbound
//! message is tagged by `type`.

pub mod codec;
pub mod messages;
pub mod units;

pub use codec::{decode_event, decode_request, decode_request_bytes, DecodeError, LineWriter};
pub use messages::{DownloadEvent, GenerateRequest, InitRequest, SessionEvent, SessionRequest};
pub use units::{format_size, format_speed};
