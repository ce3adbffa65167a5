//! Backend wire formats.
//!
//! Two formats cross the backend socket:
//!
//! - **client to server**: newline-delimited JSON, one [`Envelope`] per line
//!   ([`encode_frame`] / [`decode_frame`])
//! - **server to client**: a human-readable broadcast line,
//!   `<marker><timestamp> [<sender>]: <content>`, which the gateway parses
//!   back into an envelope for browser delivery ([`format_line`] /
//!   [`parse_line`])
//!
//! The line parser is a staged matcher: area marker, then the fixed-width
//! timestamp, then the bracketed sender. Any stage missing degrades the whole
//! line into a system-originated chat message stamped "now" instead of
//! failing — backend output is display text first and protocol second, so
//! fragility here is tolerated by design.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::envelope::{Area, Envelope, Operation, SYSTEM_SENDER};
use crate::error::ProtocolError;

pub const MARKER_PUBLIC: &str = "【public】";
pub const MARKER_GROUP: &str = "【group】";
pub const MARKER_PRIVATE: &str = "【private】";

/// Timestamp layout inside a broadcast line, always UTC.
pub const TIMESTAMP_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMP_LEN: usize = 19;

/// The visible marker for an area.
pub fn marker(area: Area) -> &'static str {
    match area {
        Area::Public => MARKER_PUBLIC,
        Area::Group => MARKER_GROUP,
        Area::Private => MARKER_PRIVATE,
    }
}

/// Serialize an envelope as one newline-terminated JSON frame.
pub fn encode_frame(env: &Envelope) -> Result<String, ProtocolError> {
    let mut frame = serde_json::to_string(env)?;
    frame.push('\n');
    Ok(frame)
}

/// Parse one frame (with or without its trailing newline).
pub fn decode_frame(line: &str) -> Result<Envelope, ProtocolError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Render a broadcast line. Everything the routing engine emits — chat
/// fan-out, join/leave notices, replies — goes through this one format.
pub fn format_line(area: Area, timestamp: i64, sender: &str, content: &str) -> String {
    let ts = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    format!(
        "{}{} [{}]: {}",
        marker(area),
        ts.format(TIMESTAMP_LAYOUT),
        sender,
        content
    )
}

/// Reconstruct an envelope from a broadcast line.
///
/// The marker selects area and operation (unknown markers default to the
/// public screen). If the timestamp/sender stages fail, the entire line
/// becomes system-originated chat content with the current time.
pub fn parse_line(line: &str) -> Envelope {
    let line = line.trim_end_matches(['\r', '\n']);

    let (area, op, rest) = if let Some(rest) = line.strip_prefix(MARKER_PUBLIC) {
        (Area::Public, Operation::Chat, rest)
    } else if let Some(rest) = line.strip_prefix(MARKER_GROUP) {
        (Area::Group, Operation::GroupChat, rest)
    } else if let Some(rest) = line.strip_prefix(MARKER_PRIVATE) {
        (Area::Private, Operation::PrivateChat, rest)
    } else {
        (Area::Public, Operation::Chat, line)
    };

    match parse_stamped(rest) {
        Some((timestamp, sender, content)) => {
            let mut env = Envelope::new(sender, op, content);
            env.area = area;
            env.timestamp = timestamp;
            env
        }
        None => {
            let mut env = Envelope::new(SYSTEM_SENDER, op, line);
            env.area = area;
            env
        }
    }
}

/// `<timestamp> [<sender>]: <content>` after the marker has been stripped.
fn parse_stamped(rest: &str) -> Option<(i64, String, String)> {
    let ts_str = rest.get(..TIMESTAMP_LEN)?;
    let tail = rest.get(TIMESTAMP_LEN..)?;

    let naive = NaiveDateTime::parse_from_str(ts_str, TIMESTAMP_LAYOUT).ok()?;
    let timestamp = naive.and_utc().timestamp();

    let tail = tail.strip_prefix(" [")?;
    let (sender, content) = tail.split_once("]: ")?;
    if sender.is_empty() {
        return None;
    }

    Some((timestamp, sender.to_string(), content.to_string()))
}
