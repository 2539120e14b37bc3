//! Best-effort text recovery from `message.attributedBody`.
//!
//! The column holds a serialized rich-text object graph. Rather than
//! implementing the whole format, the scanner looks for the embedded string
//! class marker and reads the length-prefixed payload that follows it.
//! Anything unexpected ends the scan; decoding never fails.

const STRING_MARKER: &[u8] = b"NSString";
/// Bytes between the end of the marker and the length prefix.
const HEADER_LEN: usize = 5;
/// Length byte announcing a two-byte little-endian length.
const WIDE_LENGTH: u8 = 0x81;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekMarker { from: usize },
    Header { marker_end: usize },
    Length { at: usize },
    Payload { start: usize, len: usize },
    Done,
}

/// All text fragments recovered from `data`, in order.
pub fn extract_fragments(data: &[u8]) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut state = State::SeekMarker { from: 0 };

    loop {
        state = match state {
            State::SeekMarker { from } => match find(data, STRING_MARKER, from) {
                Some(idx) => State::Header { marker_end: idx + STRING_MARKER.len() },
                None => State::Done,
            },
            State::Header { marker_end } => {
                let at = marker_end + HEADER_LEN;
                if at >= data.len() {
                    State::Done
                } else {
                    State::Length { at }
                }
            }
            State::Length { at } => match data.get(at) {
                Some(&WIDE_LENGTH) => match (data.get(at + 1), data.get(at + 2)) {
                    (Some(&lo), Some(&hi)) => State::Payload {
                        start: at + 3,
                        len: u16::from_le_bytes([lo, hi]) as usize,
                    },
                    _ => State::Done,
                },
                Some(&len) => State::Payload { start: at + 1, len: len as usize },
                None => State::Done,
            },
            State::Payload { start, len } => match data.get(start..start + len) {
                Some(payload) => {
                    if let Some(text) = accept(payload) {
                        fragments.push(text);
                    }
                    State::SeekMarker { from: start + len }
                }
                None => State::Done,
            },
            State::Done => break,
        };
    }

    fragments
}

/// Recovered text joined with single spaces, or an empty string.
pub fn decode(data: &[u8]) -> String {
    extract_fragments(data).join(" ")
}

fn accept(payload: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(payload).ok()?;
    if text.contains('\0') {
        return None;
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}
