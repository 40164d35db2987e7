// ── Broadcast wire protocol ──
//
// Line-oriented, pipe-delimited UTF-8. Every line ends in `\n`.
//
//   client -> server   DATA | STATUS | <anything else>
//   server -> client   DATA|<ts>|<device>|<counter>|<status>
//                      STATUS|<ts>|<device>|<status>|<counter>
//                      ERROR|<ts>|<message>
//                      BROADCAST|<device>|<type>|<value>|<unit>|<ts>
//                      MSG|<type>|<data>|<ts>

use bytes::BytesMut;
use chrono::{DateTime, Local};
use tokio_util::codec::Decoder;

use crate::model::DataPoint;

/// Timestamp layout used in every protocol line (local time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Data,
    Status,
    Unknown(String),
}

impl Request {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "DATA" => Self::Data,
            "STATUS" => Self::Status,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

// ── Request framing ──────────────────────────────────────────────

/// One framed line of client input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFrame {
    Line(Request),
    /// A line over the length limit. Its bytes were discarded up to and
    /// including the next newline.
    TooLong,
}

/// Splits client input on `\n` without ever failing on content.
///
/// Invalid UTF-8 is decoded lossily and oversized lines are skipped, so
/// only transport errors end a connection.
#[derive(Debug)]
pub struct RequestCodec {
    max_length: usize,
    discarding: bool,
}

impl RequestCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            discarding: false,
        }
    }
}

impl Decoder for RequestCodec {
    type Item = RequestFrame;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestFrame>, Self::Error> {
        let Some(newline) = buf.iter().position(|b| *b == b'\n') else {
            if buf.len() > self.max_length {
                buf.clear();
                self.discarding = true;
            }
            return Ok(None);
        };

        let line = buf.split_to(newline + 1);
        if std::mem::take(&mut self.discarding) || newline > self.max_length {
            return Ok(Some(RequestFrame::TooLong));
        }
        Ok(Some(RequestFrame::Line(Request::parse(
            &String::from_utf8_lossy(&line[..newline]),
        ))))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<RequestFrame>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }
        let rest = buf.split();
        Ok(Some(RequestFrame::Line(Request::parse(
            &String::from_utf8_lossy(&rest),
        ))))
    }
}

// ── Line builders ────────────────────────────────────────────────

pub fn format_timestamp(ts: &DateTime<Local>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn now() -> String {
    format_timestamp(&Local::now())
}

pub fn data_response(device: &str, counter: u32, status: &str) -> String {
    format!("DATA|{}|{device}|{counter}|{status}\n", now())
}

pub fn status_response(device: &str, status: &str, counter: u32) -> String {
    format!("STATUS|{}|{device}|{status}|{counter}\n", now())
}

pub fn error_response(message: &str) -> String {
    format!("ERROR|{}|{message}\n", now())
}

/// Broadcast line for a data point. Values carry six decimal places.
pub fn broadcast_line(device: &str, point: &DataPoint) -> String {
    format!(
        "BROADCAST|{device}|{}|{:.6}|{}|{}\n",
        point.data_type,
        point.value,
        point.unit,
        format_timestamp(&point.timestamp)
    )
}

pub fn message_line(kind: &str, data: &str) -> String {
    format!("MSG|{kind}|{data}|{}\n", now())
}
