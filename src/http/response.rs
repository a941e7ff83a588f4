use crate::prelude::*;
use serde::Serialize;

/// An application-level error carried next to the HTTP status: the JSON body
/// is `{"status": <soft>, "message": <why>}` and `soft` may differ from the
/// code on the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftError {
    pub http: u16,
    pub soft: u16,
    pub why: &'static str,
}

impl SoftError {
    pub fn new(http: u16, soft: u16, why: &'static str) -> SoftError {
        SoftError { http, soft, why }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: u16,
    message: &'a str,
}

pub fn pack_error(softcode: u16, why: &str) -> Vec<u8> {
    serde_json::to_vec(&ErrorBody {
        status: softcode,
        message: why,
    })
    .unwrap_or_else(|_| b"{}".to_vec())
}

pub fn error_reply(version: HttpVersion, err: &SoftError) -> Vec<u8> {
    let payload = pack_error(err.soft, err.why);
    let mut reply = format!(
        "HTTP/{}.{} {:03} Error\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        version.major,
        version.minor,
        err.http,
        payload.len()
    )
    .into_bytes();
    reply.extend_from_slice(&payload);
    reply
}

pub fn success_reply(version: HttpVersion) -> Vec<u8> {
    format!(
        "HTTP/{}.{} 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
        version.major, version.minor
    )
    .into_bytes()
}

pub fn stream_reply(version: HttpVersion) -> Vec<u8> {
    format!(
        "HTTP/{}.{} 200 OK\r\nConnection: close\r\nTransfer-Encoding: chunked\r\n\r\n",
        version.major, version.minor
    )
    .into_bytes()
}

pub fn continue_reply(version: HttpVersion) -> Vec<u8> {
    format!(
        "HTTP/{}.{} 100 Continue\r\nContent-Length: 0\r\n\r\n",
        version.major, version.minor
    )
    .into_bytes()
}

/// One body fragment framed as one HTTP chunk.
pub fn chunk_frame(data: &[u8]) -> Vec<u8> {
    let mut frame = format!("{:x}\r\n", data.len()).into_bytes();
    frame.extend_from_slice(data);
    frame.extend_from_slice(b"\r\n");
    frame
}

pub const END_OF_STREAM: &[u8] = b"0\r\n\r\n";
