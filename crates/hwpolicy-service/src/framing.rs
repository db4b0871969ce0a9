//! Request framing for the stdio and HTTP transports.
//!
//! Sizes are checked against [`MAX_BODY_BYTES`] and [`MAX_HEADER_BYTES`]
//! before anything is buffered, so a peer can never make the daemon allocate
//! more than the caps by declaring a large length.

use std::collections::HashMap;
use std::io::{self, BufRead, Read, Write};

use serde_json::Value;

/// Largest request body accepted on either transport.
pub const MAX_BODY_BYTES: u64 = 1024 * 1024;
/// Largest HTTP request head (request line plus headers), and the longest
/// single header line on a framed stdio request.
pub const MAX_HEADER_BYTES: u64 = 16 * 1024;

/// One unit read off a transport.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound<T> {
    Message(T),
    /// `declared` is the advertised length; `None` for an unterminated line.
    TooLarge { declared: Option<u64> },
    Malformed(String),
}

/// How a stdio request was delimited. Replies use the same framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    Line,
    ContentLength,
}

#[derive(Debug)]
pub(crate) struct StdioFrame {
    pub(crate) framing: Framing,
    pub(crate) body: Inbound<Vec<u8>>,
}

/// Splits stdin into requests. A line starting with `Content-Length:` or
/// `Content-Type:` opens a header block; anything else is one JSON request.
pub(crate) struct StdioReader<R> {
    inner: R,
}

impl<R: BufRead> StdioReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner }
    }

    /// `Ok(None)` at end of input.
    pub(crate) fn next_frame(&mut self) -> io::Result<Option<StdioFrame>> {
        loop {
            let line = match read_capped_line(&mut self.inner, MAX_BODY_BYTES)? {
                CappedLine::Eof => return Ok(None),
                CappedLine::Overlong => {
                    return Ok(Some(StdioFrame {
                        framing: Framing::Line,
                        body: Inbound::TooLarge { declared: None },
                    }))
                }
                CappedLine::Text(line) => line,
            };
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            if !opens_header_block(trimmed) {
                return Ok(Some(StdioFrame {
                    framing: Framing::Line,
                    body: Inbound::Message(trimmed.to_vec()),
                }));
            }
            let body = self.read_framed_body(trimmed.to_vec())?;
            return Ok(Some(StdioFrame {
                framing: Framing::ContentLength,
                body,
            }));
        }
    }

    fn read_framed_body(&mut self, first_header: Vec<u8>) -> io::Result<Inbound<Vec<u8>>> {
        let mut declared = None;
        let mut invalid = None;
        let mut header = first_header;
        loop {
            match content_length(&String::from_utf8_lossy(&header)) {
                Some(Ok(len)) => declared = Some(len),
                Some(Err(reason)) => invalid = Some(reason),
                None => {}
            }
            header = match read_capped_line(&mut self.inner, MAX_HEADER_BYTES)? {
                CappedLine::Eof => {
                    return Ok(Inbound::Malformed(
                        "input ended inside frame headers".to_string(),
                    ))
                }
                CappedLine::Overlong => {
                    return Ok(Inbound::Malformed("frame header line too long".to_string()))
                }
                CappedLine::Text(next) => next,
            };
            if header.trim_ascii().is_empty() {
                break;
            }
        }

        if let Some(reason) = invalid {
            return Ok(Inbound::Malformed(reason));
        }
        let Some(declared) = declared else {
            return Ok(Inbound::Malformed("missing content-length header".to_string()));
        };
        if declared > MAX_BODY_BYTES {
            // Skip the body so the next frame starts where the peer expects.
            io::copy(&mut (&mut self.inner).take(declared), &mut io::sink())?;
            return Ok(Inbound::TooLarge {
                declared: Some(declared),
            });
        }
        let body = read_declared(&mut self.inner, declared)?;
        if (body.len() as u64) < declared {
            return Ok(Inbound::Malformed(format!(
                "frame body ended after {} of {declared} bytes",
                body.len()
            )));
        }
        Ok(Inbound::Message(body))
    }
}

pub(crate) fn write_stdio_reply<W: Write>(
    out: &mut W,
    framing: Framing,
    payload: &[u8],
) -> io::Result<()> {
    if framing == Framing::ContentLength {
        write!(out, "Content-Length: {}\r\n\r\n", payload.len())?;
        out.write_all(payload)?;
    } else {
        out.write_all(payload)?;
        out.write_all(b"\n")?;
    }
    out.flush()
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) query: HashMap<String, String>,
    pub(crate) body: Vec<u8>,
}

/// Reads one request. `Ok(None)` when the peer closed without sending one.
/// An oversized declared body is reported without reading any of it; the
/// caller answers and closes the connection.
pub(crate) fn read_http_request<R: BufRead>(
    reader: &mut R,
) -> io::Result<Option<Inbound<HttpRequest>>> {
    let mut head = (&mut *reader).take(MAX_HEADER_BYTES);
    let mut line = String::new();
    if head.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let request_line = line.trim_end_matches(['\r', '\n']);
    if request_line.is_empty() {
        return Ok(None);
    }
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(Some(Inbound::Malformed(format!(
            "invalid request line: {request_line}"
        ))));
    };
    let method = method.to_string();
    let (path, query) = split_target(target);

    let mut declared = 0_u64;
    loop {
        line.clear();
        let read = head.read_line(&mut line)?;
        if !line.ends_with('\n') && head.limit() == 0 {
            return Ok(Some(Inbound::Malformed(format!(
                "request head exceeds {MAX_HEADER_BYTES} bytes"
            ))));
        }
        let header = line.trim_end_matches(['\r', '\n']);
        if read == 0 || header.is_empty() {
            break;
        }
        match content_length(header) {
            Some(Ok(len)) => declared = len,
            Some(Err(reason)) => return Ok(Some(Inbound::Malformed(reason))),
            None => {}
        }
    }

    if declared > MAX_BODY_BYTES {
        return Ok(Some(Inbound::TooLarge {
            declared: Some(declared),
        }));
    }
    let body = read_declared(reader, declared)?;
    if (body.len() as u64) < declared {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("request body ended after {} of {declared} bytes", body.len()),
        ));
    }
    Ok(Some(Inbound::Message(HttpRequest {
        method,
        path,
        query,
        body,
    })))
}

pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    pub(crate) body: Vec<u8>,
}

impl HttpResponse {
    pub(crate) fn json(status: u16, value: &Value) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        Self { status, body }
    }

    pub(crate) fn empty(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }
}

pub(crate) fn write_http_response<W: Write>(out: &mut W, response: &HttpResponse) -> io::Result<()> {
    write!(
        out,
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason_phrase(response.status),
        response.body.len()
    )?;
    out.write_all(&response.body)?;
    out.flush()
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

enum CappedLine {
    Eof,
    Text(Vec<u8>),
    /// Longer than the cap; the rest of the line has been discarded.
    Overlong,
}

fn read_capped_line<R: BufRead>(reader: &mut R, cap: u64) -> io::Result<CappedLine> {
    let mut line = Vec::new();
    if (&mut *reader)
        .take(cap.saturating_add(1))
        .read_until(b'\n', &mut line)?
        == 0
    {
        return Ok(CappedLine::Eof);
    }
    if line.len() as u64 > cap && line.last() != Some(&b'\n') {
        discard_rest_of_line(reader)?;
        return Ok(CappedLine::Overlong);
    }
    Ok(CappedLine::Text(line))
}

fn discard_rest_of_line<R: BufRead>(reader: &mut R) -> io::Result<()> {
    loop {
        let (used, found) = {
            let chunk = reader.fill_buf()?;
            if chunk.is_empty() {
                return Ok(());
            }
            match chunk.iter().position(|b| *b == b'\n') {
                Some(at) => (at + 1, true),
                None => (chunk.len(), false),
            }
        };
        reader.consume(used);
        if found {
            return Ok(());
        }
    }
}

/// Reads up to `declared` bytes; a shorter result means the input ended early.
fn read_declared<R: Read>(reader: &mut R, declared: u64) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    (&mut *reader).take(declared).read_to_end(&mut body)?;
    Ok(body)
}

fn opens_header_block(line: &[u8]) -> bool {
    [b"content-length:".as_slice(), b"content-type:".as_slice()]
        .iter()
        .any(|prefix| {
            line.get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        })
}

/// `None` when `header` is some other header.
fn content_length(header: &str) -> Option<Result<u64, String>> {
    let (name, value) = header.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    let value = value.trim();
    Some(
        value
            .parse::<u64>()
            .map_err(|_| format!("invalid content-length: {value}")),
    )
}

fn split_target(target: &str) -> (String, HashMap<String, String>) {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let query = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k.to_string(), v.to_string())
        })
        .collect();
    (path.to_string(), query)
}
