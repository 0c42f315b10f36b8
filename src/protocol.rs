//! RESP wire values and the codec that moves them over byte streams
//!
//! Decoding is built from nom streaming combinators. `decode` is a pure
//! function over a byte slice: it either yields a complete value plus the
//! number of bytes consumed, reports that more input is needed, or fails.
//! `Decoder` is the same codec with state kept between calls, which
//! `RespReader` uses so that a large request is parsed once as it arrives.
//! `RespReader` and `RespWriter` serve client sockets and the append-only
//! file alike.

use crate::error::{RespVaultError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use nom::{
    bytes::streaming::{tag, take, take_until},
    combinator::all_consuming,
    number::streaming::u8 as marker_byte,
    sequence::terminated,
    IResult,
};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

pub const SIMPLE_STRING: u8 = b'+';
pub const ERROR: u8 = b'-';
pub const INTEGER: u8 = b':';
pub const BULK: u8 = b'$';
pub const ARRAY: u8 = b'*';

const CRLF: &[u8] = b"\r\n";
const NULL_BULK: &[u8] = b"$-1\r\n";

/// Longest header or simple-string line accepted before giving up on a CRLF.
const MAX_LINE_LEN: usize = 64 * 1024;

/// A single datum on the wire.
///
/// `SimpleString` and `Error` text must not contain CR or LF; nothing checks
/// this, and a value that breaks the rule will not decode back to itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    SimpleString(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Value>),
}

impl Value {
    /// `+OK`
    pub fn ok() -> Self {
        Value::SimpleString("OK".to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Value::Error(message.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Value::Bulk(data.into())
    }

    /// Build a request: an array of bulk strings, command name first.
    pub fn request<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        Value::Array(
            parts
                .into_iter()
                .map(|part| Value::Bulk(Bytes::copy_from_slice(part.as_ref())))
                .collect(),
        )
    }

    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Value::Bulk(data) => Some(data),
            _ => None,
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the wire form to `buf`, depth-first for arrays.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Value::SimpleString(text) => put_line(buf, SIMPLE_STRING, text.as_bytes()),
            Value::Error(text) => put_line(buf, ERROR, text.as_bytes()),
            Value::Integer(n) => put_line(buf, INTEGER, n.to_string().as_bytes()),
            Value::Bulk(data) => {
                put_line(buf, BULK, data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            Value::Null => buf.put_slice(NULL_BULK),
            Value::Array(items) => {
                put_line(buf, ARRAY, items.len().to_string().as_bytes());
                for item in items {
                    item.encode_into(buf);
                }
            }
        }
    }
}

fn put_line(buf: &mut BytesMut, marker: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.put_u8(marker);
    buf.put_slice(body);
    buf.put_slice(CRLF);
}

/// Upper bounds on declared lengths, checked before anything is buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_bulk_len: usize,
    pub max_array_len: usize,
    /// Deepest array nesting accepted; a top-level array is depth 1.
    pub max_depth: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_bulk_len: 512 * 1024 * 1024,
            max_array_len: 1024 * 1024,
            max_depth: 32,
        }
    }
}

/// `None` means the input ended before the token did.
type Parsed<'a, T> = Result<Option<(&'a [u8], T)>>;

/// Decode one value from the front of `input`.
///
/// Returns `Ok(None)` when `input` holds only a prefix of a value, and
/// `Ok(Some((value, consumed)))` once a whole value is available.
pub fn decode(input: &[u8], limits: DecodeLimits) -> Result<Option<(Value, usize)>> {
    match Decoder::new(limits).decode(input)? {
        (Some(value), used) => Ok(Some((value, used))),
        (None, _) => Ok(None),
    }
}

/// Incremental decoder.
///
/// Arrays are assembled on an explicit stack of open frames, so nesting depth
/// costs heap rather than call stack, and elements completed by one call are
/// kept for the next instead of being parsed again.
#[derive(Debug, Default)]
pub struct Decoder {
    limits: DecodeLimits,
    frames: Vec<Frame>,
}

#[derive(Debug)]
struct Frame {
    remaining: usize,
    items: Vec<Value>,
}

/// A scalar value or the header of a non-empty array.
enum Token {
    Value(Value),
    ArrayHeader(usize),
}

impl Decoder {
    pub fn new(limits: DecodeLimits) -> Self {
        Self {
            limits,
            frames: Vec::new(),
        }
    }

    /// True when no array is partly decoded.
    pub fn is_idle(&self) -> bool {
        self.frames.is_empty()
    }

    /// Consume every complete token at the front of `input`.
    ///
    /// Returns the finished value, if one was completed, and the number of
    /// bytes consumed. Consumed bytes belong to the decoder even when no value
    /// is finished yet; the caller must not offer them again. After an error
    /// the decoder state is unspecified.
    pub fn decode(&mut self, input: &[u8]) -> Result<(Option<Value>, usize)> {
        let mut consumed = 0;
        loop {
            let Some((rest, token)) = parse_token(&input[consumed..], &self.limits)? else {
                return Ok((None, consumed));
            };
            consumed = input.len() - rest.len();

            let mut value = match token {
                Token::Value(value) => value,
                Token::ArrayHeader(count) => {
                    if self.frames.len() >= self.limits.max_depth {
                        return Err(RespVaultError::Protocol("nesting too deep".to_string()));
                    }
                    self.frames.push(Frame {
                        remaining: count,
                        items: Vec::with_capacity(count.min(64)),
                    });
                    continue;
                }
            };

            // Close every array the new value completes.
            loop {
                let Some(mut frame) = self.frames.pop() else {
                    return Ok((Some(value), consumed));
                };
                frame.items.push(value);
                frame.remaining -= 1;
                if frame.remaining > 0 {
                    self.frames.push(frame);
                    break;
                }
                value = Value::Array(frame.items);
            }
        }
    }
}

/// Lift a nom streaming result: `Incomplete` becomes "need more input".
fn step<'a, T>(result: IResult<&'a [u8], T>) -> Parsed<'a, T> {
    match result {
        Ok((rest, out)) => Ok(Some((rest, out))),
        Err(nom::Err::Incomplete(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_token<'a>(input: &'a [u8], limits: &DecodeLimits) -> Parsed<'a, Token> {
    let Some((rest, marker)) = step(marker_byte(input))? else {
        return Ok(None);
    };

    let value = match marker {
        SIMPLE_STRING => parse_text(rest)?.map(|(rest, text)| (rest, Value::SimpleString(text))),
        ERROR => parse_text(rest)?.map(|(rest, text)| (rest, Value::Error(text))),
        INTEGER => parse_integer(rest)?.map(|(rest, n)| (rest, Value::Integer(n))),
        BULK => parse_bulk(rest, limits)?,
        ARRAY => return parse_array_header(rest, limits),
        other => {
            return Err(RespVaultError::Protocol(format!(
                "unsupported marker byte {:?}",
                char::from(other)
            )))
        }
    };
    Ok(value.map(|(rest, value)| (rest, Token::Value(value))))
}

fn parse_line(input: &[u8]) -> Parsed<'_, &[u8]> {
    let result: IResult<&[u8], &[u8]> = terminated(take_until(CRLF), tag(CRLF))(input);
    match step(result)? {
        None if input.len() > MAX_LINE_LEN => {
            Err(RespVaultError::Protocol("line too long".to_string()))
        }
        parsed => Ok(parsed),
    }
}

fn parse_text(input: &[u8]) -> Parsed<'_, String> {
    let Some((rest, line)) = parse_line(input)? else {
        return Ok(None);
    };
    let text = std::str::from_utf8(line)
        .map_err(|_| RespVaultError::Protocol("simple string is not valid UTF-8".to_string()))?;
    Ok(Some((rest, text.to_string())))
}

fn parse_integer(input: &[u8]) -> Parsed<'_, i64> {
    let Some((rest, line)) = parse_line(input)? else {
        return Ok(None);
    };
    let parsed: IResult<&[u8], i64> = all_consuming(nom::character::complete::i64)(line);
    match parsed {
        Ok((_, n)) => Ok(Some((rest, n))),
        Err(_) => Err(RespVaultError::Protocol(format!(
            "invalid integer {:?}",
            String::from_utf8_lossy(line)
        ))),
    }
}

fn parse_bulk<'a>(input: &'a [u8], limits: &DecodeLimits) -> Parsed<'a, Value> {
    let Some((rest, len)) = parse_integer(input)? else {
        return Ok(None);
    };
    if len == -1 {
        return Ok(Some((rest, Value::Null)));
    }
    let len = usize::try_from(len)
        .map_err(|_| RespVaultError::Protocol(format!("invalid bulk length {}", len)))?;
    if len > limits.max_bulk_len {
        return Err(RespVaultError::Protocol(format!(
            "bulk length {} exceeds limit {}",
            len, limits.max_bulk_len
        )));
    }

    let payload: IResult<&[u8], &[u8]> = take(len)(rest);
    let Some((rest, payload)) = step(payload)? else {
        return Ok(None);
    };
    let terminator: IResult<&[u8], &[u8]> = tag(CRLF)(rest);
    let rest = match terminator {
        Ok((rest, _)) => rest,
        Err(nom::Err::Incomplete(_)) => return Ok(None),
        Err(_) => {
            return Err(RespVaultError::Protocol(
                "bulk string not terminated by CRLF".to_string(),
            ))
        }
    };
    Ok(Some((rest, Value::Bulk(Bytes::copy_from_slice(payload)))))
}

fn parse_array_header<'a>(input: &'a [u8], limits: &DecodeLimits) -> Parsed<'a, Token> {
    let Some((rest, count)) = parse_integer(input)? else {
        return Ok(None);
    };
    if count <= 0 {
        return Ok(Some((rest, Token::Value(Value::Array(Vec::new())))));
    }
    let count = count as usize;
    if count > limits.max_array_len {
        return Err(RespVaultError::Protocol(format!(
            "array length {} exceeds limit {}",
            count, limits.max_array_len
        )));
    }
    Ok(Some((rest, Token::ArrayHeader(count))))
}

/// Buffered value reader over any async byte source.
pub struct RespReader<R> {
    inner: R,
    buf: BytesMut,
    decoder: Decoder,
    position: u64,
}

impl<R: AsyncRead + Unpin> RespReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limits(inner, DecodeLimits::default())
    }

    pub fn with_limits(inner: R, limits: DecodeLimits) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4096),
            decoder: Decoder::new(limits),
            position: 0,
        }
    }

    /// Bytes consumed so far. Between values this is the offset of the next
    /// value in the stream.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next value.
    ///
    /// `Ok(None)` is a clean end of stream between values. A stream that ends
    /// part-way through a value fails with `UnexpectedEof`. Cancel safe:
    /// bytes already read stay with the reader for the next call.
    pub async fn read_value(&mut self) -> Result<Option<Value>> {
        loop {
            if !self.buf.is_empty() {
                let (value, used) = self.decoder.decode(&self.buf)?;
                self.buf.advance(used);
                self.position += used as u64;
                if value.is_some() {
                    return Ok(value);
                }
            }

            self.buf.reserve(4096);
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() && self.decoder.is_idle() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended inside a value at byte {}", self.position),
                )
                .into());
            }
        }
    }
}

/// Value writer; every call writes one whole value and flushes it.
pub struct RespWriter<W: AsyncWrite + Unpin> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> RespWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    pub async fn write_value(&mut self, value: &Value) -> Result<()> {
        self.inner.write_all(&value.encode()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
