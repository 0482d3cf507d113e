//! Stream framing.
//!
//! Reads self-delimiting JSON records from an ordered byte stream and writes
//! one newline-terminated response record at a time.
//!
//! A `put` with a non-zero `BodySize` is decoded together with its dependent
//! body record in a single call to [`RecordReader::next_operation`]. Nothing
//! else may advance the stream in between: the body has no framing of its own
//! beyond being the next value after its request.

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use crate::bytes::decode_payload;
use crate::error::ProtocolError;
use crate::request::{Command, Operation, Request};
use crate::response::Response;

/// Minimum number of bytes requested from the underlying reader per read.
const READ_CHUNK: usize = 64 * 1024;

/// Decodes records from an input stream.
pub struct RecordReader<R> {
    reader: R,
    buf: Vec<u8>,
    eof: bool,
    scan: Boundary,
    #[cfg(test)]
    parse_attempts: usize,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            eof: false,
            scan: Boundary::default(),
            #[cfg(test)]
            parse_attempts: 0,
        }
    }

    /// Decode the next operation.
    ///
    /// Returns `Ok(None)` on a clean end of input (only whitespace left).
    pub async fn next_operation(&mut self) -> Result<Option<Operation>, ProtocolError> {
        let Some(request) = self.next_record::<Request>().await? else {
            return Ok(None);
        };

        let op = match request.command()? {
            Command::Get => Operation::Get {
                id: request.id,
                action_id: request.action_id,
            },
            Command::Put => {
                let body = if request.has_body() {
                    self.read_body(request.id, request.body_size).await?
                } else {
                    Vec::new()
                };
                Operation::Put {
                    id: request.id,
                    action_id: request.action_id,
                    output_id: request.output_id,
                    body,
                }
            }
            Command::Close => Operation::Close { id: request.id },
        };

        Ok(Some(op))
    }

    /// Decode the dependent body record of a `put`.
    async fn read_body(&mut self, id: i64, declared: i64) -> Result<Vec<u8>, ProtocolError> {
        let encoded = self
            .next_record::<String>()
            .await?
            .ok_or(ProtocolError::MissingBody { id, declared })?;

        let body = decode_payload(&encoded)
            .map_err(|source| ProtocolError::InvalidBody { id, source })?;

        if i64::try_from(body.len()).ok() != Some(declared) {
            return Err(ProtocolError::BodySizeMismatch {
                id,
                declared,
                actual: body.len(),
            });
        }

        Ok(body)
    }

    /// Decode the next JSON value of type `T`.
    ///
    /// Buffered input is scanned once for the end of the value; it is handed
    /// to the parser only when complete or at end of input.
    pub async fn next_record<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        loop {
            let start = self
                .buf
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .unwrap_or(self.buf.len());
            let available = self.buf.len() - start;

            if available > 0 && (self.eof || self.scan.advance(&self.buf[start..])) {
                #[cfg(test)]
                {
                    self.parse_attempts += 1;
                }
                let parsed = {
                    let mut stream =
                        serde_json::Deserializer::from_slice(&self.buf[start..]).into_iter::<T>();
                    match stream.next() {
                        Some(Ok(value)) => Some(Ok((value, stream.byte_offset()))),
                        Some(Err(e)) => Some(Err(e)),
                        None => None,
                    }
                };
                match parsed {
                    Some(Ok((value, offset))) => {
                        self.buf.drain(..start + offset);
                        self.scan = Boundary::default();
                        return Ok(Some(value));
                    }
                    // Incomplete value, need more input
                    Some(Err(e)) if e.is_eof() => {}
                    Some(Err(e)) => return Err(ProtocolError::Decode(e)),
                    None => {}
                }
            }

            if self.eof {
                return if available > 0 {
                    Err(ProtocolError::UnexpectedEof)
                } else {
                    self.buf.clear();
                    Ok(None)
                };
            }

            self.fill().await?;
        }
    }

    /// Read more input into the buffer.
    async fn fill(&mut self) -> Result<(), ProtocolError> {
        self.buf.reserve(self.buf.len().max(READ_CHUNK));
        let n = self.reader.read_buf(&mut self.buf).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(())
    }
}

/// Incremental search for the end of one top-level JSON value.
///
/// Tracks nesting and string state across calls so each buffered byte is
/// examined once however many reads the value spans.
#[derive(Debug, Default)]
struct Boundary {
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    complete: bool,
}

impl Boundary {
    /// Scan `value` (which starts at the first byte of the value) from where
    /// the last call stopped. Returns true once the value may be parsed.
    fn advance(&mut self, value: &[u8]) -> bool {
        if self.complete {
            return true;
        }
        // Scalars and malformed input go straight to the parser
        if self.pos == 0 && !matches!(value.first(), Some(b'{' | b'[' | b'"')) {
            self.complete = true;
            return true;
        }

        for (i, &b) in value.iter().enumerate().skip(self.pos) {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        self.pos = i + 1;
                        self.complete = true;
                        return true;
                    }
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        self.pos = i + 1;
                        self.complete = true;
                        return true;
                    }
                }
                _ => {}
            }
        }
        self.pos = value.len();
        false
    }
}

/// Encodes responses onto an output stream.
///
/// Each call writes and flushes one complete record. Callers sharing a writer
/// across tasks must hold a lock for the duration of [`ResponseWriter::write`].
pub struct ResponseWriter<W: AsyncWrite + Unpin> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub async fn write(&mut self, response: &Response) -> Result<(), ProtocolError> {
        let mut record = serde_json::to_vec(response).map_err(ProtocolError::Encode)?;
        record.push(b'\n');
        self.writer.write_all(&record).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
