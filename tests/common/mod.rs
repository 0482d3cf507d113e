//! Shared helpers for session-level tests.

#![allow(dead_code)]

use cacheprog::protocol::bytes::encode_payload;
use cacheprog::protocol::Response;
use cacheprog::{Engine, EngineError};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

pub fn get_record(id: i64, action: &[u8]) -> String {
    format!(
        r#"{{"ID":{},"Command":"get","ActionID":"{}"}}"#,
        id,
        encode_payload(action)
    )
}

/// A `put` request followed by its body record when the body is non-empty.
pub fn put_record(id: i64, action: &[u8], object: &[u8], body: &[u8]) -> String {
    put_record_declaring(id, action, object, body.len() as i64, body)
}

/// A `put` whose declared `BodySize` may disagree with the body sent.
pub fn put_record_declaring(
    id: i64,
    action: &[u8],
    object: &[u8],
    declared: i64,
    body: &[u8],
) -> String {
    let mut record = format!(
        r#"{{"ID":{},"Command":"put","ActionID":"{}","OutputID":"{}","BodySize":{}}}"#,
        id,
        encode_payload(action),
        encode_payload(object),
        declared
    );
    if declared > 0 {
        record.push_str(&format!("\n\"{}\"", encode_payload(body)));
    }
    record
}

pub fn close_record(id: i64) -> String {
    format!(r#"{{"ID":{},"Command":"close"}}"#, id)
}

/// Feed `records` as one input stream and collect every response.
pub async fn run_session(
    engine: &Engine,
    records: &[String],
) -> (Result<(), EngineError>, Vec<Response>) {
    let input = records.join("\n");
    let (out_tx, mut out_rx) = tokio::io::duplex(64 * 1024);

    let (result, output) = tokio::join!(engine.run(input.as_bytes(), out_tx), async move {
        let mut output = Vec::new();
        out_rx.read_to_end(&mut output).await.unwrap();
        output
    });

    (result, parse_responses(&output))
}

pub fn parse_responses(output: &[u8]) -> Vec<Response> {
    serde_json::Deserializer::from_slice(output)
        .into_iter::<Response>()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// Interactive side of a session: sends records and reads responses one by one.
pub struct Client {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
}

impl Client {
    /// Returns the client and the engine's ends of the two streams.
    pub fn pair() -> (Self, DuplexStream, DuplexStream) {
        let (input, engine_in) = tokio::io::duplex(64 * 1024);
        let (engine_out, output) = tokio::io::duplex(64 * 1024);
        let client = Self {
            input,
            output: BufReader::new(output).lines(),
        };
        (client, engine_in, engine_out)
    }

    pub async fn send(&mut self, record: &str) {
        self.input.write_all(record.as_bytes()).await.unwrap();
        self.input.write_all(b"\n").await.unwrap();
    }

    /// Raw text of the next response line.
    pub async fn recv_raw(&mut self) -> String {
        self.output.next_line().await.unwrap().expect("response")
    }

    pub async fn recv(&mut self) -> Response {
        serde_json::from_str(&self.recv_raw().await).unwrap()
    }

    /// Signal end of input.
    pub async fn finish(&mut self) {
        self.input.shutdown().await.unwrap();
    }
}
