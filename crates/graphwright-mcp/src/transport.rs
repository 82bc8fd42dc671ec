//! JSON-RPC framing and the stdio transport

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent for notifications
    #[serde(default)]
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<serde_json::Value>, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Notifications carry no id and get no response
    pub fn is_notification(&self) -> bool {
        self.id.is_null() && (self.method == "initialized" || self.method.starts_with("notifications/"))
    }
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: serde_json::Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Outcome of reading one line from the transport
#[derive(Debug)]
pub enum Incoming {
    Request(JsonRpcRequest),
    /// A line that is not a valid request; answered with a parse error
    Malformed(String),
}

/// Newline-delimited JSON-RPC over a pair of byte streams
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    line: String,
}

/// Line transport bound to the process stdin and stdout
pub type StdioTransport = LineTransport<BufReader<Stdin>, Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        LineTransport::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: String::new(),
        }
    }

    /// Read the next request; `None` at end of input. Blank lines are skipped.
    pub async fn read_request(&mut self) -> std::io::Result<Option<Incoming>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            let text = self.line.trim();
            if text.is_empty() {
                continue;
            }
            return Ok(Some(match serde_json::from_str::<JsonRpcRequest>(text) {
                Ok(request) => Incoming::Request(request),
                Err(e) => Incoming::Malformed(e.to_string()),
            }));
        }
    }

    /// Write one response followed by a newline
    pub async fn write_response(&mut self, response: &JsonRpcResponse) -> std::io::Result<()> {
        let json = serde_json::to_string(response)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_requests_and_skips_blank_lines() {
        let input = b"\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\nnot json\n".to_vec();
        let mut transport = LineTransport::new(BufReader::new(&input[..]), Vec::new());

        let Some(Incoming::Request(request)) = transport.read_request().await.unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request.method, "ping");
        assert_eq!(request.id, serde_json::json!(1));

        assert!(matches!(
            transport.read_request().await.unwrap(),
            Some(Incoming::Malformed(_))
        ));
        assert!(transport.read_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writes_one_line_per_response() {
        let mut transport = LineTransport::new(BufReader::new(&b""[..]), Vec::new());
        transport
            .write_response(&JsonRpcResponse::success(serde_json::json!(7), serde_json::json!({})))
            .await
            .unwrap();
        transport
            .write_response(&JsonRpcResponse::error(serde_json::json!(8), METHOD_NOT_FOUND, "nope"))
            .await
            .unwrap();

        let out = String::from_utf8(transport.into_writer()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"jsonrpc":"2.0","id":7,"result":{}}"#);
        assert!(lines[1].contains("-32601"));
    }

    #[test]
    fn test_notification_detection() {
        let note: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(note.is_notification());
        assert!(!JsonRpcRequest::new(1, "initialized", serde_json::Value::Null).is_notification());
    }
}
