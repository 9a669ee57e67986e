use crate::error::{BspError, Result};
use crate::protocol::{
    BuildEvent, InitializeBuildParams, InitializeBuildResult, ResourcesResult, RpcError,
    SourcesResult, TargetsParams, WorkspaceBuildTargetsResult,
};
use crate::timeout::IdleTimeout;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;
pub const MAX_HEADER_LINE_BYTES: usize = 8 * 1024;

/// JSON-RPC 2.0 client speaking BSP framing (`Content-Length` headers) over any async
/// reader/writer pair.
///
/// One request is in flight at a time. While waiting for its response the client forwards build
/// notifications to the event channel and answers server-initiated requests with "method not
/// found". Every incoming message resets the idle timeout.
pub struct BspClient<R, W> {
    reader: BufReader<R>,
    writer: W,
    next_id: i64,
    idle: IdleTimeout,
    events: Option<UnboundedSender<BuildEvent>>,
    max_message_bytes: usize,
    broken: bool,
}

impl<R, W> std::fmt::Debug for BspClient<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BspClient")
            .field("next_id", &self.next_id)
            .field("idle", &self.idle.duration())
            .field("broken", &self.broken)
            .finish()
    }
}

impl<R, W> BspClient<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, idle: IdleTimeout) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            next_id: 1,
            idle,
            events: None,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            broken: false,
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<BuildEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    pub async fn initialize(
        &mut self,
        params: InitializeBuildParams,
        cancel: &CancellationToken,
    ) -> Result<InitializeBuildResult> {
        self.request("build/initialize", params, cancel).await
    }

    pub async fn initialized(&mut self) -> Result<()> {
        self.notify("build/initialized", Value::Null).await
    }

    pub async fn workspace_build_targets(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceBuildTargetsResult> {
        self.request("workspace/buildTargets", Value::Null, cancel)
            .await
    }

    /// Targets the server knows about that do not map to IDE modules.
    pub async fn workspace_non_module_targets(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceBuildTargetsResult> {
        self.request("workspace/nonModuleTargets", Value::Null, cancel)
            .await
    }

    pub async fn sources(
        &mut self,
        params: TargetsParams,
        cancel: &CancellationToken,
    ) -> Result<SourcesResult> {
        self.request("buildTarget/sources", params, cancel).await
    }

    pub async fn resources(
        &mut self,
        params: TargetsParams,
        cancel: &CancellationToken,
    ) -> Result<ResourcesResult> {
        self.request("buildTarget/resources", params, cancel).await
    }

    pub async fn shutdown(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.request::<_, Value>("build/shutdown", Value::Null, cancel)
            .await
            .map(|_| ())
    }

    pub async fn exit(&mut self) -> Result<()> {
        self.notify("build/exit", Value::Null).await
    }

    /// Send a request and wait for its response.
    ///
    /// Fails with [`BspError::IdleTimeout`] when the server stays silent for a whole idle window
    /// and with [`BspError::Cancelled`] when `cancel` fires. Either leaves the stream mid-message,
    /// so the client refuses further traffic afterwards.
    pub async fn request<P: Serialize, T: DeserializeOwned>(
        &mut self,
        method: &str,
        params: P,
        cancel: &CancellationToken,
    ) -> Result<T> {
        if self.broken {
            return Err(BspError::ConnectionClosed);
        }
        let id = self.next_id;
        self.next_id += 1;

        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.send_message(&msg).await?;
        self.idle.reset();
        tracing::trace!(target = "bsync.bsp", method, id, "sent request");

        loop {
            let incoming = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.broken = true;
                    return Err(BspError::Cancelled);
                }
                _ = self.idle.elapsed() => {
                    self.broken = true;
                    tracing::warn!(
                        target = "bsync.bsp",
                        method,
                        idle = ?self.idle.duration(),
                        "build server went silent"
                    );
                    return Err(BspError::IdleTimeout {
                        operation: method.to_string(),
                        idle: self.idle.duration(),
                    });
                }
                message = read_message(&mut self.reader, self.max_message_bytes) => message,
            };
            let incoming = match incoming {
                Ok(incoming) => incoming,
                Err(err) => {
                    self.broken = true;
                    return Err(err);
                }
            };
            self.idle.reset();

            if let Some(incoming_method) = incoming.get("method").and_then(Value::as_str) {
                match incoming.get("id").cloned() {
                    Some(request_id) => {
                        // Nothing is served to the build server; reply so it does not block.
                        let reply = serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": request_id,
                            "error": {
                                "code": RpcError::METHOD_NOT_FOUND,
                                "message": format!("method not supported: {incoming_method}"),
                            }
                        });
                        if let Err(err) = self.send_message(&reply).await {
                            self.broken = true;
                            return Err(err);
                        }
                    }
                    None => self.forward_notification(incoming_method, &incoming),
                }
                continue;
            }

            if incoming.get("id").and_then(Value::as_i64) != Some(id) {
                tracing::debug!(target = "bsync.bsp", method, "ignoring stale response");
                continue;
            }

            if let Some(error) = incoming.get("error") {
                let error: RpcError = serde_json::from_value(error.clone())
                    .map_err(|_| BspError::protocol(format!("malformed error object: {error}")))?;
                return Err(BspError::Rpc {
                    method: method.to_string(),
                    error,
                });
            }

            let result = incoming.get("result").cloned().unwrap_or(Value::Null);
            return Ok(serde_json::from_value(result)?);
        }
    }

    pub async fn notify<P: Serialize>(&mut self, method: &str, params: P) -> Result<()> {
        if self.broken {
            return Err(BspError::ConnectionClosed);
        }
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.send_message(&msg).await
    }

    fn forward_notification(&self, method: &str, incoming: &Value) {
        let params = incoming.get("params").cloned().unwrap_or(Value::Null);
        match BuildEvent::from_notification(method, params) {
            Ok(Some(event)) => {
                if let Some(events) = &self.events {
                    // A dropped receiver only means nobody is listening for progress.
                    let _ = events.send(event);
                }
            }
            Ok(None) => {
                tracing::trace!(target = "bsync.bsp", method, "ignoring notification");
            }
            Err(err) => {
                tracing::debug!(
                    target = "bsync.bsp",
                    method,
                    error = %err,
                    "dropping malformed notification"
                );
            }
        }
    }

    async fn send_message(&mut self, msg: &Value) -> Result<()> {
        let json = serde_json::to_vec(msg)?;
        let header = format!("Content-Length: {}\r\n\r\n", json.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&json).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Reads one header line of at most `max_len` bytes; `None` at end of stream.
async fn read_line_limited<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    max_len: usize,
) -> Result<Option<String>> {
    let mut buf = Vec::<u8>::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if buf.is_empty() {
                return Ok(None);
            }
            break;
        }

        let newline_pos = available.iter().position(|&b| b == b'\n');
        let take = newline_pos.map(|pos| pos + 1).unwrap_or(available.len());
        if buf.len() + take > max_len {
            return Err(BspError::protocol(format!(
                "header line exceeds maximum size ({max_len} bytes)"
            )));
        }

        buf.extend_from_slice(&available[..take]);
        reader.consume(take);
        if newline_pos.is_some() {
            break;
        }
    }

    let line =
        String::from_utf8(buf).map_err(|_| BspError::protocol("header line is not UTF-8"))?;
    Ok(Some(line))
}

async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    max_message_bytes: usize,
) -> Result<Value> {
    let mut content_length: Option<usize> = None;
    loop {
        let Some(line) = read_line_limited(reader, MAX_HEADER_LINE_BYTES).await? else {
            return Err(BspError::ConnectionClosed);
        };

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if content_length.is_some() {
                break;
            }
            // Tolerate stray blank lines between messages.
            continue;
        }

        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(value.parse::<usize>().map_err(|_| {
                    BspError::protocol(format!("invalid Content-Length `{value}`"))
                })?);
            }
        }
    }

    let len = content_length.unwrap_or_default();
    if len > max_message_bytes {
        return Err(BspError::MessageTooLarge {
            len,
            limit: max_message_bytes,
        });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            BspError::ConnectionClosed
        } else {
            BspError::Io(err)
        }
    })?;
    Ok(serde_json::from_slice(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    #[tokio::test]
    async fn reads_framed_messages_and_rejects_oversized_ones() {
        let body = br#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        framed.extend_from_slice(body);

        let mut reader = BufReader::new(&framed[..]);
        let value = read_message(&mut reader, 1024).await.unwrap();
        assert_eq!(value["id"], 1);

        let mut reader = BufReader::new(&framed[..]);
        match read_message(&mut reader, 4).await {
            Err(BspError::MessageTooLarge { limit: 4, .. }) => {}
            other => panic!("expected MessageTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_is_connection_closed() {
        let mut reader = BufReader::new(&b""[..]);
        match read_message(&mut reader, 1024).await {
            Err(BspError::ConnectionClosed) => {}
            other => panic!("expected ConnectionClosed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overlong_header_line_is_rejected() {
        let framed = format!("{}\r\n\r\n", "A".repeat(MAX_HEADER_LINE_BYTES + 1));
        let mut reader = BufReader::new(framed.as_bytes());
        match read_message(&mut reader, 1024).await {
            Err(BspError::Protocol(message)) => {
                assert!(message.contains("header line exceeds maximum size"))
            }
            other => panic!("expected Protocol, got {other:?}"),
        }
    }

    /// Accepts writes until the first flush, then fails every write.
    #[derive(Default)]
    struct FailAfterFlush {
        flushed: bool,
    }

    impl AsyncWrite for FailAfterFlush {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            if self.flushed {
                Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
            } else {
                Poll::Ready(Ok(buf.len()))
            }
        }

        fn poll_flush(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            self.flushed = true;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn failed_reply_to_server_request_breaks_the_client() {
        let body = br#"{"jsonrpc":"2.0","id":"srv-1","method":"workspace/reload"}"#;
        let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        framed.extend_from_slice(body);

        let mut client = BspClient::new(
            &framed[..],
            FailAfterFlush::default(),
            IdleTimeout::new(Duration::from_secs(30)),
        );
        let cancel = CancellationToken::new();
        let first = client
            .request::<_, Value>("workspace/buildTargets", Value::Null, &cancel)
            .await;
        match first {
            Err(BspError::Io(_)) => {}
            other => panic!("expected Io, got {other:?}"),
        }
        let second = client
            .request::<_, Value>("workspace/buildTargets", Value::Null, &cancel)
            .await;
        match second {
            Err(BspError::ConnectionClosed) => {}
            other => panic!("expected ConnectionClosed, got {other:?}"),
        }
    }
}
