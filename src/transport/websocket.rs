//! WebSocket-backed paths.
//!
//! Binary messages only. Each outbound chunk is sent as one binary message by
//! a dedicated sender task; the writer is stalled by the shared
//! [`WriteBuffer`] while that task lags behind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::backpressure::{BackpressureConfig, WriteBuffer};
use super::path::{CloseCause, PathClose, PathWrite, SinglePath};
use crate::core::{AbortRaiser, CLOSE_FLUSH_TIMEOUT, PathError, PathId};

/// Factory for WebSocket-backed [`SinglePath`]s.
#[derive(Debug)]
pub struct WebSocketPath;

impl WebSocketPath {
    /// Connect to `url` and wrap the socket as path `pid`.
    ///
    /// Fails with [`PathError::ConnectTimeout`] after `connect_timeout`, and
    /// with [`PathError::Aborted`] if `abort` is raised first.
    pub async fn connect(
        pid: PathId,
        url: &str,
        backpressure: BackpressureConfig,
        connect_timeout: Duration,
        abort: &AbortRaiser,
    ) -> Result<SinglePath, PathError> {
        let connecting = tokio::time::timeout(connect_timeout, connect_async(url));
        let (ws, _response) = tokio::select! {
            biased;
            _ = abort.aborted() => return Err(PathError::Aborted),
            result = connecting => match result {
                Err(_) => return Err(PathError::ConnectTimeout),
                Ok(Err(error)) => return Err(PathError::ConnectFailed(error.to_string())),
                Ok(Ok(connected)) => connected,
            },
        };
        debug!(pid, url, "WebSocket path connected");
        Ok(Self::from_stream(pid, ws, backpressure))
    }

    /// Wrap an established WebSocket as path `pid`.
    pub fn from_stream<S>(
        pid: PathId,
        ws: WebSocketStream<S>,
        backpressure: BackpressureConfig,
    ) -> SinglePath
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let closer = Arc::new(WebSocketCloser::new());
        let buffer = WriteBuffer::new(backpressure);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(send_loop(pid, sink, rx, buffer.clone(), closer.clone()));

        let reader = futures::stream::unfold(Some(stream), |state| async move {
            let mut stream = state?;
            loop {
                match stream.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        return Some((Ok(data.to_vec()), Some(stream)));
                    }
                    Some(Ok(Message::Text(_))) => {
                        return Some((Err(PathError::UnexpectedText), None));
                    }
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(_)) => continue,
                    Some(Err(error)) => return Some((Err(error.into()), None)),
                }
            }
        })
        .take_until(closer.closed.clone().cancelled_owned())
        .boxed();

        let writer = Box::new(WebSocketWriter {
            tx,
            buffer,
            closed: closer.closed.clone(),
        });
        SinglePath::new(pid, reader, writer, closer)
    }
}

async fn send_loop<S>(
    pid: PathId,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    buffer: WriteBuffer,
    closer: Arc<WebSocketCloser>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = closer.closed.cancelled() => break,
            chunk = rx.recv() => {
                // Writer dropped
                let Some(chunk) = chunk else { break };
                let len = chunk.len();
                let sent = tokio::select! {
                    biased;
                    _ = closer.closed.cancelled() => break,
                    sent = sink.send(Message::Binary(chunk.into())) => sent,
                };
                buffer.drained(len);
                if let Err(error) = sent {
                    debug!(pid, %error, "WebSocket send failed");
                    break;
                }
            }
        }
    }

    closer.close(CloseCause::Normal);
    let cause = closer.cause().unwrap_or_default();
    trace!(pid, code = cause.code(), "Sending close frame");
    let frame = CloseFrame {
        code: CloseCode::from(cause.code()),
        reason: cause.reason().to_string().into(),
    };
    let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, async {
        sink.send(Message::Close(Some(frame))).await?;
        sink.close().await
    })
    .await;
}

struct WebSocketWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    buffer: WriteBuffer,
    closed: CancellationToken,
}

#[async_trait]
impl PathWrite for WebSocketWriter {
    async fn write(&mut self, chunk: Vec<u8>) -> Result<(), PathError> {
        if self.closed.is_cancelled() {
            return Err(PathError::Closed);
        }
        let len = chunk.len();
        self.buffer.enqueued(len);
        if self.tx.send(chunk).is_err() {
            self.buffer.drained(len);
            return Err(PathError::Closed);
        }
        self.buffer.settle(&self.closed).await
    }
}

/// Close handle of a WebSocket path.
#[derive(Debug)]
pub struct WebSocketCloser {
    closed: CancellationToken,
    cause: Mutex<Option<CloseCause>>,
}

impl WebSocketCloser {
    fn new() -> Self {
        Self {
            closed: CancellationToken::new(),
            cause: Mutex::new(None),
        }
    }

    /// Cause of the first close, if closed.
    pub fn cause(&self) -> Option<CloseCause> {
        *self.cause.lock()
    }
}

impl PathClose for WebSocketCloser {
    fn close(&self, cause: CloseCause) {
        {
            let mut recorded = self.cause.lock();
            if recorded.is_some() {
                return;
            }
            *recorded = Some(cause);
        }
        self.closed.cancel();
    }
}
