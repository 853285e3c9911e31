//! In-process paths.
//!
//! A connected pair of paths backed by bounded channels. Used to drive both
//! sides of a rendezvous inside one process, and by tests.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::path::{CloseCause, PathClose, PathWrite, SinglePath};
use crate::core::{PathError, PathId};

/// Create two connected in-process paths sharing `pid`.
///
/// Each direction buffers at most `capacity` chunks, so a writer waits once
/// the peer stops reading. Closing either end closes both.
pub fn pair(pid: PathId, capacity: usize) -> (SinglePath, SinglePath) {
    let capacity = capacity.max(1);
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    let closer = Arc::new(MemoryCloser::new());

    let a = end(pid, b_rx, a_tx, closer.clone());
    let b = end(pid, a_rx, b_tx, closer);
    (a, b)
}

fn end(
    pid: PathId,
    rx: mpsc::Receiver<Vec<u8>>,
    tx: mpsc::Sender<Vec<u8>>,
    closer: Arc<MemoryCloser>,
) -> SinglePath {
    let reader = futures::stream::unfold(rx, |mut rx| async move {
        let chunk = rx.recv().await?;
        Some((Ok(chunk), rx))
    })
    .take_until(closer.closed.clone().cancelled_owned())
    .boxed();

    let writer = Box::new(MemoryWriter {
        tx,
        closed: closer.closed.clone(),
    });
    SinglePath::new(pid, reader, writer, closer)
}

struct MemoryWriter {
    tx: mpsc::Sender<Vec<u8>>,
    closed: CancellationToken,
}

#[async_trait]
impl PathWrite for MemoryWriter {
    async fn write(&mut self, chunk: Vec<u8>) -> Result<(), PathError> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(PathError::Closed),
            sent = self.tx.send(chunk) => sent.map_err(|_| PathError::Closed),
        }
    }
}

/// Close handle shared by both ends of a memory pair.
#[derive(Debug)]
pub struct MemoryCloser {
    closed: CancellationToken,
    cause: Mutex<Option<CloseCause>>,
}

impl MemoryCloser {
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

impl PathClose for MemoryCloser {
    fn close(&self, cause: CloseCause) {
        {
            let mut recorded = self.cause.lock();
            if recorded.is_some() {
                return;
            }
            *recorded = Some(cause);
        }
        trace!(code = cause.code(), "Closing memory path");
        self.closed.cancel();
    }
}
