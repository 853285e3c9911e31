//! Test tooling: instrumented paths and a scripted protocol engine.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{EngineError, PathError, PathId, RoomPhraseHash};
use crate::engine::{OutgoingFrame, PathProcessResult, PathStateUpdate, ProtocolEngine};
use crate::transport::{CloseCause, PathClose, PathWrite, SinglePath};

/// Install a tracing subscriber honouring `RUST_LOG`, once.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Inbound = mpsc::UnboundedSender<Result<Vec<u8>, PathError>>;

/// Remote-side control of a path created by [`test_path`].
pub(crate) struct PathHandle {
    pid: PathId,
    inbound: Mutex<Option<Inbound>>,
    written: mpsc::UnboundedReceiver<Vec<u8>>,
    closes: Arc<Mutex<Vec<CloseCause>>>,
    closed: CancellationToken,
    fail_writes: Arc<AtomicBool>,
}

impl PathHandle {
    /// Deliver a chunk to the path's reader.
    pub fn feed(&self, chunk: impl Into<Vec<u8>>) {
        if let Some(inbound) = self.inbound.lock().as_ref() {
            let _ = inbound.send(Ok(chunk.into()));
        }
    }

    /// Make the path's reader fail.
    pub fn fail(&self) {
        if let Some(inbound) = self.inbound.lock().take() {
            let _ = inbound.send(Err(PathError::ConnectFailed(format!(
                "path {} failed",
                self.pid
            ))));
        }
    }

    /// End the path's reader cleanly.
    pub fn end(&self) {
        self.inbound.lock().take();
    }

    /// Make every further write fail.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Wait for the next chunk written to the path.
    pub async fn next_write(&mut self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), self.written.recv())
            .await
            .expect("timed out waiting for a write")
            .expect("writer dropped")
    }

    /// Chunks written so far and not yet taken.
    pub fn take_written(&mut self) -> Vec<Vec<u8>> {
        let mut written = Vec::new();
        while let Ok(chunk) = self.written.try_recv() {
            written.push(chunk);
        }
        written
    }

    /// Every close call, in order.
    pub fn closes(&self) -> Vec<CloseCause> {
        self.closes.lock().clone()
    }

    /// Number of close calls.
    pub fn close_count(&self) -> usize {
        self.closes.lock().len()
    }

    /// Wait until the path has been closed.
    pub async fn wait_closed(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.closed.cancelled())
            .await
            .expect("timed out waiting for close");
    }
}

/// An instrumented path.
///
/// Unlike real transports, every close call is recorded, so tests can
/// assert a path is closed exactly once.
pub(crate) fn test_path(pid: PathId) -> (SinglePath, PathHandle) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (written_tx, written_rx) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();
    let closes = Arc::new(Mutex::new(Vec::new()));
    let fail_writes = Arc::new(AtomicBool::new(false));

    let reader = futures::stream::unfold(inbound_rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    })
    .take_until(closed.clone().cancelled_owned())
    .boxed();
    let writer = Box::new(TestWriter {
        written: written_tx,
        closed: closed.clone(),
        fail: fail_writes.clone(),
    });
    let closer = Arc::new(TestCloser {
        closes: closes.clone(),
        closed: closed.clone(),
    });

    let path = SinglePath::new(pid, reader, writer, closer);
    let handle = PathHandle {
        pid,
        inbound: Mutex::new(Some(inbound_tx)),
        written: written_rx,
        closes,
        closed,
        fail_writes,
    };
    (path, handle)
}

struct TestWriter {
    written: mpsc::UnboundedSender<Vec<u8>>,
    closed: CancellationToken,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl PathWrite for TestWriter {
    async fn write(&mut self, chunk: Vec<u8>) -> Result<(), PathError> {
        if self.closed.is_cancelled() || self.fail.load(Ordering::SeqCst) {
            return Err(PathError::Closed);
        }
        self.written.send(chunk).map_err(|_| PathError::Closed)
    }
}

struct TestCloser {
    closes: Arc<Mutex<Vec<CloseCause>>>,
    closed: CancellationToken,
}

impl PathClose for TestCloser {
    fn close(&self, cause: CloseCause) {
        self.closes.lock().push(cause);
        self.closed.cancel();
    }
}

type FrameScript =
    Box<dyn FnMut(PathId, &[u8]) -> Result<PathProcessResult, EngineError> + Send>;
type NominateScript = Box<dyn FnMut(PathId) -> Result<PathProcessResult, EngineError> + Send>;

/// An engine whose handshake behaviour is scripted per test.
///
/// Every chunk is one frame. After nomination, frames on the nominated path
/// are returned as ULP data and ULP data is sent unchanged.
pub(crate) struct ScriptedEngine {
    initial: Vec<OutgoingFrame>,
    pending: VecDeque<(PathId, Vec<u8>)>,
    on_frame: FrameScript,
    on_nominate: NominateScript,
    is_nominator: bool,
    nominated: Option<PathId>,
    nominate_calls: Arc<Mutex<Vec<PathId>>>,
}

impl ScriptedEngine {
    pub fn new(is_nominator: bool) -> Self {
        Self {
            initial: Vec::new(),
            pending: VecDeque::new(),
            on_frame: Box::new(|_, _| Ok(PathProcessResult::default())),
            on_nominate: Box::new(|_| Ok(PathProcessResult::update(nominated(rph(0))))),
            is_nominator,
            nominated: None,
            nominate_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_initial(mut self, frames: Vec<OutgoingFrame>) -> Self {
        self.initial = frames;
        self
    }

    pub fn on_frame<F>(mut self, script: F) -> Self
    where
        F: FnMut(PathId, &[u8]) -> Result<PathProcessResult, EngineError> + Send + 'static,
    {
        self.on_frame = Box::new(script);
        self
    }

    pub fn on_nominate<F>(mut self, script: F) -> Self
    where
        F: FnMut(PathId) -> Result<PathProcessResult, EngineError> + Send + 'static,
    {
        self.on_nominate = Box::new(script);
        self
    }

    /// Shared record of `nominate_path` calls.
    pub fn nominate_calls(&self) -> Arc<Mutex<Vec<PathId>>> {
        self.nominate_calls.clone()
    }

    fn track(&mut self, pid: PathId, result: &PathProcessResult) {
        if matches!(result.state_update, Some(PathStateUpdate::Nominated { .. })) {
            self.nominated = Some(pid);
        }
    }
}

impl ProtocolEngine for ScriptedEngine {
    fn initial_outgoing_frames(&mut self) -> Result<Vec<OutgoingFrame>, EngineError> {
        Ok(std::mem::take(&mut self.initial))
    }

    fn add_chunk(&mut self, pid: PathId, chunk: &[u8]) -> Result<(), EngineError> {
        self.pending.push_back((pid, chunk.to_vec()));
        Ok(())
    }

    fn process_frame(&mut self, pid: PathId) -> Result<Option<PathProcessResult>, EngineError> {
        let Some(index) = self.pending.iter().position(|(from, _)| *from == pid) else {
            return Ok(None);
        };
        let Some((_, frame)) = self.pending.remove(index) else {
            return Ok(None);
        };
        if self.nominated == Some(pid) {
            return Ok(Some(PathProcessResult::ulp(frame)));
        }
        let result = (self.on_frame)(pid, &frame)?;
        self.track(pid, &result);
        Ok(Some(result))
    }

    fn nominate_path(&mut self, pid: PathId) -> Result<PathProcessResult, EngineError> {
        self.nominate_calls.lock().push(pid);
        let result = (self.on_nominate)(pid)?;
        self.track(pid, &result);
        Ok(result)
    }

    fn is_nominator(&self) -> bool {
        self.is_nominator
    }

    fn create_ulp_frame(&mut self, data: &[u8]) -> Result<PathProcessResult, EngineError> {
        if self.nominated.is_none() {
            return Err(EngineError::NotNominated);
        }
        Ok(PathProcessResult::outgoing(data.to_vec()))
    }

    fn nominated_path(&self) -> Option<PathId> {
        self.nominated
    }
}

/// A recognizable path hash.
pub(crate) fn rph(byte: u8) -> RoomPhraseHash {
    RoomPhraseHash::from_bytes([byte; 32])
}

/// `AwaitingNominate` with the given RTT in milliseconds.
pub(crate) fn ready(rtt_ms: u64) -> PathStateUpdate {
    PathStateUpdate::AwaitingNominate {
        measured_rtt: Duration::from_millis(rtt_ms),
    }
}

/// `Nominated` with the given hash.
pub(crate) fn nominated(rph: RoomPhraseHash) -> PathStateUpdate {
    PathStateUpdate::Nominated { rph }
}
