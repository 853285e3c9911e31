//! Rendezvous driver and the nominated connection.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::config::RendezvousConfig;
use super::handshake::{Handshake, HandshakeAction, HandshakeEvent};
use crate::core::{
    AbortCause, AbortRaiser, EngineError, HandshakePhase, PathId, RendezvousError,
    RendezvousResult, RoomPhraseHash, ULP_CHUNK_SIZE,
};
use crate::engine::{EngineSetup, PathProcessResult, ProtocolEngine};
use crate::transport::{NominatedReader, NominatedWriter, PathMultiplexer, SinglePath};

#[cfg(feature = "engine")]
use crate::engine::RendezvousProtocol;
#[cfg(feature = "websocket")]
use crate::transport::WebSocketPath;

/// One rendezvous attempt.
///
/// Collect paths, then [`connect`](Self::connect). An attempt is single-shot:
/// after a failure, start over with fresh paths and a fresh key.
pub struct Rendezvous {
    config: RendezvousConfig,
    abort: AbortRaiser,
    paths: Vec<SinglePath>,
}

impl Rendezvous {
    /// Create an attempt without paths.
    pub fn new(config: RendezvousConfig) -> Self {
        Self {
            config,
            abort: AbortRaiser::new(),
            paths: Vec::new(),
        }
    }

    /// Handle to cancel the attempt, or the connection it produces.
    pub fn abort_handle(&self) -> AbortRaiser {
        self.abort.clone()
    }

    /// The configuration of this attempt.
    pub fn config(&self) -> &RendezvousConfig {
        &self.config
    }

    /// Add already established paths.
    pub fn with_paths(mut self, paths: impl IntoIterator<Item = SinglePath>) -> Self {
        self.paths.extend(paths);
        self
    }

    /// Connect every configured path concurrently.
    ///
    /// Paths that fail to connect are logged and skipped. Fails only if none
    /// connects or the attempt is aborted meanwhile.
    #[cfg(feature = "websocket")]
    pub async fn connect_websockets(mut self) -> RendezvousResult<Self> {
        if self.config.paths.is_empty() {
            return Err(RendezvousError::Config(
                "at least one path is required".into(),
            ));
        }
        let config = &self.config;
        let abort = &self.abort;
        let attempts = config.paths.iter().map(|path| async move {
            let result = WebSocketPath::connect(
                path.pid,
                &path.url,
                config.backpressure,
                config.connect_timeout,
                abort,
            )
            .await;
            (path.pid, result)
        });

        let mut connected = Vec::new();
        for (pid, result) in futures::future::join_all(attempts).await {
            match result {
                Ok(path) => connected.push(path),
                Err(error) => warn!(pid, %error, "Path failed to connect"),
            }
        }

        if let Some(cause) = self.abort.cause() {
            for path in &connected {
                path.close(cause.into());
            }
            return Err(RendezvousError::from_abort(cause));
        }
        if connected.is_empty() && self.paths.is_empty() {
            warn!("All paths closed, aborting protocol");
            self.abort.raise(AbortCause::NoPathsRemaining);
            return Err(RendezvousError::NoPathsRemaining);
        }
        debug!(connected = connected.len(), "Paths connected");
        self.paths.extend(connected);
        Ok(self)
    }

    /// Run the rendezvous with the reference engine.
    #[cfg(feature = "engine")]
    pub async fn connect_default(self) -> RendezvousResult<ConnectResult<RendezvousProtocol>> {
        self.connect(RendezvousProtocol::new).await
    }

    /// Run the rendezvous with the engine built by `make_engine`.
    ///
    /// On error every path has been closed and the abort signal raised.
    pub async fn connect<E, F>(self, make_engine: F) -> RendezvousResult<ConnectResult<E>>
    where
        E: ProtocolEngine,
        F: FnOnce(&EngineSetup<'_>) -> Result<E, EngineError>,
    {
        let Self {
            config,
            abort,
            paths,
        } = self;
        let result = drive(&config, abort.clone(), paths, make_engine).await;
        if let Err(error) = &result {
            abort.raise(error.abort_cause());
            error!(role = %config.role, %error, "Rendezvous failed");
        }
        result
    }
}

impl fmt::Debug for Rendezvous {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rendezvous")
            .field("role", &self.config.role)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

async fn drive<E, F>(
    config: &RendezvousConfig,
    abort: AbortRaiser,
    paths: Vec<SinglePath>,
    make_engine: F,
) -> RendezvousResult<ConnectResult<E>>
where
    E: ProtocolEngine,
    F: FnOnce(&EngineSetup<'_>) -> Result<E, EngineError>,
{
    let pids: Vec<PathId> = paths.iter().map(SinglePath::pid).collect();
    let mut mux = PathMultiplexer::new(paths, abort.clone())?;

    // Raise before the multiplexer drops, so paths close with the real cause
    let (pid, rph, engine) = race(config, &pids, &mut mux, make_engine)
        .await
        .inspect_err(|error| {
            abort.raise(error.abort_cause());
        })?;

    let (reader, writer) = mux.nominate(pid)?.into_split();
    let engine = Arc::new(Mutex::new(engine));
    let connection = RendezvousConnection {
        reader: RendezvousReader {
            pid,
            engine: engine.clone(),
            path: reader,
            abort: abort.clone(),
        },
        writer: RendezvousWriter {
            pid,
            engine,
            path: writer,
            abort: abort.clone(),
        },
        abort,
    };
    Ok(ConnectResult { rph, connection })
}

/// Run the handshake until a path is nominated.
async fn race<E, F>(
    config: &RendezvousConfig,
    pids: &[PathId],
    mux: &mut PathMultiplexer,
    make_engine: F,
) -> RendezvousResult<(PathId, RoomPhraseHash, E)>
where
    E: ProtocolEngine,
    F: FnOnce(&EngineSetup<'_>) -> Result<E, EngineError>,
{
    let setup = EngineSetup {
        role: config.role,
        is_nominator: config.is_nominator,
        ak: &config.ak,
        pids,
    };
    let engine = make_engine(&setup).map_err(|source| RendezvousError::Engine {
        phase: HandshakePhase::Initializing,
        pid: None,
        operation: "create engine",
        source,
    })?;
    debug!(role = %config.role, nominator = config.is_nominator, paths = ?pids, "Starting rendezvous");

    let mut handshake = Handshake::new(engine, config.nomination);
    for action in handshake.start()? {
        if let HandshakeAction::Send { pid, frame } = action {
            mux.write(pid, frame).await?;
        }
    }

    loop {
        let event = match handshake.nomination_deadline() {
            Some(deadline) => tokio::select! {
                biased;
                event = mux.recv() => {
                    let (pid, chunk) = event?;
                    HandshakeEvent::Frame { pid, chunk }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    HandshakeEvent::NominationDeadline { live: mux.pids() }
                }
            },
            None => {
                let (pid, chunk) = mux.recv().await?;
                HandshakeEvent::Frame { pid, chunk }
            }
        };

        let mut winner = None;
        for action in handshake.handle(event, Instant::now())? {
            match action {
                HandshakeAction::Send { pid, frame } => mux.write(pid, frame).await?,
                HandshakeAction::Nominated { pid, rph } => winner = Some((pid, rph)),
            }
        }
        if let Some((pid, rph)) = winner {
            return Ok((pid, rph, handshake.into_engine()));
        }
    }
}

/// Outcome of a successful rendezvous.
pub struct ConnectResult<E> {
    /// Rendezvous Path Hash both devices agreed on.
    pub rph: RoomPhraseHash,
    /// Encrypted connection over the nominated path.
    pub connection: RendezvousConnection<E>,
}

impl<E> fmt::Debug for ConnectResult<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectResult")
            .field("rph", &self.rph)
            .field("connection", &self.connection)
            .finish()
    }
}

/// ULP data stream over the nominated path.
pub struct RendezvousConnection<E> {
    reader: RendezvousReader<E>,
    writer: RendezvousWriter<E>,
    abort: AbortRaiser,
}

impl<E: ProtocolEngine> RendezvousConnection<E> {
    /// Id of the nominated path.
    pub fn pid(&self) -> PathId {
        self.reader.pid
    }

    /// Encrypt and send `data`.
    pub async fn send(&mut self, data: &[u8]) -> RendezvousResult<()> {
        self.writer.send(data).await
    }

    /// Receive the next ULP payload. `Ok(None)` once the path has ended.
    pub async fn recv(&mut self) -> RendezvousResult<Option<Vec<u8>>> {
        self.reader.recv().await
    }

    /// Split into independently owned halves.
    ///
    /// The path is closed once both halves are dropped.
    pub fn split(self) -> (RendezvousReader<E>, RendezvousWriter<E>) {
        (self.reader, self.writer)
    }

    /// The abort signal of this connection.
    pub fn abort_handle(&self) -> &AbortRaiser {
        &self.abort
    }

    /// Close the connection and its path.
    pub fn close(self) {
        if self.abort.raise(AbortCause::Closed) {
            debug!(pid = self.reader.pid, "Connection closed");
        }
    }
}

impl<E> fmt::Debug for RendezvousConnection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousConnection")
            .field("pid", &self.reader.pid)
            .field("aborted", &self.abort.cause())
            .finish()
    }
}

fn fail(abort: &AbortRaiser, error: RendezvousError) -> RendezvousError {
    abort.raise(error.abort_cause());
    error!(%error, "Connection failed");
    error
}

/// Inbound half of a [`RendezvousConnection`].
pub struct RendezvousReader<E> {
    pid: PathId,
    engine: Arc<Mutex<E>>,
    path: NominatedReader,
    abort: AbortRaiser,
}

impl<E: ProtocolEngine> RendezvousReader<E> {
    /// Receive the next ULP payload. `Ok(None)` once the path has ended.
    ///
    /// Frames the engine buffered before nomination completed come first.
    pub async fn recv(&mut self) -> RendezvousResult<Option<Vec<u8>>> {
        loop {
            let processed = self.engine.lock().process_frame(self.pid);
            let processed = processed.map_err(|source| self.engine_error("process frame", source))?;
            if let Some(result) = processed {
                return self.accept(result).map(Some);
            }

            let Some(chunk) = self.path.read().await? else {
                debug!(pid = self.pid, "Nominated path ended");
                return Ok(None);
            };
            let added = self.engine.lock().add_chunk(self.pid, &chunk);
            added.map_err(|source| self.engine_error("add chunk", source))?;
        }
    }

    fn accept(&self, result: PathProcessResult) -> RendezvousResult<Vec<u8>> {
        match result {
            PathProcessResult {
                state_update: None,
                outgoing_frame: None,
                incoming_ulp_data: Some(data),
            } => {
                trace!(pid = self.pid, len = data.len(), "ULP data received");
                Ok(data)
            }
            _ => Err(fail(
                &self.abort,
                RendezvousError::ContractViolation {
                    phase: HandshakePhase::Nominated,
                    reason: "frame did not yield exactly one ULP payload",
                },
            )),
        }
    }

    fn engine_error(&self, operation: &'static str, source: EngineError) -> RendezvousError {
        fail(
            &self.abort,
            RendezvousError::Engine {
                phase: HandshakePhase::Nominated,
                pid: Some(self.pid),
                operation,
                source,
            },
        )
    }
}

impl<E> fmt::Debug for RendezvousReader<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousReader")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Outbound half of a [`RendezvousConnection`].
pub struct RendezvousWriter<E> {
    pid: PathId,
    engine: Arc<Mutex<E>>,
    path: NominatedWriter,
    abort: AbortRaiser,
}

impl<E: ProtocolEngine> RendezvousWriter<E> {
    /// Encrypt and send `data`.
    ///
    /// The frame is written in chunks of at most [`ULP_CHUNK_SIZE`] bytes.
    pub async fn send(&mut self, data: &[u8]) -> RendezvousResult<()> {
        if let Some(cause) = self.abort.cause() {
            return Err(RendezvousError::from_abort(cause));
        }
        let created = self.engine.lock().create_ulp_frame(data);
        let frame = match created {
            Ok(PathProcessResult {
                state_update: None,
                outgoing_frame: Some(frame),
                incoming_ulp_data: None,
            }) => frame,
            Ok(_) => {
                return Err(fail(
                    &self.abort,
                    RendezvousError::ContractViolation {
                        phase: HandshakePhase::Nominated,
                        reason: "ULP frame creation did not yield exactly one frame",
                    },
                ));
            }
            Err(source) => {
                return Err(fail(
                    &self.abort,
                    RendezvousError::Engine {
                        phase: HandshakePhase::Nominated,
                        pid: Some(self.pid),
                        operation: "create ULP frame",
                        source,
                    },
                ));
            }
        };

        trace!(pid = self.pid, len = data.len(), "ULP data sent");
        for chunk in frame.chunks(ULP_CHUNK_SIZE) {
            self.path.write(chunk.to_vec()).await?;
        }
        Ok(())
    }
}

impl<E> fmt::Debug for RendezvousWriter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousWriter")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}
