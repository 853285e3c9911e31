//! Path multiplexer.
//!
//! Owns every candidate path of an attempt. One pump task per path drains
//! its reader into a single-slot queue, so the consumer sees one ordered
//! sequence of `(pid, frame)` events and a pump blocks on the queue before
//! it blocks on the network.
//!
//! Ownership of the paths' close handles lives in one table shared by the
//! pumps, the abort watcher and the consumer. Every close is taken out of
//! that table under its lock, so each path is closed exactly once no matter
//! which of them gets there first.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::path::{CloseCause, PathCloser, PathReader, PathWriter, SinglePath};
use crate::core::{
    AbortCause, AbortRaiser, HandshakePhase, MULTIPLEXER_QUEUE_CAPACITY, PathError, PathId,
    RendezvousError, RendezvousResult,
};

type Event = (PathId, Vec<u8>);

enum Ownership {
    /// Before nomination: every path still in the race.
    Racing(HashMap<PathId, PathCloser>),
    /// After nomination: only the winner, until it is closed.
    Nominated {
        pid: PathId,
        closer: Option<PathCloser>,
    },
    /// Everything closed.
    Released,
}

impl Ownership {
    fn owns(&self, pid: PathId) -> bool {
        match self {
            Ownership::Racing(paths) => paths.contains_key(&pid),
            Ownership::Nominated {
                pid: winner,
                closer,
            } => *winner == pid && closer.is_some(),
            Ownership::Released => false,
        }
    }

    fn pids(&self) -> Vec<PathId> {
        let mut pids = match self {
            Ownership::Racing(paths) => paths.keys().copied().collect(),
            Ownership::Nominated {
                pid,
                closer: Some(_),
            } => vec![*pid],
            _ => Vec::new(),
        };
        pids.sort_unstable();
        pids
    }

    fn release(&mut self) -> Vec<PathCloser> {
        match std::mem::replace(self, Ownership::Released) {
            Ownership::Racing(paths) => paths.into_values().collect(),
            Ownership::Nominated { closer, .. } => closer.into_iter().collect(),
            Ownership::Released => Vec::new(),
        }
    }
}

struct Shared {
    ownership: Mutex<Ownership>,
    abort: AbortRaiser,
}

enum PumpExit {
    Ended,
    Failed(PathError),
    QueueClosed,
}

impl Shared {
    /// Drop `pid` after its transport ended or failed.
    fn prune(&self, pid: PathId, failure: Option<PathError>) {
        let mut ownership = self.ownership.lock();
        let (closer, last, winner) = match &mut *ownership {
            Ownership::Racing(paths) => match paths.remove(&pid) {
                Some(closer) => (Some(closer), paths.is_empty(), false),
                None => return,
            },
            Ownership::Nominated {
                pid: winner,
                closer,
            } if *winner == pid => (closer.take(), false, true),
            _ => return,
        };
        if last {
            *ownership = Ownership::Released;
        }
        drop(ownership);

        if let Some(closer) = closer {
            closer.close(CloseCause::Normal);
        }

        match (winner, failure) {
            (false, Some(error)) => warn!(pid, %error, "Path failed, removing"),
            (false, None) => debug!(pid, "Path ended, removing"),
            (true, Some(error)) => {
                warn!(pid, %error, "Nominated path failed");
                self.abort.raise(AbortCause::PathFailed(pid));
            }
            (true, None) => debug!(pid, "Nominated path ended"),
        }

        if last {
            warn!("All paths closed, aborting protocol");
            self.abort.raise(AbortCause::NoPathsRemaining);
        }
    }

    fn is_owned(&self, pid: PathId) -> bool {
        self.ownership.lock().owns(pid)
    }
}

async fn pump(pid: PathId, mut reader: PathReader, queue: mpsc::Sender<Event>, shared: Arc<Shared>) {
    let exit = loop {
        let next = tokio::select! {
            biased;
            _ = shared.abort.aborted() => return,
            next = reader.next() => next,
        };
        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(error)) => break PumpExit::Failed(error),
            None => break PumpExit::Ended,
        };

        let permit = tokio::select! {
            biased;
            _ = shared.abort.aborted() => return,
            permit = queue.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break PumpExit::QueueClosed,
            },
        };

        // Forward only while the path is still owned, checked under the
        // same lock nomination takes
        let ownership = shared.ownership.lock();
        if !ownership.owns(pid) {
            trace!(pid, "Dropping frame of released path");
            return;
        }
        permit.send((pid, chunk));
    };

    match exit {
        PumpExit::Ended => shared.prune(pid, None),
        PumpExit::Failed(error) => shared.prune(pid, Some(error)),
        PumpExit::QueueClosed => {
            debug!(pid, "Multiplexer queue closed");
            shared.abort.raise(AbortCause::Closed);
        }
    }
}

async fn close_on_abort(shared: Arc<Shared>) {
    let cause = shared.abort.aborted().await;
    let closers = shared.ownership.lock().release();
    if closers.is_empty() {
        return;
    }
    debug!(%cause, count = closers.len(), "Closing remaining paths");
    let close = CloseCause::from(cause);
    for closer in closers {
        closer.close(close);
    }
}

/// Races a set of paths over one ordered event queue until one is nominated.
pub struct PathMultiplexer {
    shared: Arc<Shared>,
    queue: Option<mpsc::Receiver<Event>>,
    writers: HashMap<PathId, PathWriter>,
}

impl PathMultiplexer {
    /// Take ownership of `paths`.
    ///
    /// Rejects an empty set and duplicate path ids. Must be called within a
    /// Tokio runtime.
    pub fn new(paths: Vec<SinglePath>, abort: AbortRaiser) -> RendezvousResult<Self> {
        if paths.is_empty() {
            return Err(RendezvousError::Config(
                "at least one path is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = paths.iter().map(SinglePath::pid).find(|&pid| !seen.insert(pid)) {
            for path in &paths {
                path.close(CloseCause::Normal);
            }
            return Err(RendezvousError::Config(format!(
                "duplicate path id {duplicate}"
            )));
        }

        let (tx, rx) = mpsc::channel(MULTIPLEXER_QUEUE_CAPACITY);
        let mut closers = HashMap::with_capacity(paths.len());
        let mut writers = HashMap::with_capacity(paths.len());
        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            let pid = path.pid();
            let (reader, writer, closer) = path.into_parts();
            closers.insert(pid, closer);
            writers.insert(pid, writer);
            readers.push((pid, reader));
        }

        let shared = Arc::new(Shared {
            ownership: Mutex::new(Ownership::Racing(closers)),
            abort,
        });
        debug!(paths = ?shared.ownership.lock().pids(), "Multiplexing paths");

        for (pid, reader) in readers {
            tokio::spawn(pump(pid, reader, tx.clone(), shared.clone()));
        }
        tokio::spawn(close_on_abort(shared.clone()));

        Ok(Self {
            shared,
            queue: Some(rx),
            writers,
        })
    }

    /// Ids of the paths still in the race.
    pub fn pids(&self) -> Vec<PathId> {
        self.shared.ownership.lock().pids()
    }

    /// The cancellation signal of this attempt.
    pub fn abort(&self) -> &AbortRaiser {
        &self.shared.abort
    }

    /// Receive the next inbound frame of any path still in the race.
    ///
    /// Frames that were queued before their path was pruned are discarded.
    pub async fn recv(&mut self) -> RendezvousResult<Event> {
        let shared = &self.shared;
        let Some(queue) = self.queue.as_mut() else {
            return Err(RendezvousError::Closed);
        };
        loop {
            let event = tokio::select! {
                biased;
                cause = shared.abort.aborted() => return Err(RendezvousError::from_abort(cause)),
                event = queue.recv() => event,
            };
            let Some((pid, chunk)) = event else {
                return Err(RendezvousError::from_abort(
                    shared.abort.cause().unwrap_or(AbortCause::NoPathsRemaining),
                ));
            };
            if shared.is_owned(pid) {
                return Ok((pid, chunk));
            }
            trace!(pid, "Discarding frame of pruned path");
        }
    }

    /// Write a frame to path `pid`.
    ///
    /// Frames for unknown or pruned paths are dropped. A failing write prunes
    /// the path like a failing read does.
    pub async fn write(&mut self, pid: PathId, frame: Vec<u8>) -> RendezvousResult<()> {
        let abort = &self.shared.abort;
        if let Some(cause) = abort.cause() {
            return Err(RendezvousError::from_abort(cause));
        }
        if !self.shared.is_owned(pid) {
            self.writers.remove(&pid);
            warn!(pid, "Dropping frame for unknown or pruned path");
            return Ok(());
        }
        let Some(writer) = self.writers.get_mut(&pid) else {
            warn!(pid, "Dropping frame for unknown or pruned path");
            return Ok(());
        };

        let result = tokio::select! {
            biased;
            cause = abort.aborted() => return Err(RendezvousError::from_abort(cause)),
            result = writer.write(frame) => result,
        };
        if let Err(error) = result {
            self.writers.remove(&pid);
            self.shared.prune(pid, Some(error));
        }
        Ok(())
    }

    /// Keep path `pid` and close all others.
    ///
    /// Frames of other paths still waiting in the queue predate the
    /// nomination and are discarded. Afterwards the returned path only
    /// accepts frames of `pid`.
    pub fn nominate(mut self, pid: PathId) -> RendezvousResult<NominatedPath> {
        let abort = self.shared.abort.clone();
        let (owned, losers) = {
            let mut ownership = self.shared.ownership.lock();
            match std::mem::replace(&mut *ownership, Ownership::Released) {
                Ownership::Racing(mut paths) => {
                    let winner = paths.remove(&pid);
                    let owned = winner.is_some();
                    if owned {
                        *ownership = Ownership::Nominated {
                            pid,
                            closer: winner,
                        };
                    }
                    (owned, paths)
                }
                other => {
                    *ownership = other;
                    drop(ownership);
                    let cause = abort.cause().unwrap_or(AbortCause::Closed);
                    return Err(RendezvousError::from_abort(cause));
                }
            }
        };

        for (loser, closer) in losers {
            self.writers.remove(&loser);
            debug!(pid = loser, "Pruning path");
            closer.close(CloseCause::Normal);
        }

        let writer = self.writers.remove(&pid);
        self.writers.clear();
        let (Some(writer), true) = (writer, owned) else {
            warn!(pid, "Nominated path is no longer available");
            abort.raise(AbortCause::PathFailed(pid));
            return Err(RendezvousError::NominatedPathLost { pid });
        };
        let Some(mut queue) = self.queue.take() else {
            return Err(RendezvousError::Closed);
        };

        let mut pending = VecDeque::new();
        while let Ok((from, frame)) = queue.try_recv() {
            if from == pid {
                pending.push_back(frame);
            } else {
                trace!(pid = from, "Discarding frame of pruned path");
            }
        }

        info!(pid, "Nominated path");
        let release = Arc::new(Release {
            shared: self.shared.clone(),
        });
        Ok(NominatedPath {
            reader: NominatedReader {
                pid,
                queue,
                pending,
                abort: abort.clone(),
                _release: release.clone(),
            },
            writer: NominatedWriter {
                pid,
                writer,
                abort,
                _release: release,
            },
        })
    }
}

impl Drop for PathMultiplexer {
    fn drop(&mut self) {
        if self.queue.is_some() {
            self.shared.abort.raise(AbortCause::Closed);
        }
    }
}

impl fmt::Debug for PathMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathMultiplexer")
            .field("pids", &self.pids())
            .finish_non_exhaustive()
    }
}

/// Closes the nominated path once both halves are gone.
struct Release {
    shared: Arc<Shared>,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.shared.abort.raise(AbortCause::Closed);
    }
}

/// The path that won the race.
#[derive(Debug)]
pub struct NominatedPath {
    reader: NominatedReader,
    writer: NominatedWriter,
}

impl NominatedPath {
    /// Id of the nominated path.
    pub fn pid(&self) -> PathId {
        self.reader.pid
    }

    /// Inbound side.
    pub fn reader(&mut self) -> &mut NominatedReader {
        &mut self.reader
    }

    /// Outbound side.
    pub fn writer(&mut self) -> &mut NominatedWriter {
        &mut self.writer
    }

    /// Split into independently owned halves.
    pub fn into_split(self) -> (NominatedReader, NominatedWriter) {
        (self.reader, self.writer)
    }
}

/// Inbound side of the nominated path.
pub struct NominatedReader {
    pid: PathId,
    queue: mpsc::Receiver<Event>,
    pending: VecDeque<Vec<u8>>,
    abort: AbortRaiser,
    _release: Arc<Release>,
}

impl NominatedReader {
    /// Id of the nominated path.
    pub fn pid(&self) -> PathId {
        self.pid
    }

    /// Read the next chunk. `Ok(None)` once the path has ended.
    ///
    /// A frame tagged with any other path is a protocol violation and aborts
    /// the connection.
    pub async fn read(&mut self) -> RendezvousResult<Option<Vec<u8>>> {
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(Some(chunk));
        }
        let event = tokio::select! {
            biased;
            cause = self.abort.aborted() => return Err(RendezvousError::from_abort(cause)),
            event = self.queue.recv() => event,
        };
        match event {
            Some((pid, chunk)) if pid == self.pid => Ok(Some(chunk)),
            Some((pid, _)) => {
                error!(pid, nominated = self.pid, "Frame received on non-nominated path");
                self.abort.raise(AbortCause::ProtocolError);
                Err(RendezvousError::ProtocolViolation {
                    phase: HandshakePhase::Nominated,
                    pid,
                    reason: "frame received on a non-nominated path",
                })
            }
            None => match self.abort.cause() {
                Some(cause) => Err(RendezvousError::from_abort(cause)),
                None => Ok(None),
            },
        }
    }
}

impl fmt::Debug for NominatedReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NominatedReader")
            .field("pid", &self.pid)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Outbound side of the nominated path.
pub struct NominatedWriter {
    pid: PathId,
    writer: PathWriter,
    abort: AbortRaiser,
    _release: Arc<Release>,
}

impl NominatedWriter {
    /// Id of the nominated path.
    pub fn pid(&self) -> PathId {
        self.pid
    }

    /// Write a chunk to the nominated path.
    ///
    /// A failing write aborts the connection.
    pub async fn write(&mut self, chunk: Vec<u8>) -> RendezvousResult<()> {
        if let Some(cause) = self.abort.cause() {
            return Err(RendezvousError::from_abort(cause));
        }
        let result = tokio::select! {
            biased;
            cause = self.abort.aborted() => return Err(RendezvousError::from_abort(cause)),
            result = self.writer.write(chunk) => result,
        };
        result.map_err(|source| {
            warn!(pid = self.pid, error = %source, "Nominated path write failed");
            self.abort.raise(AbortCause::PathFailed(self.pid));
            RendezvousError::Transport {
                pid: self.pid,
                source,
            }
        })
    }
}

impl fmt::Debug for NominatedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NominatedWriter")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}
