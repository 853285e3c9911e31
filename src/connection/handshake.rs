//! The nomination state machine.
//!
//! `Handshake` owns the engine while the attempt is racing and turns inbound
//! events into actions for the driver. It does no I/O: the driver reads the
//! multiplexer, feeds each event in and performs the returned actions in
//! order.
//!
//! ```text
//! INITIALIZING ──start()──▶ NOMINATING ──nominated──▶ NOMINATED
//!       │                        │
//!       └────────── error ───────┴──────────▶ ABORTED
//! ```

use std::fmt;

use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::config::NominationPolicy;
use super::nomination::Nominator;
use crate::core::{
    EngineError, HandshakePhase, PathId, RendezvousError, RendezvousResult, RoomPhraseHash,
};
use crate::engine::{PathProcessResult, PathStateUpdate, ProtocolEngine};

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// A chunk arrived on `pid`.
    Frame {
        /// Path the chunk arrived on.
        pid: PathId,
        /// Raw chunk.
        chunk: Vec<u8>,
    },
    /// The nomination window closed.
    NominationDeadline {
        /// Paths still owned by the multiplexer.
        live: Vec<PathId>,
    },
}

/// Output of the state machine, to be performed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Write `frame` to `pid`.
    Send {
        /// Target path.
        pid: PathId,
        /// Encoded frame.
        frame: Vec<u8>,
    },
    /// `pid` won. Stop reading the multiplexer and nominate it.
    Nominated {
        /// Winning path.
        pid: PathId,
        /// Rendezvous Path Hash.
        rph: RoomPhraseHash,
    },
}

/// Drives a [`ProtocolEngine`] from INITIALIZING to NOMINATED.
pub struct Handshake<E> {
    engine: E,
    phase: HandshakePhase,
    nominator: Nominator,
}

impl<E: ProtocolEngine> Handshake<E> {
    /// Wrap a freshly constructed engine.
    pub fn new(engine: E, policy: NominationPolicy) -> Self {
        Self {
            engine,
            phase: HandshakePhase::Initializing,
            nominator: Nominator::new(policy),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// When the driver must deliver [`HandshakeEvent::NominationDeadline`].
    pub fn nomination_deadline(&self) -> Option<Instant> {
        match self.phase {
            HandshakePhase::Nominating => self.nominator.deadline(),
            _ => None,
        }
    }

    /// Give the engine back, e.g. to relay data after nomination.
    pub fn into_engine(self) -> E {
        self.engine
    }

    /// INITIALIZING → NOMINATING. Returns the engine's initial frames.
    pub fn start(&mut self) -> RendezvousResult<Vec<HandshakeAction>> {
        if self.phase != HandshakePhase::Initializing {
            return Err(self.violation("handshake already started"));
        }
        let frames = self
            .engine
            .initial_outgoing_frames()
            .map_err(|source| self.engine_error(None, "create initial frames", source))?;
        self.phase = HandshakePhase::Nominating;
        debug!(frames = frames.len(), "Entering nomination loop");
        Ok(frames
            .into_iter()
            .map(|frame| HandshakeAction::Send {
                pid: frame.pid,
                frame: frame.frame,
            })
            .collect())
    }

    /// Feed one event. Any error leaves the handshake ABORTED.
    pub fn handle(
        &mut self,
        event: HandshakeEvent,
        now: Instant,
    ) -> RendezvousResult<Vec<HandshakeAction>> {
        if self.phase != HandshakePhase::Nominating {
            return Err(self.violation("handshake is not nominating"));
        }
        let mut actions = Vec::new();
        let result = match event {
            HandshakeEvent::Frame { pid, chunk } => self.on_chunk(pid, &chunk, now, &mut actions),
            HandshakeEvent::NominationDeadline { live } => match self.nominator.expire(&live) {
                Some(pid) => self.nominate(pid, &mut actions),
                None => Ok(()),
            },
        };
        if let Err(error) = result {
            debug!(phase = %self.phase, %error, "Handshake aborted");
            self.phase = HandshakePhase::Aborted;
            return Err(error);
        }
        Ok(actions)
    }

    fn on_chunk(
        &mut self,
        pid: PathId,
        chunk: &[u8],
        now: Instant,
        actions: &mut Vec<HandshakeAction>,
    ) -> RendezvousResult<()> {
        self.engine
            .add_chunk(pid, chunk)
            .map_err(|source| self.engine_error(Some(pid), "add chunk", source))?;

        // One chunk may complete several frames, or none
        while self.phase == HandshakePhase::Nominating {
            let processed = self
                .engine
                .process_frame(pid)
                .map_err(|source| self.engine_error(Some(pid), "process frame", source))?;
            let Some(result) = processed else {
                break;
            };
            self.apply(pid, result, now, actions)?;
        }
        Ok(())
    }

    fn apply(
        &mut self,
        pid: PathId,
        result: PathProcessResult,
        now: Instant,
        actions: &mut Vec<HandshakeAction>,
    ) -> RendezvousResult<()> {
        if result.incoming_ulp_data.is_some() {
            return Err(self.violation("ULP data before nomination"));
        }
        if let Some(frame) = result.outgoing_frame {
            actions.push(HandshakeAction::Send { pid, frame });
        }
        match result.state_update {
            None => Ok(()),
            Some(PathStateUpdate::AwaitingNominate { measured_rtt }) => {
                debug!(pid, rtt_ms = measured_rtt.as_millis() as u64, "Path ready to nominate");
                if !self.engine.is_nominator() {
                    return Ok(());
                }
                if let Some(requested) = self.nominator.requested() {
                    trace!(pid, requested, "Nomination already requested");
                    return Ok(());
                }
                match self.nominator.on_ready(pid, measured_rtt, now) {
                    Some(chosen) => self.nominate(chosen, actions),
                    None => Ok(()),
                }
            }
            Some(PathStateUpdate::Nominated { rph }) => {
                if self.engine.nominated_path() != Some(pid) {
                    return Err(self.violation("nominated notice for a path not nominated"));
                }
                info!(pid, "Nomination complete");
                self.phase = HandshakePhase::Nominated;
                actions.push(HandshakeAction::Nominated { pid, rph });
                Ok(())
            }
        }
    }

    fn nominate(&mut self, pid: PathId, actions: &mut Vec<HandshakeAction>) -> RendezvousResult<()> {
        debug!(pid, "Nominating path");
        let result = self
            .engine
            .nominate_path(pid)
            .map_err(|source| self.engine_error(Some(pid), "nominate path", source))?;
        // Nomination may complete now or with a later frame of `pid`
        self.apply(pid, result, Instant::now(), actions)
    }

    fn engine_error(
        &self,
        pid: Option<PathId>,
        operation: &'static str,
        source: EngineError,
    ) -> RendezvousError {
        RendezvousError::Engine {
            phase: self.phase,
            pid,
            operation,
            source,
        }
    }

    fn violation(&self, reason: &'static str) -> RendezvousError {
        RendezvousError::ContractViolation {
            phase: self.phase,
            reason,
        }
    }
}

impl<E> fmt::Debug for Handshake<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("phase", &self.phase)
            .field("nominator", &self.nominator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::engine::OutgoingFrame;
    use crate::testing::{ScriptedEngine, nominated, ready, rph};
    use std::time::Duration;

    fn frame(pid: PathId, chunk: &[u8]) -> HandshakeEvent {
        HandshakeEvent::Frame {
            pid,
            chunk: chunk.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_phases_single_path() {
        let engine = ScriptedEngine::new(true)
            .on_frame(|_, _| Ok(PathProcessResult::update(ready(12))))
            .on_nominate(|_| {
                Ok(PathProcessResult::outgoing(b"nominate".to_vec()).with_update(nominated(rph(7))))
            });
        let calls = engine.nominate_calls();
        let mut handshake = Handshake::new(engine, NominationPolicy::Eager);
        assert_eq!(handshake.phase(), HandshakePhase::Initializing);

        assert!(handshake.start().unwrap().is_empty());
        assert_eq!(handshake.phase(), HandshakePhase::Nominating);

        let actions = handshake.handle(frame(7, b"auth"), Instant::now()).unwrap();
        assert_eq!(
            actions,
            vec![
                HandshakeAction::Send {
                    pid: 7,
                    frame: b"nominate".to_vec()
                },
                HandshakeAction::Nominated { pid: 7, rph: rph(7) },
            ]
        );
        assert_eq!(handshake.phase(), HandshakePhase::Nominated);
        assert_eq!(*calls.lock(), vec![7]);
    }

    #[tokio::test]
    async fn test_initial_frames_become_sends() {
        let engine = ScriptedEngine::new(false).with_initial(vec![
            OutgoingFrame {
                pid: 1,
                frame: vec![1],
            },
            OutgoingFrame {
                pid: 2,
                frame: vec![2],
            },
        ]);
        let mut handshake = Handshake::new(engine, NominationPolicy::Eager);
        let actions = handshake.start().unwrap();
        assert_eq!(
            actions,
            vec![
                HandshakeAction::Send {
                    pid: 1,
                    frame: vec![1]
                },
                HandshakeAction::Send {
                    pid: 2,
                    frame: vec![2]
                },
            ]
        );
        assert!(handshake.start().is_err());
    }

    #[tokio::test]
    async fn test_non_nominator_waits() {
        let engine = ScriptedEngine::new(false).on_frame(|_, chunk| match chunk {
            b"auth" => Ok(PathProcessResult::update(ready(5))),
            b"nominate" => Ok(PathProcessResult::update(nominated(rph(3)))),
            _ => Ok(PathProcessResult::default()),
        });
        let calls = engine.nominate_calls();
        let mut handshake = Handshake::new(engine, NominationPolicy::Eager);
        handshake.start().unwrap();

        let actions = handshake.handle(frame(2, b"auth"), Instant::now()).unwrap();
        assert!(actions.is_empty());
        assert_eq!(handshake.phase(), HandshakePhase::Nominating);

        let actions = handshake.handle(frame(2, b"nominate"), Instant::now()).unwrap();
        assert_eq!(actions, vec![HandshakeAction::Nominated { pid: 2, rph: rph(3) }]);
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_ulp_before_nomination_aborts() {
        let engine =
            ScriptedEngine::new(false).on_frame(|_, _| Ok(PathProcessResult::ulp(b"early".to_vec())));
        let mut handshake = Handshake::new(engine, NominationPolicy::Eager);
        handshake.start().unwrap();

        let error = handshake.handle(frame(1, b"x"), Instant::now()).unwrap_err();
        assert!(matches!(error, RendezvousError::ContractViolation { .. }));
        assert_eq!(handshake.phase(), HandshakePhase::Aborted);
        assert!(handshake.handle(frame(1, b"y"), Instant::now()).is_err());
    }

    #[tokio::test]
    async fn test_engine_error_aborts_with_context() {
        let engine = ScriptedEngine::new(false)
            .on_frame(|_, _| Err(EngineError::MalformedFrame("bad tag")));
        let mut handshake = Handshake::new(engine, NominationPolicy::Eager);
        handshake.start().unwrap();

        let error = handshake.handle(frame(4, b"x"), Instant::now()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::EngineRejected);
        assert!(matches!(
            error,
            RendezvousError::Engine {
                pid: Some(4),
                phase: HandshakePhase::Nominating,
                ..
            }
        ));
        assert_eq!(handshake.phase(), HandshakePhase::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_best_rtt_deadline() {
        let engine = ScriptedEngine::new(true).on_frame(|pid, _| {
            let rtt = match pid {
                1 => 40,
                _ => 15,
            };
            Ok(PathProcessResult::update(ready(rtt)))
        });
        let calls = engine.nominate_calls();
        let mut handshake = Handshake::new(
            engine,
            NominationPolicy::BestRtt {
                window: Duration::from_millis(100),
            },
        );
        handshake.start().unwrap();
        assert_eq!(handshake.nomination_deadline(), None);

        let now = Instant::now();
        assert!(handshake.handle(frame(1, b"a"), now).unwrap().is_empty());
        assert!(handshake.handle(frame(2, b"a"), now).unwrap().is_empty());
        assert_eq!(
            handshake.nomination_deadline(),
            Some(now + Duration::from_millis(100))
        );

        let actions = handshake
            .handle(HandshakeEvent::NominationDeadline { live: vec![1, 2] }, now)
            .unwrap();
        assert!(matches!(
            actions.as_slice(),
            [HandshakeAction::Nominated { pid: 2, .. }]
        ));
        assert_eq!(*calls.lock(), vec![2]);
        assert_eq!(handshake.nomination_deadline(), None);
    }

    #[tokio::test]
    async fn test_nomination_completes_on_later_frame() {
        let engine = ScriptedEngine::new(true)
            .on_frame(|_, chunk| match chunk {
                b"ack" => Ok(PathProcessResult::update(nominated(rph(9)))),
                _ => Ok(PathProcessResult::update(ready(1))),
            })
            .on_nominate(|_| Ok(PathProcessResult::outgoing(b"nominate".to_vec())));
        let calls = engine.nominate_calls();
        let mut handshake = Handshake::new(engine, NominationPolicy::Eager);
        handshake.start().unwrap();

        let actions = handshake.handle(frame(1, b"auth"), Instant::now()).unwrap();
        assert_eq!(
            actions,
            vec![HandshakeAction::Send {
                pid: 1,
                frame: b"nominate".to_vec()
            }]
        );
        assert_eq!(handshake.phase(), HandshakePhase::Nominating);

        // Another path turning ready does not nominate again
        assert!(handshake.handle(frame(2, b"auth"), Instant::now()).unwrap().is_empty());

        let actions = handshake.handle(frame(1, b"ack"), Instant::now()).unwrap();
        assert_eq!(actions, vec![HandshakeAction::Nominated { pid: 1, rph: rph(9) }]);
        assert_eq!(handshake.phase(), HandshakePhase::Nominated);
        assert_eq!(*calls.lock(), vec![1]);
    }

    #[tokio::test]
    async fn test_nominated_notice_must_match_engine() {
        let mut handshake = Handshake::new(MisreportingEngine, NominationPolicy::Eager);
        handshake.start().unwrap();

        let error = handshake.handle(frame(1, b"x"), Instant::now()).unwrap_err();
        assert!(matches!(error, RendezvousError::ContractViolation { .. }));
        assert_eq!(handshake.phase(), HandshakePhase::Aborted);
    }

    /// Reports `Nominated` on every frame but never records a nominated path.
    struct MisreportingEngine;

    impl ProtocolEngine for MisreportingEngine {
        fn initial_outgoing_frames(&mut self) -> Result<Vec<OutgoingFrame>, EngineError> {
            Ok(Vec::new())
        }

        fn add_chunk(&mut self, _pid: PathId, _chunk: &[u8]) -> Result<(), EngineError> {
            Ok(())
        }

        fn process_frame(&mut self, _pid: PathId) -> Result<Option<PathProcessResult>, EngineError> {
            Ok(Some(PathProcessResult::update(nominated(rph(1)))))
        }

        fn nominate_path(&mut self, pid: PathId) -> Result<PathProcessResult, EngineError> {
            Err(EngineError::NotReady(pid))
        }

        fn is_nominator(&self) -> bool {
            false
        }

        fn create_ulp_frame(&mut self, _data: &[u8]) -> Result<PathProcessResult, EngineError> {
            Err(EngineError::NotNominated)
        }

        fn nominated_path(&self) -> Option<PathId> {
            None
        }
    }
}
