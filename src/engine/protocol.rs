//! Reference protocol engine.
//!
//! Per path:
//!
//! ```text
//! RRD                                      RID
//!  | -- Hello{challenge, etk}       (RRDAK) -> |
//!  | <- AuthHello{response, challenge, etk} -- |  (RIDAK)
//!  | -- Auth{response}              (RRDTK) -> |
//!  |           ... awaiting nominate ...       |
//!  | <-------------- Nominate --------------- |  (nominator's transport key)
//! ```
//!
//! The RRD measures the round trip Hello → AuthHello, the RID measures
//! AuthHello → Auth. Once a path is nominated every other path is dropped
//! and only ULP frames are accepted on the nominated one.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{debug, trace};

use super::frame::{FrameDecoder, Message, encode_frame};
use super::{EngineSetup, OutgoingFrame, PathProcessResult, PathStateUpdate, ProtocolEngine};
use crate::core::{
    AuthenticationKey, CHALLENGE_SIZE, EngineError, PathId, Role, RoomPhraseHash,
};
use crate::crypto::{AuthKeys, CipherState, Direction, EphemeralKeypair, PathKeys};

type Challenge = [u8; CHALLENGE_SIZE];

fn challenge() -> Challenge {
    let mut challenge = [0u8; CHALLENGE_SIZE];
    OsRng.fill_bytes(&mut challenge);
    challenge
}

/// Transport ciphers of a path after its key exchange.
#[derive(Debug)]
struct Transport {
    tx: CipherState,
    rx: CipherState,
    rph: RoomPhraseHash,
}

impl Transport {
    fn new(role: Role, pid: PathId, keys: &PathKeys) -> Self {
        let peer = peer(role);
        Self {
            tx: CipherState::new(
                keys.for_sender(role).clone(),
                pid,
                Direction::outbound(role),
            ),
            rx: CipherState::new(
                keys.for_sender(peer).clone(),
                pid,
                Direction::outbound(peer),
            ),
            rph: keys.rph(),
        }
    }
}

#[derive(Debug)]
enum PathState {
    /// RID: waiting for the RRD's Hello.
    AwaitingHello,
    /// RRD: Hello sent, waiting for AuthHello.
    AwaitingAuthHello {
        keypair: EphemeralKeypair,
        challenge: Challenge,
        sent_at: Instant,
    },
    /// RID: AuthHello sent, waiting for Auth.
    AwaitingAuth {
        transport: Transport,
        challenge: Challenge,
        sent_at: Instant,
    },
    /// Handshake complete, waiting for nomination.
    Ready { transport: Transport },
    /// This path carries the ULP.
    Nominated { transport: Transport },
    /// A previous step on this path failed.
    Failed,
}

#[derive(Debug)]
struct PathContext {
    decoder: FrameDecoder,
    state: PathState,
}

fn peer(role: Role) -> Role {
    match role {
        Role::Initiator => Role::Responder,
        Role::Responder => Role::Initiator,
    }
}

/// Per-attempt key material and role, shared by all paths.
struct Keys {
    role: Role,
    is_nominator: bool,
    ak: AuthenticationKey,
    auth: AuthKeys,
}

impl Keys {
    /// Seal a message under the authentication key of this side.
    fn seal_auth(&self, pid: PathId, message: &Message) -> Result<Vec<u8>, EngineError> {
        let mut cipher = CipherState::new(
            self.auth.for_sender(self.role).clone(),
            pid,
            Direction::outbound(self.role),
        );
        Ok(encode_frame(&cipher.seal(&message.encode())?)?)
    }

    /// Open a message sealed under the authentication key of the peer.
    fn open_auth(&self, pid: PathId, ciphertext: &[u8]) -> Result<Message, EngineError> {
        let peer = peer(self.role);
        let mut cipher =
            CipherState::new(self.auth.for_sender(peer).clone(), pid, Direction::outbound(peer));
        Message::decode(&cipher.open(ciphertext)?)
    }

    /// Advance `state` with one inbound frame.
    fn step(
        &self,
        pid: PathId,
        state: PathState,
        ciphertext: &[u8],
    ) -> Result<(PathState, PathProcessResult), EngineError> {
        match state {
            PathState::AwaitingHello => {
                let message = self.open_auth(pid, ciphertext)?;
                let Message::Hello { challenge, etk } = message else {
                    return Err(EngineError::UnexpectedMessage {
                        message: message.name(),
                        state: "awaiting hello",
                    });
                };

                let keypair = EphemeralKeypair::generate();
                let own_etk = keypair.public_key();
                let shared = keypair.diffie_hellman(&etk)?;
                let keys = PathKeys::derive(&self.ak, &shared)?;

                let own_challenge = self::challenge();
                let frame = self.seal_auth(
                    pid,
                    &Message::AuthHello {
                        response: challenge,
                        challenge: own_challenge,
                        etk: own_etk,
                    },
                )?;
                trace!(pid, "Answering hello");
                let state = PathState::AwaitingAuth {
                    transport: Transport::new(self.role, pid, &keys),
                    challenge: own_challenge,
                    sent_at: Instant::now(),
                };
                Ok((state, PathProcessResult::outgoing(frame)))
            }

            PathState::AwaitingAuthHello {
                keypair,
                challenge: own_challenge,
                sent_at,
            } => {
                let message = self.open_auth(pid, ciphertext)?;
                let Message::AuthHello {
                    response,
                    challenge,
                    etk,
                } = message
                else {
                    return Err(EngineError::UnexpectedMessage {
                        message: message.name(),
                        state: "awaiting auth-hello",
                    });
                };
                if response != own_challenge {
                    return Err(EngineError::ChallengeMismatch);
                }
                let measured_rtt = sent_at.elapsed();

                let shared = keypair.diffie_hellman(&etk)?;
                let keys = PathKeys::derive(&self.ak, &shared)?;
                let mut transport = Transport::new(self.role, pid, &keys);
                let frame = encode_frame(
                    &transport
                        .tx
                        .seal(&Message::Auth { response: challenge }.encode())?,
                )?;
                debug!(pid, ?measured_rtt, "Path authenticated");
                Ok((
                    PathState::Ready { transport },
                    PathProcessResult::outgoing(frame)
                        .with_update(PathStateUpdate::AwaitingNominate { measured_rtt }),
                ))
            }

            PathState::AwaitingAuth {
                mut transport,
                challenge,
                sent_at,
            } => {
                let message = Message::decode(&transport.rx.open(ciphertext)?)?;
                let Message::Auth { response } = message else {
                    return Err(EngineError::UnexpectedMessage {
                        message: message.name(),
                        state: "awaiting auth",
                    });
                };
                if response != challenge {
                    return Err(EngineError::ChallengeMismatch);
                }
                let measured_rtt = sent_at.elapsed();
                debug!(pid, ?measured_rtt, "Path authenticated");
                Ok((
                    PathState::Ready { transport },
                    PathProcessResult::update(PathStateUpdate::AwaitingNominate { measured_rtt }),
                ))
            }

            PathState::Ready { mut transport } => {
                let message = Message::decode(&transport.rx.open(ciphertext)?)?;
                if message != Message::Nominate || self.is_nominator {
                    return Err(EngineError::UnexpectedMessage {
                        message: message.name(),
                        state: "awaiting nominate",
                    });
                }
                let rph = transport.rph;
                Ok((
                    PathState::Nominated { transport },
                    PathProcessResult::update(PathStateUpdate::Nominated { rph }),
                ))
            }

            PathState::Nominated { mut transport } => {
                match Message::decode(&transport.rx.open(ciphertext)?)? {
                    Message::Ulp(data) => Ok((
                        PathState::Nominated { transport },
                        PathProcessResult::ulp(data),
                    )),
                    message => Err(EngineError::UnexpectedMessage {
                        message: message.name(),
                        state: "nominated",
                    }),
                }
            }

            PathState::Failed => Err(EngineError::UnexpectedMessage {
                message: "frame",
                state: "failed",
            }),
        }
    }
}

/// Reference implementation of [`ProtocolEngine`].
pub struct RendezvousProtocol {
    keys: Keys,
    paths: BTreeMap<PathId, PathContext>,
    started: bool,
    nominated: Option<PathId>,
}

impl RendezvousProtocol {
    /// Create an engine for the given candidate paths.
    pub fn new(setup: &EngineSetup<'_>) -> Result<Self, EngineError> {
        if setup.pids.is_empty() {
            return Err(EngineError::InvalidSetup("no paths"));
        }
        let mut paths = BTreeMap::new();
        for &pid in setup.pids {
            let context = PathContext {
                decoder: FrameDecoder::new(),
                state: PathState::AwaitingHello,
            };
            if paths.insert(pid, context).is_some() {
                return Err(EngineError::InvalidSetup("duplicate path id"));
            }
        }
        Ok(Self {
            keys: Keys {
                role: setup.role,
                is_nominator: setup.is_nominator,
                ak: setup.ak.clone(),
                auth: AuthKeys::derive(setup.ak)?,
            },
            paths,
            started: false,
            nominated: None,
        })
    }

    /// Role of this side.
    pub fn role(&self) -> Role {
        self.keys.role
    }

    fn context(&mut self, pid: PathId) -> Result<&mut PathContext, EngineError> {
        if self.nominated.is_some_and(|nominated| nominated != pid) {
            return Err(EngineError::UnknownPath(pid));
        }
        self.paths
            .get_mut(&pid)
            .ok_or(EngineError::UnknownPath(pid))
    }

    fn finish_nomination(&mut self, pid: PathId) {
        self.nominated = Some(pid);
        self.paths.retain(|&other, _| other == pid);
        debug!(pid, "Path nominated");
    }
}

impl ProtocolEngine for RendezvousProtocol {
    fn initial_outgoing_frames(&mut self) -> Result<Vec<OutgoingFrame>, EngineError> {
        if std::mem::replace(&mut self.started, true) {
            return Err(EngineError::InvalidSetup("initial frames already created"));
        }
        if self.keys.role == Role::Initiator {
            return Ok(Vec::new());
        }

        let mut frames = Vec::with_capacity(self.paths.len());
        for (&pid, context) in &mut self.paths {
            let keypair = EphemeralKeypair::generate();
            let challenge = challenge();
            let frame = self.keys.seal_auth(
                pid,
                &Message::Hello {
                    challenge,
                    etk: keypair.public_key(),
                },
            )?;
            context.state = PathState::AwaitingAuthHello {
                keypair,
                challenge,
                sent_at: Instant::now(),
            };
            frames.push(OutgoingFrame { pid, frame });
        }
        Ok(frames)
    }

    fn add_chunk(&mut self, pid: PathId, chunk: &[u8]) -> Result<(), EngineError> {
        self.context(pid)?.decoder.push(chunk);
        Ok(())
    }

    fn process_frame(&mut self, pid: PathId) -> Result<Option<PathProcessResult>, EngineError> {
        let keys = &self.keys;
        let Some(context) = self
            .paths
            .get_mut(&pid)
            .filter(|_| self.nominated.is_none_or(|nominated| nominated == pid))
        else {
            return Err(EngineError::UnknownPath(pid));
        };
        let Some(ciphertext) = context.decoder.next_frame()? else {
            return Ok(None);
        };

        let state = std::mem::replace(&mut context.state, PathState::Failed);
        let (state, result) = keys.step(pid, state, &ciphertext)?;
        let nominated = matches!(state, PathState::Nominated { .. });
        context.state = state;

        if nominated && self.nominated.is_none() {
            self.finish_nomination(pid);
        }
        Ok(Some(result))
    }

    fn nominate_path(&mut self, pid: PathId) -> Result<PathProcessResult, EngineError> {
        if !self.keys.is_nominator {
            return Err(EngineError::NotNominator);
        }
        if self.nominated.is_some() {
            return Err(EngineError::AlreadyNominated);
        }
        let context = self.context(pid)?;
        let mut transport = match std::mem::replace(&mut context.state, PathState::Failed) {
            PathState::Ready { transport } => transport,
            state => {
                context.state = state;
                return Err(EngineError::NotReady(pid));
            }
        };

        let frame = encode_frame(&transport.tx.seal(&Message::Nominate.encode())?)?;
        let rph = transport.rph;
        context.state = PathState::Nominated { transport };
        self.finish_nomination(pid);
        Ok(PathProcessResult::outgoing(frame).with_update(PathStateUpdate::Nominated { rph }))
    }

    fn is_nominator(&self) -> bool {
        self.keys.is_nominator
    }

    fn create_ulp_frame(&mut self, data: &[u8]) -> Result<PathProcessResult, EngineError> {
        let pid = self.nominated.ok_or(EngineError::NotNominated)?;
        let context = self.context(pid)?;
        let PathState::Nominated { transport } = &mut context.state else {
            return Err(EngineError::NotNominated);
        };
        let frame = encode_frame(&transport.tx.seal(&Message::Ulp(data.to_vec()).encode())?)?;
        Ok(PathProcessResult::outgoing(frame))
    }

    fn nominated_path(&self) -> Option<PathId> {
        self.nominated
    }
}

impl fmt::Debug for RendezvousProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousProtocol")
            .field("role", &self.keys.role)
            .field("is_nominator", &self.keys.is_nominator)
            .field("paths", &self.paths.keys().collect::<Vec<_>>())
            .field("nominated", &self.nominated)
            .finish()
    }
}
