//! Wire format of the reference engine.
//!
//! ```text
//! frame     = length (u32 LE) || ciphertext
//! plaintext = tag (1) || fields
//! ```

use crate::core::{
    CHALLENGE_SIZE, EngineError, FRAME_LENGTH_PREFIX_SIZE, MAX_FRAME_LENGTH, PUBLIC_KEY_SIZE,
};

/// Message tags.
mod tag {
    pub const HELLO: u8 = 0x01;
    pub const AUTH_HELLO: u8 = 0x02;
    pub const AUTH: u8 = 0x03;
    pub const NOMINATE: u8 = 0x04;
    pub const ULP: u8 = 0x05;
}

type Challenge = [u8; CHALLENGE_SIZE];
type PublicKey = [u8; PUBLIC_KEY_SIZE];

/// A decrypted rendezvous message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// RRD → RID: challenge and ephemeral key.
    Hello {
        /// RRD challenge.
        challenge: Challenge,
        /// RRD ephemeral public key.
        etk: PublicKey,
    },
    /// RID → RRD: answer, own challenge and ephemeral key.
    AuthHello {
        /// Echo of the RRD challenge.
        response: Challenge,
        /// RID challenge.
        challenge: Challenge,
        /// RID ephemeral public key.
        etk: PublicKey,
    },
    /// RRD → RID: answer to the RID challenge.
    Auth {
        /// Echo of the RID challenge.
        response: Challenge,
    },
    /// Nominator → other side: this path is nominated.
    Nominate,
    /// Upper layer protocol data.
    Ulp(Vec<u8>),
}

impl Message {
    /// Name of the message, for errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::AuthHello { .. } => "auth-hello",
            Message::Auth { .. } => "auth",
            Message::Nominate => "nominate",
            Message::Ulp(_) => "ulp",
        }
    }

    /// Encode to plaintext.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Hello { challenge, etk } => {
                let mut buf = Vec::with_capacity(1 + CHALLENGE_SIZE + PUBLIC_KEY_SIZE);
                buf.push(tag::HELLO);
                buf.extend_from_slice(challenge);
                buf.extend_from_slice(etk);
                buf
            }
            Message::AuthHello {
                response,
                challenge,
                etk,
            } => {
                let mut buf = Vec::with_capacity(1 + 2 * CHALLENGE_SIZE + PUBLIC_KEY_SIZE);
                buf.push(tag::AUTH_HELLO);
                buf.extend_from_slice(response);
                buf.extend_from_slice(challenge);
                buf.extend_from_slice(etk);
                buf
            }
            Message::Auth { response } => {
                let mut buf = Vec::with_capacity(1 + CHALLENGE_SIZE);
                buf.push(tag::AUTH);
                buf.extend_from_slice(response);
                buf
            }
            Message::Nominate => vec![tag::NOMINATE],
            Message::Ulp(data) => {
                let mut buf = Vec::with_capacity(1 + data.len());
                buf.push(tag::ULP);
                buf.extend_from_slice(data);
                buf
            }
        }
    }

    /// Decode from plaintext.
    pub fn decode(plaintext: &[u8]) -> Result<Self, EngineError> {
        let (&kind, body) = plaintext
            .split_first()
            .ok_or(EngineError::MalformedFrame("empty message"))?;
        match kind {
            tag::HELLO => {
                let (challenge, etk) = fixed::<CHALLENGE_SIZE, PUBLIC_KEY_SIZE>(body)?;
                Ok(Message::Hello { challenge, etk })
            }
            tag::AUTH_HELLO => {
                if body.len() != 2 * CHALLENGE_SIZE + PUBLIC_KEY_SIZE {
                    return Err(EngineError::MalformedFrame("invalid auth-hello length"));
                }
                let (response, rest) = body.split_at(CHALLENGE_SIZE);
                let (challenge, etk) = fixed::<CHALLENGE_SIZE, PUBLIC_KEY_SIZE>(rest)?;
                Ok(Message::AuthHello {
                    response: array(response)?,
                    challenge,
                    etk,
                })
            }
            tag::AUTH => Ok(Message::Auth {
                response: array(body)?,
            }),
            tag::NOMINATE if body.is_empty() => Ok(Message::Nominate),
            tag::NOMINATE => Err(EngineError::MalformedFrame("invalid nominate length")),
            tag::ULP => Ok(Message::Ulp(body.to_vec())),
            _ => Err(EngineError::MalformedFrame("unknown message tag")),
        }
    }
}

fn array<const N: usize>(bytes: &[u8]) -> Result<[u8; N], EngineError> {
    bytes
        .try_into()
        .map_err(|_| EngineError::MalformedFrame("invalid field length"))
}

fn fixed<const A: usize, const B: usize>(bytes: &[u8]) -> Result<([u8; A], [u8; B]), EngineError> {
    if bytes.len() != A + B {
        return Err(EngineError::MalformedFrame("invalid field length"));
    }
    let (a, b) = bytes.split_at(A);
    Ok((array(a)?, array(b)?))
}

/// Prefix a ciphertext with its length.
pub fn encode_frame(ciphertext: &[u8]) -> Result<Vec<u8>, EngineError> {
    if ciphertext.len() > MAX_FRAME_LENGTH {
        return Err(EngineError::FrameTooLarge {
            length: ciphertext.len(),
            max: MAX_FRAME_LENGTH,
        });
    }
    let mut frame = Vec::with_capacity(FRAME_LENGTH_PREFIX_SIZE + ciphertext.len());
    frame.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
    frame.extend_from_slice(ciphertext);
    Ok(frame)
}

/// Reassembles frames from arbitrarily split chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet returned.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next complete frame body (without length prefix).
    ///
    /// Fails as soon as the announced length exceeds the maximum, without
    /// waiting for the body.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, EngineError> {
        let Some(prefix) = self.buffer.get(..FRAME_LENGTH_PREFIX_SIZE) else {
            return Ok(None);
        };
        let length = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if length > MAX_FRAME_LENGTH {
            return Err(EngineError::FrameTooLarge {
                length,
                max: MAX_FRAME_LENGTH,
            });
        }
        let end = FRAME_LENGTH_PREFIX_SIZE + length;
        if self.buffer.len() < end {
            return Ok(None);
        }
        let body = self.buffer[FRAME_LENGTH_PREFIX_SIZE..end].to_vec();
        self.buffer.drain(..end);
        Ok(Some(body))
    }
}
