//! Rendezvous configuration.

use std::collections::HashSet;
use std::time::Duration;

use crate::core::{
    AuthenticationKey, DEFAULT_CONNECT_TIMEOUT, PathId, RendezvousError, RendezvousResult, Role,
};
use crate::transport::BackpressureConfig;

/// A candidate path to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfig {
    /// Caller-assigned path id, unique within one attempt.
    pub pid: PathId,
    /// Connection target, e.g. `wss://relay.example/rendezvous/…`.
    pub url: String,
}

impl PathConfig {
    /// Create a path config.
    pub fn new(pid: PathId, url: impl Into<String>) -> Self {
        Self {
            pid,
            url: url.into(),
        }
    }
}

/// How the nominator picks among paths that finished their handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NominationPolicy {
    /// Nominate the first path that becomes ready.
    #[default]
    Eager,
    /// Collect ready paths for `window` after the first one, then nominate
    /// the lowest measured RTT.
    BestRtt {
        /// How long to wait for more candidates.
        window: Duration,
    },
}

/// Configuration of one rendezvous attempt.
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// Role of this device.
    pub role: Role,

    /// Whether this device decides which path is nominated.
    pub is_nominator: bool,

    /// Authentication key shared out of band.
    pub ak: AuthenticationKey,

    /// Candidate paths.
    pub paths: Vec<PathConfig>,

    /// Backpressure of each path.
    pub backpressure: BackpressureConfig,

    /// Nomination policy (nominator only).
    pub nomination: NominationPolicy,

    /// Per-path connect timeout.
    pub connect_timeout: Duration,
}

impl RendezvousConfig {
    /// Start building a configuration.
    pub fn builder(role: Role, ak: AuthenticationKey) -> RendezvousConfigBuilder {
        RendezvousConfigBuilder::new(role, ak)
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> RendezvousResult<()> {
        let mut seen = HashSet::new();
        if let Some(path) = self.paths.iter().find(|path| !seen.insert(path.pid)) {
            return Err(RendezvousError::Config(format!(
                "duplicate path id {}",
                path.pid
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(RendezvousError::Config(
                "connect timeout must be non-zero".into(),
            ));
        }
        self.backpressure.validate()
    }
}

/// Builder for [`RendezvousConfig`].
#[derive(Debug)]
pub struct RendezvousConfigBuilder {
    role: Role,
    ak: AuthenticationKey,
    is_nominator: Option<bool>,
    paths: Vec<PathConfig>,
    backpressure: BackpressureConfig,
    nomination: NominationPolicy,
    connect_timeout: Duration,
}

impl RendezvousConfigBuilder {
    /// Create a builder with default tuning.
    ///
    /// The initiator is the nominator unless set otherwise.
    pub fn new(role: Role, ak: AuthenticationKey) -> Self {
        Self {
            role,
            ak,
            is_nominator: None,
            paths: Vec::new(),
            backpressure: BackpressureConfig::default(),
            nomination: NominationPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set whether this device is the nominator.
    pub fn nominator(mut self, is_nominator: bool) -> Self {
        self.is_nominator = Some(is_nominator);
        self
    }

    /// Add a candidate path.
    pub fn path(mut self, pid: PathId, url: impl Into<String>) -> Self {
        self.paths.push(PathConfig::new(pid, url));
        self
    }

    /// Set the backpressure tuning.
    pub fn backpressure(mut self, backpressure: BackpressureConfig) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Set the nomination policy.
    pub fn nomination(mut self, policy: NominationPolicy) -> Self {
        self.nomination = policy;
        self
    }

    /// Set the per-path connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> RendezvousResult<RendezvousConfig> {
        let config = RendezvousConfig {
            is_nominator: self
                .is_nominator
                .unwrap_or(self.role == Role::Initiator),
            role: self.role,
            ak: self.ak,
            paths: self.paths,
            backpressure: self.backpressure,
            nomination: self.nomination,
            connect_timeout: self.connect_timeout,
        };
        config.validate()?;
        Ok(config)
    }
}
