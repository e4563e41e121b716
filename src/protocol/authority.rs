//! # Session Authority
//!
//! Tracks every connected session and which one, if any, controls the
//! telescope. All privilege transitions go through one mutex, so a
//! demote-then-promote is observed atomically: two sessions can never both
//! see themselves as the controller.
//!
//! ```text
//! Unprivileged --(digest ok)--> Privileged
//! Privileged --(digest wrong | revoke | other session takes control)--> Unprivileged
//! either --(disconnect)--> Closed
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{info, instrument, warn};

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::{ControlKeys, DigestMatch};

/// Maximum nickname length in bytes.
pub const MAX_NICKNAME_LEN: usize = 32;

/// Transport-assigned connection handle.
pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Privilege {
    #[default]
    None,
    /// Control obtained with the station digest.
    Controller,
    /// Control obtained with the operator's master key.
    Master,
}

impl Privilege {
    pub fn has_control(self) -> bool {
        self != Privilege::None
    }
}

/// Snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub connection: ConnectionId,
    pub peer: String,
    pub nickname: Option<String>,
    pub privilege: Privilege,
}

impl Session {
    pub fn display_name(&self) -> String {
        display_name(self.connection, self.nickname.as_deref())
    }
}

fn display_name(connection: ConnectionId, nickname: Option<&str>) -> String {
    match nickname {
        Some(nick) => nick.to_string(),
        None => format!("anonymous-{connection}"),
    }
}

/// Result of a control handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Station digest matched; `demoted` lost control to this session.
    Granted { demoted: Option<ConnectionId> },
    /// Master key matched; `demoted` lost control to this session.
    Escalated { demoted: Option<ConnectionId> },
    /// Nothing matched; `revoked` is true when this session held control.
    Denied { revoked: bool },
}

impl HandshakeOutcome {
    pub fn granted(&self) -> bool {
        !matches!(self, HandshakeOutcome::Denied { .. })
    }
}

#[derive(Debug)]
struct SessionEntry {
    peer: String,
    nickname: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Controller {
    connection: ConnectionId,
    level: Privilege,
}

#[derive(Debug, Default)]
struct AuthorityState {
    sessions: BTreeMap<ConnectionId, SessionEntry>,
    controller: Option<Controller>,
}

impl AuthorityState {
    fn privilege(&self, connection: ConnectionId) -> Privilege {
        match self.controller {
            Some(c) if c.connection == connection => c.level,
            _ => Privilege::None,
        }
    }

    fn snapshot(&self, connection: ConnectionId, entry: &SessionEntry) -> Session {
        Session {
            connection,
            peer: entry.peer.clone(),
            nickname: entry.nickname.clone(),
            privilege: self.privilege(connection),
        }
    }
}

/// Single-writer owner of per-connection privilege.
#[derive(Debug)]
pub struct SessionAuthority {
    keys: ControlKeys,
    state: Mutex<AuthorityState>,
}

impl SessionAuthority {
    pub fn new(keys: ControlKeys) -> Self {
        Self {
            keys,
            state: Mutex::new(AuthorityState::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, AuthorityState>> {
        self.state
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_AUTHORITY_LOCK.into()))
    }

    /// Register a new, unprivileged session.
    pub fn connect(&self, connection: ConnectionId, peer: impl Into<String>) -> Result<()> {
        let peer = peer.into();
        let mut state = self.lock()?;
        if state
            .sessions
            .insert(
                connection,
                SessionEntry {
                    peer: peer.clone(),
                    nickname: None,
                },
            )
            .is_some()
        {
            warn!(connection, "Session re-registered");
        }
        info!(connection, peer = %peer, "Session opened");
        Ok(())
    }

    /// Remove a session. Returns whether it held control.
    pub fn disconnect(&self, connection: ConnectionId) -> Result<bool> {
        let mut state = self.lock()?;
        state.sessions.remove(&connection);

        let had_control = state.privilege(connection).has_control();
        if had_control {
            state.controller = None;
            info!(connection, "Controller disconnected, telescope is free");
        }
        info!(connection, "Session closed");
        Ok(had_control)
    }

    pub fn privilege(&self, connection: ConnectionId) -> Result<Privilege> {
        Ok(self.lock()?.privilege(connection))
    }

    pub fn is_privileged(&self, connection: ConnectionId) -> Result<bool> {
        Ok(self.privilege(connection)?.has_control())
    }

    pub fn controller(&self) -> Result<Option<ConnectionId>> {
        Ok(self.lock()?.controller.map(|c| c.connection))
    }

    /// Run the control handshake for `connection`.
    ///
    /// A station digest match makes the session the sole controller. Failing
    /// that, a master key match does the same at the escalated level. A digest
    /// matching neither takes control away from the submitting session.
    #[instrument(skip(self, digest))]
    pub fn submit_digest(&self, connection: ConnectionId, digest: &str) -> Result<HandshakeOutcome> {
        let verdict = self.keys.verify(digest);

        let mut state = self.lock()?;
        if !state.sessions.contains_key(&connection) {
            return Err(ProtocolError::Custom(format!(
                "{} {connection}",
                constants::ERR_UNKNOWN_SESSION
            )));
        }

        let level = match verdict {
            DigestMatch::Station => Privilege::Controller,
            DigestMatch::MasterKey => Privilege::Master,
            DigestMatch::None => {
                let revoked = state.privilege(connection).has_control();
                if revoked {
                    state.controller = None;
                }
                warn!(connection, revoked, "Control digest rejected");
                return Ok(HandshakeOutcome::Denied { revoked });
            }
        };

        let demoted = state
            .controller
            .map(|c| c.connection)
            .filter(|&previous| previous != connection);
        state.controller = Some(Controller { connection, level });

        info!(connection, ?level, ?demoted, "Control granted");
        Ok(match level {
            Privilege::Master => HandshakeOutcome::Escalated { demoted },
            _ => HandshakeOutcome::Granted { demoted },
        })
    }

    /// Take control away from `connection`. Returns whether it held control.
    pub fn revoke(&self, connection: ConnectionId) -> Result<bool> {
        let mut state = self.lock()?;
        let revoked = state.privilege(connection).has_control();
        if revoked {
            state.controller = None;
            info!(connection, "Control revoked");
        }
        Ok(revoked)
    }

    /// Set a session's nickname. Names longer than [`MAX_NICKNAME_LEN`] or
    /// containing control characters are malformed text and rejected without
    /// side effects; the user list is line-oriented.
    pub fn set_nickname(&self, connection: ConnectionId, nickname: &str) -> Result<()> {
        if nickname.len() > MAX_NICKNAME_LEN {
            return Err(ProtocolError::MalformedText(
                constants::ERR_NICKNAME_TOO_LONG,
            ));
        }
        if nickname.chars().any(char::is_control) {
            return Err(ProtocolError::MalformedText(
                constants::ERR_NICKNAME_CONTROL,
            ));
        }

        let mut state = self.lock()?;
        let entry = state.sessions.get_mut(&connection).ok_or_else(|| {
            ProtocolError::Custom(format!("{} {connection}", constants::ERR_UNKNOWN_SESSION))
        })?;
        entry.nickname = if nickname.is_empty() {
            None
        } else {
            Some(nickname.to_string())
        };
        Ok(())
    }

    /// Nickname, or a generated name for sessions without one.
    pub fn display_name(&self, connection: ConnectionId) -> Result<String> {
        let state = self.lock()?;
        let nickname = state
            .sessions
            .get(&connection)
            .and_then(|e| e.nickname.as_deref());
        Ok(display_name(connection, nickname))
    }

    pub fn session(&self, connection: ConnectionId) -> Result<Option<Session>> {
        let state = self.lock()?;
        Ok(state
            .sessions
            .get(&connection)
            .map(|entry| state.snapshot(connection, entry)))
    }

    /// All sessions in connection order.
    pub fn sessions(&self) -> Result<Vec<Session>> {
        let state = self.lock()?;
        Ok(state
            .sessions
            .iter()
            .map(|(&connection, entry)| state.snapshot(connection, entry))
            .collect())
    }

    /// One line per session; `*` marks the controller, `!` a master-key
    /// controller.
    pub fn user_list(&self) -> Result<String> {
        let lines: Vec<String> = self
            .sessions()?
            .into_iter()
            .map(|session| {
                let marker = match session.privilege {
                    Privilege::None => "",
                    Privilege::Controller => "*",
                    Privilege::Master => "!",
                };
                format!("{marker}{}", session.display_name())
            })
            .collect();
        Ok(lines.join("\n"))
    }
}
