//! Routes one decoded frame at a time to its handler and produces the
//! reply datagram, when the command has one.
//!
//! The dispatcher is stateless per frame; the only multi-datagram state in
//! the system lives in the [`Reassembler`]. Store failures are never fatal
//! to the receive loop: they reduce to a log line or an error reply.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use satchel_core::wire::{self, Frame};

use crate::mailbox::{MailboxStore, StoreError};
use crate::reassembly::{Ingest, IngestError, Reassembler};
use crate::session::SessionRegistry;

pub const ACCOUNT_CREATED: &str = "Account created successfully!";
pub const ACCOUNT_EXISTS: &str = "Account already exists!";
pub const ACCOUNT_NOT_FOUND: &str = "Account not found!";
pub const FILE_NOT_FOUND: &str = "File not found!";
pub const UNKNOWN_COMMAND: &str = "Unknown command";

pub struct Dispatcher {
    store: Arc<dyn MailboxStore>,
    reassembler: Arc<Reassembler>,
    sessions: SessionRegistry,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MailboxStore>,
        reassembler: Arc<Reassembler>,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            store,
            reassembler,
            sessions,
        }
    }

    /// Handle one inbound datagram. Returns at most one reply for the
    /// originating endpoint; a malformed datagram is dropped silently on
    /// the wire and loudly in the logs.
    pub fn handle(&self, raw: &[u8], peer: SocketAddr) -> Option<Bytes> {
        let frame = match wire::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "malformed frame dropped");
                return None;
            }
        };

        match frame {
            Frame::Connect => {
                self.sessions.add(peer);
                tracing::info!(
                    peer = %peer,
                    connected = self.sessions.len(),
                    "client connected"
                );
                None
            }

            Frame::Disconnect => {
                self.sessions.remove(&peer);
                tracing::info!(
                    peer = %peer,
                    connected = self.sessions.len(),
                    "client disconnected"
                );
                None
            }

            Frame::CreateAccount { account } => match self.store.create_account(&account) {
                Ok(true) => {
                    tracing::info!(peer = %peer, account, "account created");
                    Some(reply(ACCOUNT_CREATED))
                }
                Ok(false) => {
                    tracing::info!(peer = %peer, account, "account already exists");
                    Some(reply(ACCOUNT_EXISTS))
                }
                Err(e) => {
                    tracing::error!(peer = %peer, account, error = %e, "account creation failed");
                    None
                }
            },

            Frame::SendEmail { from, to, body } => {
                if !self.store.account_exists(&to) {
                    tracing::warn!(peer = %peer, from, to, "email to unknown account dropped");
                    return None;
                }
                match self.store.append_email(&to, &from, &body, unix_now()) {
                    Ok(()) => tracing::info!(peer = %peer, from, to, "email delivered"),
                    Err(e) => {
                        tracing::error!(peer = %peer, from, to, error = %e, "email write failed")
                    }
                }
                None
            }

            Frame::Attachment(frame) => {
                match self.reassembler.ingest(&frame, unix_now()) {
                    Ok(Ingest::Completed { bytes }) => tracing::info!(
                        peer = %peer,
                        account = %frame.to,
                        file = %frame.file_name,
                        bytes,
                        "attachment assembled"
                    ),
                    Ok(Ingest::Pending { filled, total }) => tracing::debug!(
                        peer = %peer,
                        account = %frame.to,
                        file = %frame.file_name,
                        filled,
                        total,
                        "chunk stored"
                    ),
                    // No reply channel exists for this command; failures
                    // are observable only here.
                    Err(e @ IngestError::Store(_)) => tracing::error!(
                        peer = %peer,
                        account = %frame.to,
                        file = %frame.file_name,
                        error = %e,
                        "attachment persistence failed, transfer retained"
                    ),
                    Err(e) => tracing::warn!(
                        peer = %peer,
                        account = %frame.to,
                        file = %frame.file_name,
                        error = %e,
                        "attachment chunk rejected"
                    ),
                }
                None
            }

            Frame::Login { account } => match self.store.list_files(&account) {
                Ok(files) => {
                    tracing::info!(peer = %peer, account, files = files.len(), "mailbox listed");
                    Some(reply(&files.join(",")))
                }
                Err(StoreError::AccountNotFound(_)) => {
                    tracing::warn!(peer = %peer, account, "login to unknown account");
                    Some(reply(ACCOUNT_NOT_FOUND))
                }
                Err(e) => {
                    tracing::error!(peer = %peer, account, error = %e, "mailbox listing failed");
                    None
                }
            },

            Frame::Download { account, file_name } => {
                match self.store.read_file(&account, &file_name) {
                    Ok(bytes) => {
                        tracing::info!(
                            peer = %peer,
                            account,
                            file = %file_name,
                            bytes = bytes.len(),
                            "file sent"
                        );
                        Some(Bytes::from(bytes))
                    }
                    Err(StoreError::FileNotFound(_) | StoreError::AccountNotFound(_)) => {
                        tracing::warn!(peer = %peer, account, file = %file_name, "file not found");
                        Some(reply(FILE_NOT_FOUND))
                    }
                    Err(e) => {
                        tracing::error!(peer = %peer, account, file = %file_name, error = %e, "file read failed");
                        None
                    }
                }
            }

            Frame::Unknown { token } => {
                tracing::debug!(peer = %peer, token, "unknown command");
                Some(reply(UNKNOWN_COMMAND))
            }
        }
    }
}

fn reply(text: &str) -> Bytes {
    Bytes::from(text.to_string())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
