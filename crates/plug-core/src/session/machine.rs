//! The per-connection protocol state machine.
//!
//! A [`Session`] owns everything a connection needs to remember between two
//! transport reads: its [`ConnectionState`], the receive buffer, a fragmented
//! message in progress, and which side has sent a Close frame.
//!
//! # Frame dispatch
//!
//! Every decoded frame goes through one `match` on its opcode:
//!
//! | Opcode       | Reaction                                              |
//! |--------------|-------------------------------------------------------|
//! | Ping         | write a Pong with the same payload                    |
//! | Pong         | ignored                                               |
//! | Close        | echo a Close (unless already sent), release transport |
//! | Text/Binary  | deliver to the application (or start a fragment)      |
//! | Continuation | append to the fragment; deliver when `fin` is set     |
//!
//! Any protocol violation writes a Close frame with the matching status code
//! (1002, 1007 or 1009) and asks the owner to release the transport.

use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::close::CloseReason;
use crate::protocol::frame::{encode_frame, Frame, FrameError, OpCode};
use crate::protocol::message::Message;
use crate::session::buffer::FrameBuffer;
use crate::session::state::ConnectionState;

/// Default upper bound on a single (possibly reassembled) message: 16 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Largest message accepted from the peer, in bytes.
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// What the owner of the transport must do after feeding bytes in.
///
/// Actions are returned in order and must be carried out in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Write these bytes to the transport.
    Write(Vec<u8>),
    /// Hand this message to the application.
    Deliver(Message),
    /// Release the transport; the session will accept no more input.
    Release,
}

/// Errors returned to callers of the send-side API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("connection is {0}")]
    ConnectionClosed(ConnectionState),
}

#[derive(Debug)]
struct PartialMessage {
    opcode: OpCode,
    payload: Vec<u8>,
}

/// Protocol state for one upgraded connection (server role).
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    state: ConnectionState,
    buffer: FrameBuffer,
    partial: Option<PartialMessage>,
    close_sent: bool,
    close_received: bool,
    peer_close: Option<CloseReason>,
    release_requested: bool,
}

impl Session {
    /// Creates a session in the `Connecting` state.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Connecting,
            buffer: FrameBuffer::new(),
            partial: None,
            close_sent: false,
            close_received: false,
            peer_close: None,
            release_requested: false,
        }
    }

    /// Marks the handshake as complete: `Connecting → Open`.
    pub fn open(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Open;
        } else {
            debug!("ignoring open() in state {}", self.state);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The Close reason the peer sent, once one has arrived.
    pub fn peer_close_reason(&self) -> Option<&CloseReason> {
        self.peer_close.as_ref()
    }

    /// `true` once Close frames have travelled in both directions.
    pub fn is_close_handshake_complete(&self) -> bool {
        self.close_sent && self.close_received
    }

    /// Bytes received but not yet decoded into a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    // ── Receive path ──────────────────────────────────────────────────────────

    /// Feeds one chunk of transport bytes through the decoder.
    ///
    /// Decodes as many complete frames as the buffer holds and returns the
    /// resulting actions.  A trailing partial frame stays buffered for the
    /// next call.  Input is ignored once a release has been requested.
    pub fn on_bytes(&mut self, chunk: &[u8]) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.release_requested
            || !matches!(self.state, ConnectionState::Open | ConnectionState::Closing)
        {
            debug!("ignoring {} bytes in state {}", chunk.len(), self.state);
            return actions;
        }

        self.buffer.extend(chunk);
        while !self.release_requested {
            match self.buffer.next_frame(self.config.max_message_size) {
                Ok(Some(frame)) => self.handle_frame(frame, &mut actions),
                Ok(None) => break,
                Err(err) => self.fail(err, &mut actions),
            }
        }
        actions
    }

    fn handle_frame(&mut self, frame: Frame, actions: &mut Vec<SessionAction>) {
        if !frame.is_masked() {
            return self.fail(FrameError::UnmaskedFrame, actions);
        }

        match frame.opcode {
            OpCode::Ping => {
                if !self.close_sent {
                    actions.push(SessionAction::Write(encode_frame(
                        OpCode::Pong,
                        &frame.payload,
                        true,
                        false,
                    )));
                }
            }
            OpCode::Pong => debug!("pong received ({} bytes)", frame.payload.len()),
            OpCode::Close => self.on_close_frame(&frame.payload, actions),
            OpCode::Text | OpCode::Binary => {
                if self.partial.is_some() {
                    return self.fail(FrameError::InterleavedDataFrame, actions);
                }
                if frame.fin {
                    self.deliver(frame.opcode, frame.payload, actions);
                } else {
                    self.partial = Some(PartialMessage {
                        opcode: frame.opcode,
                        payload: frame.payload,
                    });
                }
            }
            OpCode::Continuation => {
                let Some(mut partial) = self.partial.take() else {
                    return self.fail(FrameError::UnexpectedContinuation, actions);
                };
                let len = partial.payload.len() + frame.payload.len();
                if len > self.config.max_message_size {
                    return self.fail(
                        FrameError::PayloadTooLarge {
                            len: len as u64,
                            max: self.config.max_message_size as u64,
                        },
                        actions,
                    );
                }
                partial.payload.extend_from_slice(&frame.payload);
                if frame.fin {
                    self.deliver(partial.opcode, partial.payload, actions);
                } else {
                    self.partial = Some(partial);
                }
            }
        }
    }

    fn deliver(&mut self, opcode: OpCode, payload: Vec<u8>, actions: &mut Vec<SessionAction>) {
        if self.close_sent {
            debug!("discarding {} byte message received after close", payload.len());
            return;
        }
        match Message::from_parts(opcode, payload) {
            Ok(message) => actions.push(SessionAction::Deliver(message)),
            Err(err) => self.fail(err, actions),
        }
    }

    fn on_close_frame(&mut self, payload: &[u8], actions: &mut Vec<SessionAction>) {
        let peer = match CloseReason::parse(payload) {
            Ok(reason) => reason,
            Err(err) => return self.fail(err, actions),
        };
        debug!(
            "close frame received (code={:?}, reason={:?})",
            peer.code, peer.reason
        );

        self.close_received = true;
        if !self.close_sent {
            actions.push(SessionAction::Write(close_frame_bytes(&peer.echo())));
            self.close_sent = true;
        }
        self.peer_close = Some(peer);
        self.state = ConnectionState::Closing;
        self.request_release(actions);
    }

    fn fail(&mut self, err: FrameError, actions: &mut Vec<SessionAction>) {
        warn!("protocol failure, closing: {err}");
        if !self.close_sent {
            let reason = CloseReason::new(err.close_code(), err.to_string());
            actions.push(SessionAction::Write(close_frame_bytes(&reason)));
            self.close_sent = true;
        }
        self.partial = None;
        self.state = ConnectionState::Closing;
        self.request_release(actions);
    }

    fn request_release(&mut self, actions: &mut Vec<SessionAction>) {
        if !self.release_requested {
            self.release_requested = true;
            actions.push(SessionAction::Release);
        }
    }

    // ── Send path ─────────────────────────────────────────────────────────────

    /// Encodes an outgoing message as a single unmasked, final frame.
    ///
    /// # Errors
    ///
    /// [`SessionError::ConnectionClosed`] unless the session is `Open`.
    pub fn encode_message(&self, message: &Message) -> Result<Vec<u8>, SessionError> {
        if !self.state.can_send() {
            return Err(SessionError::ConnectionClosed(self.state));
        }
        Ok(message.to_frame_bytes())
    }

    /// Starts a locally initiated close: `Open → Closing`.
    ///
    /// Returns the Close frame to write.  The transport should be released once
    /// the peer's Close arrives (reported through [`SessionAction::Release`]) or
    /// a timeout expires.
    ///
    /// # Errors
    ///
    /// [`SessionError::ConnectionClosed`] unless the session is `Open`.
    pub fn close(&mut self, reason: &CloseReason) -> Result<Vec<u8>, SessionError> {
        if !self.state.can_send() {
            return Err(SessionError::ConnectionClosed(self.state));
        }
        self.close_sent = true;
        self.state = ConnectionState::Closing;
        Ok(close_frame_bytes(reason))
    }

    /// Records that the transport is gone: any state `→ Closed`.
    pub fn on_transport_closed(&mut self) {
        self.state = ConnectionState::Closed;
        self.release_requested = true;
        self.partial = None;
        self.buffer.clear();
    }
}

fn close_frame_bytes(reason: &CloseReason) -> Vec<u8> {
    encode_frame(OpCode::Close, &reason.encode(), true, false)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
