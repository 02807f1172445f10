//! Sessions: exclusive, open bindings to one endpoint.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, SendTimeoutError};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};
use umpio_codec::{chunk_sysex, SysExMessage, UmpPacket};

use crate::backend::Backend;
use crate::config::TransportConfig;
use crate::endpoint::{Direction, Endpoint};
use crate::error::{Error, Result};

mod listeners;
mod manager;
mod worker;

pub use listeners::{PacketListener, SysExListener, Subscription};
pub(crate) use manager::SessionManager;

use listeners::ListenerSet;
use worker::{Command, SendTicket, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    Closed = 0,
    Open = 1,
    /// The endpoint disappeared from the catalog while the session was open.
    Stale = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Open,
            2 => SessionState::Stale,
            _ => SessionState::Closed,
        }
    }
}

/// Cell value while a closed or abandoned session's worker still holds the
/// native handle. Reported as [`SessionState::Closed`] but never claimable.
const RELEASING: u8 = 3;

/// Shared session state, also held by the registry to enforce exclusivity
/// and to flag sessions stale on refresh.
///
/// Only the session's I/O worker moves the cell back to `Closed`, after the
/// backend has released the handle.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn open() -> Self {
        Self(AtomicU8::new(SessionState::Open as u8))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// No session holds the endpoint and no handle is outstanding.
    pub fn is_vacant(&self) -> bool {
        self.0.load(Ordering::Acquire) == SessionState::Closed as u8
    }

    pub fn is_releasing(&self) -> bool {
        self.0.load(Ordering::Acquire) == RELEASING
    }

    /// Closed -> Open. Fails while a session holds the endpoint or its
    /// handle is still being released.
    pub fn try_open(&self) -> bool {
        self.transition(SessionState::Closed as u8, SessionState::Open as u8)
    }

    /// Open -> Stale.
    pub fn mark_stale(&self) -> bool {
        self.transition(SessionState::Open as u8, SessionState::Stale as u8)
    }

    /// Open or Stale -> releasing. The worker finishes the transition with
    /// [`release`](Self::release).
    pub fn begin_release(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                (v == SessionState::Open as u8 || v == SessionState::Stale as u8).then_some(RELEASING)
            })
            .is_ok()
    }

    /// The handle is gone; the endpoint may be claimed again.
    pub fn release(&self) {
        self.0.store(SessionState::Closed as u8, Ordering::Release);
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.0
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct SessionInner {
    endpoint: Endpoint,
    backend: &'static str,
    state: Arc<StateCell>,
    /// Set once `close` starts; later calls are no-ops.
    closing: AtomicBool,
    commands: crossbeam_channel::Sender<Command>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    listeners: Arc<ListenerSet>,
    next_stream_id: AtomicU8,
    send_timeout: Duration,
    close_timeout: Duration,
}

/// An open endpoint.
///
/// Cheap to clone; all clones refer to the same native handle. Sends from
/// any number of threads are serialized through the session's I/O worker,
/// one backend call per packet.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn open<B: Backend>(
        backend: Arc<B>,
        endpoint: Endpoint,
        state: Arc<StateCell>,
        config: &TransportConfig,
    ) -> Result<Self> {
        let name = backend.name();
        let listeners = Arc::new(ListenerSet::default());
        let worker = Worker::spawn(
            backend,
            endpoint.clone(),
            config,
            Arc::clone(&state),
            Arc::clone(&listeners),
        )?;
        debug!(
            backend = name,
            direction = %endpoint.direction,
            name = %endpoint.name,
            "Session opened"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                endpoint,
                backend: name,
                state,
                closing: AtomicBool::new(false),
                commands: worker.commands,
                worker: Mutex::new(Some(worker.thread)),
                listeners,
                next_stream_id: AtomicU8::new(0),
                send_timeout: config.send_timeout(),
                close_timeout: config.close_timeout(),
            }),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn direction(&self) -> Direction {
        self.inner.endpoint.direction
    }

    pub fn state(&self) -> SessionState {
        if self.inner.closing.load(Ordering::Acquire) {
            SessionState::Closed
        } else {
            self.inner.state.get()
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() != SessionState::Closed
    }

    /// Send one packet and wait for the backend to accept it.
    ///
    /// A stale session still forwards to the backend, which reports the real
    /// failure. Backend errors are returned as-is and never retried.
    ///
    /// On [`Error::BackendTimeout`] a packet still waiting in the queue is
    /// dropped and never reaches the backend. Only a packet whose backend
    /// call had already started when the timeout hit may still be delivered.
    pub fn send(&self, packet: &UmpPacket) -> Result<()> {
        self.ensure_open()?;
        if self.direction() == Direction::Input {
            return Err(Error::unsupported(
                self.inner.backend,
                "send",
                format!("'{}' is an input endpoint", self.inner.endpoint.name),
            ));
        }

        let deadline = Instant::now() + self.inner.send_timeout;
        let ticket = SendTicket::default();
        let (reply, result) = crossbeam_channel::bounded(1);
        let command = Command::Send {
            packet: *packet,
            ticket: ticket.clone(),
            reply,
        };
        match self.inner.commands.send_deadline(command, deadline) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                return Err(self.timeout("send", self.inner.send_timeout))
            }
            Err(SendTimeoutError::Disconnected(_)) => return Err(self.not_open()),
        }

        match result.recv_deadline(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if ticket.abandon() {
                    debug!(name = %self.inner.endpoint.name, "Dropped queued send after timeout");
                } else {
                    warn!(name = %self.inner.endpoint.name, "Send timed out inside the backend");
                }
                Err(self.timeout("send", self.inner.send_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.not_open()),
        }
    }

    /// Send raw words as one packet.
    pub fn send_words(&self, words: &[u32]) -> Result<()> {
        let packet = UmpPacket::from_words(words)?;
        self.send(&packet)
    }

    /// Chunk `payload` into SysEx8 packets under a fresh stream id and send
    /// them in order.
    ///
    /// A failure on the first packet is returned unchanged; a failure after
    /// that becomes [`Error::SysExInterrupted`] and leaves the session open.
    /// Packets after the failing `fragment` are never sent.
    pub fn send_sysex(&self, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let stream_id = self.inner.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let chunks = chunk_sysex(payload, stream_id)?;
        let total = chunks.len();

        for (fragment, packet) in chunks.enumerate() {
            if let Err(source) = self.send(&packet) {
                if fragment == 0 {
                    return Err(source);
                }
                warn!(
                    name = %self.inner.endpoint.name,
                    stream_id,
                    fragment,
                    total,
                    "SysEx stream interrupted"
                );
                return Err(Error::SysExInterrupted {
                    stream_id,
                    fragment,
                    total,
                    source: Box::new(source),
                });
            }
        }
        Ok(())
    }

    /// Call `listener` for every inbound packet, in arrival order.
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&UmpPacket) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        Ok(self.inner.listeners.add_packet(Arc::new(listener)))
    }

    /// Call `listener` with every reassembled inbound SysEx message.
    pub fn subscribe_sysex<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&SysExMessage) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        Ok(self.inner.listeners.add_sysex(Arc::new(listener)))
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Release the native handle and detach all listeners.
    ///
    /// Idempotent. The worker stops within one poll interval. If the worker
    /// does not confirm within the close timeout, [`Error::BackendTimeout`]
    /// is returned and the endpoint stays reserved until the worker has
    /// actually released the handle.
    pub fn close(&self) -> Result<()> {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.listeners.clear();
        self.inner.state.begin_release();

        let deadline = Instant::now() + self.inner.close_timeout;
        let (reply, result) = crossbeam_channel::bounded(1);
        let outcome = match self.inner.commands.send_deadline(Command::Close { reply }, deadline) {
            Ok(()) => match result.recv_deadline(deadline) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(self.timeout("close", self.inner.close_timeout)),
                // Worker already gone; it released the handle on its way out.
                Err(RecvTimeoutError::Disconnected) => Ok(()),
            },
            // The worker notices the release on its own once the queue drains.
            Err(SendTimeoutError::Timeout(_)) => Err(self.timeout("close", self.inner.close_timeout)),
            Err(SendTimeoutError::Disconnected(_)) => Ok(()),
        };

        if matches!(outcome, Err(Error::BackendTimeout { .. })) {
            warn!(name = %self.inner.endpoint.name, "Close timed out; handle released in background");
        } else if let Some(thread) = self.inner.worker.lock().take() {
            let _ = thread.join();
        }
        debug!(name = %self.inner.endpoint.name, "Session closed");
        outcome
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(self.not_open())
        }
    }

    fn not_open(&self) -> Error {
        Error::SessionNotOpen {
            name: self.inner.endpoint.name.clone(),
        }
    }

    fn timeout(&self, operation: &'static str, timeout: Duration) -> Error {
        Error::BackendTimeout {
            operation,
            endpoint: self.inner.endpoint.name.clone(),
            timeout,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.inner.endpoint.name)
            .field("direction", &self.inner.endpoint.direction)
            .field("state", &self.state())
            .finish()
    }
}
