//! Per-session I/O thread.
//!
//! The worker owns the native handle for the whole session: it opens it,
//! performs every send in queue order, polls inbound data and finally
//! closes it. Nothing else ever touches the handle, and only the worker
//! hands the endpoint back to the registry once the handle is gone.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, error};
use umpio_codec::{UmpDecoder, UmpPacket};

use super::listeners::ListenerSet;
use super::StateCell;
use crate::backend::Backend;
use crate::config::TransportConfig;
use crate::endpoint::{Direction, Endpoint};
use crate::error::{Error, Result};

const PENDING: u8 = 0;
const TAKEN: u8 = 1;
const ABANDONED: u8 = 2;

/// Decides who owns a queued send: the worker that transmits it or the
/// caller that stopped waiting for it. Exactly one side wins.
#[derive(Debug, Clone, Default)]
pub(crate) struct SendTicket(Arc<AtomicU8>);

impl SendTicket {
    /// Worker side. False if the caller already gave up.
    fn take(&self) -> bool {
        self.swap(PENDING, TAKEN)
    }

    /// Caller side. False if the backend call has already started.
    pub fn abandon(&self) -> bool {
        self.swap(PENDING, ABANDONED)
    }

    fn swap(&self, from: u8, to: u8) -> bool {
        self.0
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub(crate) enum Command {
    Send {
        packet: UmpPacket,
        ticket: SendTicket,
        reply: Sender<Result<()>>,
    },
    Close {
        reply: Sender<Result<()>>,
    },
}

pub(crate) struct Worker {
    pub commands: Sender<Command>,
    pub thread: JoinHandle<()>,
}

impl Worker {
    /// Start the worker and wait for it to open `endpoint`.
    ///
    /// `state` must already be claimed. From here on the worker owns its
    /// release: it is handed back only after the backend has closed the
    /// handle or failed to open one.
    ///
    /// If the open outlasts the configured timeout the caller gets
    /// [`Error::BackendTimeout`] and the endpoint stays reserved; the worker
    /// closes the handle itself once the native call returns.
    pub fn spawn<B: Backend>(
        backend: Arc<B>,
        endpoint: Endpoint,
        config: &TransportConfig,
        state: Arc<StateCell>,
        listeners: Arc<ListenerSet>,
    ) -> Result<Self> {
        let (commands, command_rx) = crossbeam_channel::bounded(config.command_queue_depth.max(1));
        // Rendezvous: either the opener takes the result or the worker learns
        // that nobody is waiting for it any more.
        let (opened_tx, opened_rx) = crossbeam_channel::bounded(0);
        let poll_interval = config.poll_interval();
        let name = endpoint.name.clone();

        let thread = thread::Builder::new()
            .name(format!("umpio-{}-{}", endpoint.direction, endpoint.index))
            .spawn({
                let endpoint = endpoint.clone();
                let state = Arc::clone(&state);
                move || {
                    let _release = ReleaseOnExit(Arc::clone(&state));
                    let io = Io {
                        endpoint,
                        commands: command_rx,
                        state,
                        listeners,
                        poll_interval,
                    };
                    io.run(&*backend, opened_tx);
                }
            })
            .map_err(|e| {
                state.release();
                Error::io("open", &name, e.raw_os_error(), e.to_string())
            })?;

        match opened_rx.recv_timeout(config.open_timeout()) {
            Ok(Ok(())) => Ok(Self { commands, thread }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            // The worker cannot hand the endpoint back before `opened_rx`
            // is dropped, so the cell is still ours to mark.
            Err(RecvTimeoutError::Timeout) => {
                state.begin_release();
                Err(Error::BackendTimeout {
                    operation: "open",
                    endpoint: name,
                    timeout: config.open_timeout(),
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::io("open", name, None, "I/O worker exited during open"))
            }
        }
    }
}

struct ReleaseOnExit(Arc<StateCell>);

impl Drop for ReleaseOnExit {
    fn drop(&mut self) {
        self.0.release();
    }
}

struct Io {
    endpoint: Endpoint,
    commands: Receiver<Command>,
    state: Arc<StateCell>,
    listeners: Arc<ListenerSet>,
    poll_interval: Duration,
}

impl Io {
    fn run<B: Backend>(&self, backend: &B, opened: Sender<Result<()>>) {
        let endpoint = &self.endpoint;
        let mut handle = match backend.open(endpoint) {
            Ok(handle) => handle,
            Err(e) => {
                debug!(name = %endpoint.name, error = %e, "Open failed");
                let _ = opened.send(Err(e));
                return;
            }
        };
        if opened.send(Ok(())).is_err() {
            debug!(name = %endpoint.name, "Opener gave up; releasing late handle");
            if let Err(e) = backend.close(handle) {
                error!(name = %endpoint.name, error = %e, "Failed to release late handle");
            }
            return;
        }
        debug!(name = %endpoint.name, direction = %endpoint.direction, "I/O worker started");

        let receives = endpoint.direction == Direction::Input;
        let mut decoder = UmpDecoder::new();

        loop {
            let command = if receives {
                match self.commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match self.commands.recv_timeout(self.poll_interval) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };

            match command {
                Some(Command::Send {
                    packet,
                    ticket,
                    reply,
                }) => {
                    if self.state.is_releasing() {
                        let _ = reply.send(Err(Error::SessionNotOpen {
                            name: endpoint.name.clone(),
                        }));
                        continue;
                    }
                    if !ticket.take() {
                        debug!(name = %endpoint.name, "Skipping send abandoned by its caller");
                        continue;
                    }
                    let result = backend.send(&mut handle, &packet);
                    if let Err(e) = &result {
                        debug!(name = %endpoint.name, error = %e, "Send failed");
                    }
                    let _ = reply.send(result);
                }
                Some(Command::Close { reply }) => {
                    let _ = reply.send(backend.close(handle));
                    debug!(name = %endpoint.name, "I/O worker stopped");
                    return;
                }
                // Close requested but its command never made it into the queue.
                None if self.state.is_releasing() => break,
                None if receives => match backend.poll_receive(&mut handle, self.poll_interval) {
                    Ok(Some(bytes)) => {
                        for packet in decoder.decode(&bytes) {
                            self.listeners.dispatch(&packet);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(name = %endpoint.name, error = %e, "Receive failed");
                        thread::sleep(self.poll_interval);
                    }
                },
                None => {}
            }
        }

        if let Err(e) = backend.close(handle) {
            error!(name = %endpoint.name, error = %e, "Failed to release handle");
        }
        debug!(name = %endpoint.name, "I/O worker stopped");
    }
}
