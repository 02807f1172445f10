//! Inbound listener registry for one session.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, warn};
use umpio_codec::{SysExFragment, SysExMessage, SysExReassembler, UmpPacket};

pub type PacketListener = Arc<dyn Fn(&UmpPacket) + Send + Sync>;
pub type SysExListener = Arc<dyn Fn(&SysExMessage) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: AtomicU64,
    packets: Mutex<Vec<(u64, PacketListener)>>,
    sysex: Mutex<Vec<(u64, SysExListener)>>,
    reassembler: Mutex<SysExReassembler>,
}

impl ListenerSet {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add_packet(self: &Arc<Self>, listener: PacketListener) -> Subscription {
        let id = self.next_id();
        self.packets.lock().push((id, listener));
        Subscription::new(id, ListenerKind::Packet, self)
    }

    pub fn add_sysex(self: &Arc<Self>, listener: SysExListener) -> Subscription {
        let id = self.next_id();
        self.sysex.lock().push((id, listener));
        Subscription::new(id, ListenerKind::SysEx, self)
    }

    fn remove(&self, id: u64, kind: ListenerKind) -> bool {
        match kind {
            ListenerKind::Packet => remove_by_id(&mut self.packets.lock(), id),
            ListenerKind::SysEx => remove_by_id(&mut self.sysex.lock(), id),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len() + self.sysex.lock().len()
    }

    pub fn clear(&self) {
        self.packets.lock().clear();
        self.sysex.lock().clear();
        self.reassembler.lock().reset();
    }

    /// Deliver one decoded packet to every listener, in subscription order.
    ///
    /// Listeners run on a snapshot, so they may subscribe or cancel from
    /// inside the callback.
    pub fn dispatch(&self, packet: &UmpPacket) {
        let listeners: Vec<PacketListener> =
            self.packets.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(packet))).is_err() {
                error!(packet = ?packet, "Packet listener panicked");
            }
        }

        if SysExFragment::is_sysex(packet) {
            self.dispatch_sysex(packet);
        }
    }

    fn dispatch_sysex(&self, packet: &UmpPacket) {
        if self.sysex.lock().is_empty() {
            return;
        }
        let message = match self.reassembler.lock().push(packet) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Discarding inbound SysEx stream");
                return;
            }
        };

        let listeners: Vec<SysExListener> =
            self.sysex.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&message))).is_err() {
                error!(len = message.payload.len(), "SysEx listener panicked");
            }
        }
    }
}

fn remove_by_id<T>(entries: &mut Vec<(u64, T)>, id: u64) -> bool {
    let before = entries.len();
    entries.retain(|(entry, _)| *entry != id);
    entries.len() != before
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerKind {
    Packet,
    SysEx,
}

/// A registered inbound listener.
///
/// Dropping a `Subscription` leaves the listener attached until the session
/// closes; call [`cancel`](Self::cancel) to detach it earlier.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: ListenerKind,
    set: Weak<ListenerSet>,
}

impl Subscription {
    fn new(id: u64, kind: ListenerKind, set: &Arc<ListenerSet>) -> Self {
        Self {
            id,
            kind,
            set: Arc::downgrade(set),
        }
    }

    /// Detach the listener. Returns `false` if it was already gone.
    pub fn cancel(self) -> bool {
        self.set
            .upgrade()
            .is_some_and(|set| set.remove(self.id, self.kind))
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("packets", &self.packets.lock().len())
            .field("sysex", &self.sysex.lock().len())
            .finish()
    }
}
