//! # umpio - MIDI 2.0 UMP Transport
//!
//! Moves Universal MIDI Packets between an application and the host's MIDI
//! endpoints.
//!
//! ## Architecture
//!
//! umpio is an umbrella crate that coordinates:
//! - **umpio-codec** - Packet sizing, MIDI 1.0 packing, inbound decoding, SysEx framing
//! - **umpio-transport** - Endpoint registry, sessions, native backends, capabilities
//!
//! ## Quick Start
//!
//! ```ignore
//! use umpio::prelude::*;
//!
//! let transport = UmpTransport::builder().build()?;
//! let synth = transport.open_output(0)?;
//! transport.send_packet(&synth, &[0x2090_3C40])?;
//!
//! let keys = transport.open_input(0)?;
//! transport.on_packet(&keys, |packet| println!("{packet:?}"))?;
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Native backends
//! - `native` - ALSA raw MIDI, CoreMIDI or WinMM, chosen by target OS

/// Re-export of umpio-codec for direct access
pub use umpio_codec as codec;

/// Re-export of umpio-transport for direct access
pub use umpio_transport as transport;

pub use umpio_transport::{
    capabilities, Capabilities, Direction, Endpoint, Error, Result, Session, SessionState,
    Subscription, TransportConfig, UmpTransport, UmpTransportBuilder,
};

/// Convenience prelude for common imports
pub mod prelude {
    // Transport
    pub use crate::transport::{UmpTransport, UmpTransportBuilder};

    // Sessions and endpoints
    pub use crate::transport::{Direction, Endpoint, Session, SessionState, Subscription};

    // Packets
    pub use crate::codec::{chunk_sysex, reassemble_sysex, word_count, UmpPacket};

    // Backends
    pub use crate::transport::{Backend, VirtualBackend};
}
