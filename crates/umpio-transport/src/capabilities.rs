//! Static capability report for the compiled-in backend.

use std::sync::OnceLock;

use serde::Serialize;
use umpio_codec::MAX_SYSEX_PAYLOAD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Platform {
    Windows,
    #[serde(rename = "macOS")]
    MacOs,
    Linux,
    Unknown,
}

impl Platform {
    pub const fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub platform: Platform,
    /// Whether the native API carries MIDI 2.0 packets end to end.
    pub midi2_support: bool,
    pub ump_support: bool,
    pub midi_ci_support: bool,
    /// Largest SysEx payload `send_sysex` accepts, in bytes.
    pub max_payload: usize,
}

impl Capabilities {
    fn detect() -> Self {
        let platform = Platform::current();
        let native = cfg!(feature = "native");
        Self {
            platform,
            midi2_support: native && matches!(platform, Platform::MacOs | Platform::Linux),
            ump_support: true,
            midi_ci_support: false,
            max_payload: MAX_SYSEX_PAYLOAD,
        }
    }
}

/// Capabilities of this build. Computed once, never fails.
pub fn capabilities() -> &'static Capabilities {
    static CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();
    CAPABILITIES.get_or_init(Capabilities::detect)
}
