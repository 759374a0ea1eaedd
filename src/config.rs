//! Environment-derived runtime flags.
//!
//! All three flags are presence-based: setting the variable to any value
//! (including the empty string) turns the flag on. The record is built once
//! at startup and shared read-only with every component.

/// Immutable runtime configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    /// `STARTED`: report the ignition as on regardless of what the board says.
    pub spoofing_started: bool,
    /// `FAKESEND`: drain outgoing envelopes but suppress the actual bulk write.
    pub fake_send: bool,
    /// `BOARDD_LOOPBACK`: ask the board to route bulk-out frames back to bulk-in.
    pub loopback_can: bool,
}

impl BridgeConfig {
    /// Build the flag record from the process environment.
    pub fn from_env() -> Self {
        Self {
            spoofing_started: flag_present("STARTED"),
            fake_send: flag_present("FAKESEND"),
            loopback_can: flag_present("BOARDD_LOOPBACK"),
        }
    }
}

fn flag_present(name: &str) -> bool {
    std::env::var_os(name).is_some()
}
