//! Vehicle safety model and the one-shot arming gate.
//!
//! The board boots into `no_output` and refuses to transmit actuation
//! frames until its safety code is non-zero. The gate waits for the vehicle
//! configuration to appear in the params store, maps its safety model to a
//! board code, programs the board exactly once, and exits. The send pump
//! needs no extra interlock because of this board-side guarantee.

use crate::board::BoardIo;
use crate::params::{CAR_PARAMS_KEY, Params, VehicleConfig};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Board-side safety codes.
pub const SAFETY_NO_OUTPUT: u16 = 0;
pub const SAFETY_HONDA: u16 = 1;
pub const SAFETY_TOYOTA: u16 = 2;
pub const SAFETY_ELM327: u16 = 0xE327;

/// Params-store poll period while waiting for the vehicle configuration.
const CONFIG_POLL_PERIOD: Duration = Duration::from_millis(100);

/// Safety policy selector carried in the vehicle configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyModel {
    NoOutput,
    Honda,
    Toyota,
    Elm327,
    /// A model this bridge does not know. Logged; never programmed into
    /// the board.
    #[serde(other)]
    Unknown,
}

impl SafetyModel {
    /// The code the board expects for this model, or `None` for `Unknown`.
    pub fn board_code(self) -> Option<u16> {
        match self {
            SafetyModel::NoOutput => Some(SAFETY_NO_OUTPUT),
            SafetyModel::Honda => Some(SAFETY_HONDA),
            SafetyModel::Toyota => Some(SAFETY_TOYOTA),
            SafetyModel::Elm327 => Some(SAFETY_ELM327),
            SafetyModel::Unknown => None,
        }
    }
}

/// Whether `code` is one of the values the board accepts from this bridge.
pub fn is_valid_safety_code(code: u16) -> bool {
    matches!(
        code,
        SAFETY_NO_OUTPUT | SAFETY_HONDA | SAFETY_TOYOTA | SAFETY_ELM327
    )
}

/// The one-shot safety gate.
///
/// Polls the params store at 10 Hz for the vehicle configuration, arms the
/// board, and returns. Returns without arming when the exit flag is raised
/// first, when the blob does not decode, or when the model is unknown; in
/// all of those cases the board stays in `no_output`.
pub fn safety_gate_loop(board: &dyn BoardIo, params: &Params, do_exit: &AtomicBool) {
    info!("waiting for vehicle configuration to set safety model");
    let blob = loop {
        if do_exit.load(Ordering::Relaxed) {
            return;
        }
        match params.read(CAR_PARAMS_KEY) {
            Ok(Some(blob)) if !blob.is_empty() => break blob,
            Ok(_) => {}
            Err(e) => warn!("params read failed: {}", e),
        }
        thread::sleep(CONFIG_POLL_PERIOD);
    };
    info!("got {} bytes of vehicle configuration", blob.len());

    let config: VehicleConfig = match serde_json::from_slice(&blob) {
        Ok(config) => config,
        Err(e) => {
            error!("vehicle configuration did not decode: {}", e);
            return;
        }
    };

    let Some(code) = config.safety_model.board_code() else {
        error!("unknown safety model {:?}", config.safety_model);
        return;
    };

    info!("setting safety model {:?} (code 0x{:x})", config.safety_model, code);
    if let Err(e) = board.set_safety_model(code) {
        error!("failed to arm safety model: {}", e);
    }
}
