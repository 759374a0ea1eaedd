//! Client for the persistent configuration store.
//!
//! The store is a directory of file-per-key entries maintained by the wider
//! stack; this bridge only ever reads `CarParams`. The root defaults to
//! `/data/params` and can be pointed elsewhere with `PARAMS_PATH` (tests
//! use temp directories).

use crate::safety::SafetyModel;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;

/// Key holding the vehicle configuration blob.
pub const CAR_PARAMS_KEY: &str = "CarParams";

const DEFAULT_PARAMS_ROOT: &str = "/data/params";

/// Handle on the store root.
#[derive(Debug, Clone)]
pub struct Params {
    root: PathBuf,
}

impl Params {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root from `PARAMS_PATH`, falling back to the system default.
    pub fn from_env() -> Self {
        let root = std::env::var_os("PARAMS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PARAMS_ROOT));
        Self::new(root)
    }

    /// Read a key's blob. A missing key is `Ok(None)`; only real I/O
    /// trouble is an error.
    pub fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.root.join(key)) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write a key. The bridge itself never writes in production; this
    /// exists for tests and tooling.
    pub fn write(&self, key: &str, blob: &[u8]) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.root.join(key), blob)
    }
}

/// Decoded form of the `CarParams` blob. Only the safety model is of
/// interest to the bridge; unknown fields are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub safety_model: SafetyModel,
}
