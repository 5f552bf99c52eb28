//! Runtime configuration.
//!
//! [`RuntimeOptions`] gathers everything the registry needs to know about a
//! run: the start countdown, the optional fixed runtime, the sync handshake
//! settings and the run-report path. Options live in a toml file next to
//! the pipeline; [`RuntimeOptions::load_or_default`] reads it and, when the
//! file is missing or unreadable, writes the defaults back so the operator
//! has a template to edit.

use crate::error::{Result, SigFlowError};
use crate::sync::{RunMode, Transport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default sync handshake port.
pub const DEFAULT_SYNC_PORT: u16 = 1111;

/// Options controlling one registry instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Seconds counted down before the pipeline starts
    pub countdown: u32,
    /// Runtime in seconds until the pipeline stops; with a value <= 0,
    /// `wait()` blocks until `cancel_wait()`
    pub runtime: f64,
    /// Path of the run-info report; `None` disables it
    pub report: Option<PathBuf>,
    /// Multi-instance lock-step settings
    pub sync: SyncOptions,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            countdown: 0,
            runtime: 0.0,
            report: None,
            sync: SyncOptions::default(),
        }
    }
}

/// Settings for the distributed start/stop handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Turn on sync mode: send the handshake when serving, wait for it
    /// when listening
    pub enabled: bool,
    /// Serve as client, i.e. wait for the server's messages
    pub listen: bool,
    /// Peer host; empty means any (listen) or localhost (serve)
    pub host: String,
    /// Handshake port
    pub port: u16,
    /// UDP or TCP
    pub transport: Transport,
    /// Run mode announced by the server
    pub run_mode: RunMode,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: false,
            host: String::new(),
            port: DEFAULT_SYNC_PORT,
            transport: Transport::default(),
            run_mode: RunMode::default(),
        }
    }
}

impl RuntimeOptions {
    /// Load options from a toml file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SigFlowError::Config(format!("read failed: {e}")))?;
        toml::from_str(&text).map_err(|e| SigFlowError::Config(format!("parse failed: {e}")))
    }

    /// Load options, falling back to defaults (and writing them back as a
    /// template) when the file is missing or unreadable.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!("using default options ({})", e);
                let options = Self::default();
                if let Err(e) = options.save(path) {
                    tracing::warn!("could not write default options: {}", e);
                }
                options
            }
        }
    }

    /// Save options as toml.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| SigFlowError::Config(format!("serialize failed: {e}")))?;
        std::fs::write(path.as_ref(), text)
            .map_err(|e| SigFlowError::Config(format!("write failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = RuntimeOptions::default();
        assert_eq!(options.countdown, 0);
        assert!(!options.sync.enabled);
        assert_eq!(options.sync.port, DEFAULT_SYNC_PORT);
        assert_eq!(options.sync.run_mode, RunMode::RunAndQuit);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut options = RuntimeOptions::default();
        options.countdown = 3;
        options.runtime = 12.5;
        options.sync.enabled = true;
        options.sync.listen = true;
        options.sync.transport = Transport::Tcp;
        options.sync.run_mode = RunMode::RunAndRestart;

        let text = toml::to_string_pretty(&options).unwrap();
        let parsed: RuntimeOptions = toml::from_str(&text).unwrap();
        assert_eq!(parsed.countdown, 3);
        assert_eq!(parsed.runtime, 12.5);
        assert!(parsed.sync.listen);
        assert_eq!(parsed.sync.transport, Transport::Tcp);
        assert_eq!(parsed.sync.run_mode, RunMode::RunAndRestart);
    }

    #[test]
    fn test_partial_file_gets_defaults() {
        let parsed: RuntimeOptions = toml::from_str("countdown = 5").unwrap();
        assert_eq!(parsed.countdown, 5);
        assert_eq!(parsed.sync.port, DEFAULT_SYNC_PORT);
    }

    #[test]
    fn test_load_or_default_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        let options = RuntimeOptions::load_or_default(&path);
        assert_eq!(options.countdown, 0);
        assert!(path.exists(), "defaults should be written back");

        let reloaded = RuntimeOptions::load(&path).unwrap();
        assert_eq!(reloaded.sync.port, DEFAULT_SYNC_PORT);
    }
}
