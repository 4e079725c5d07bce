//! Session configuration
//!
//! Every field has a default, so an empty JSON object (or no file at all) is
//! a valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::framing::DEFAULT_MAX_FRAME_LEN;
use crate::hello::{BASE_1_0, BASE_1_1};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SessionConfig {
    /// Deadline for a single RPC reply
    pub rpc_timeout_ms: u64,
    /// Deadline for the server hello after connecting
    pub hello_timeout_ms: u64,
    /// Deadline for establishing the transport
    pub connect_timeout_ms: u64,
    /// Capabilities advertised in the client hello
    pub capabilities: Vec<String>,
    /// Largest message accepted or sent, in bytes
    pub max_frame_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 30_000,
            hello_timeout_ms: 15_000,
            connect_timeout_ms: 10_000,
            capabilities: vec![BASE_1_0.to_string(), BASE_1_1.to_string()],
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Parse configuration from a JSON string
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Deadline for a single RPC reply
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Deadline for the server `<hello>`
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    /// Deadline for opening the transport
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Same settings with a different RPC deadline
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Advertise only base:1.0, keeping end-of-message framing for the whole session
    pub fn base_1_0_only(mut self) -> Self {
        self.capabilities.retain(|c| c != BASE_1_1);
        self
    }
}
