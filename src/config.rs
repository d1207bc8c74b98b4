use core::time::Duration;

use crate::message::{Address, ProtocolVersion};

/// Protocol revision this crate speaks.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(1, 4);
/// Leaves answer within a few milliseconds, a missing reply is detected after this.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(20);

/// Use [`NetworkConfigBuilder`] to tune a network, or [`NetworkConfig::default`].
///
/// The serial port itself is configured by its owner, leaves use 115200 baud, 8N1 by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Our own address, written as `FROM` in every request. Default is 0x1E.
    pub master: Address,
    /// How long to wait for the first byte of a reply.
    pub reply_timeout: Duration,
    /// How long the rest of a frame may take once its SOH was seen.
    pub frame_timeout: Duration,
    /// Ping replies announcing another version are not considered current.
    pub expected_version: ProtocolVersion,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            master: Address::DEFAULT_MASTER,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            frame_timeout: DEFAULT_REPLY_TIMEOUT,
            expected_version: PROTOCOL_VERSION,
        }
    }
}

impl NetworkConfig {
    pub fn builder() -> NetworkConfigBuilder {
        NetworkConfigBuilder::default()
    }
}

/// Use this type to create a [`NetworkConfig`].
#[derive(Debug, Default)]
pub struct NetworkConfigBuilder {
    config: NetworkConfig,
    /// Whether the frame timeout was set explicitly, otherwise it follows the reply timeout.
    frame_timeout_set: bool,
}

impl NetworkConfigBuilder {
    /// Set the address the master sends from.
    pub fn with_master(mut self, master: impl Into<Address>) -> Self {
        self.config.master = master.into();
        self
    }

    /// Set the reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.config.reply_timeout = timeout;
        self
    }

    /// Set the frame timeout.
    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.config.frame_timeout = timeout;
        self.frame_timeout_set = true;
        self
    }

    /// Set the protocol version leaves are expected to announce.
    pub fn with_expected_version(mut self, version: ProtocolVersion) -> Self {
        self.config.expected_version = version;
        self
    }

    pub fn build(self) -> NetworkConfig {
        let mut config = self.config;
        if !self.frame_timeout_set {
            config.frame_timeout = config.reply_timeout;
        }
        config
    }
}
