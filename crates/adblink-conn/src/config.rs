use std::time::Duration;

/// Tunables for a connection.
///
/// The timeouts bound every blocking wait so an abandoned peer never hangs a
/// caller forever. The identity strings are what the device displays: the
/// system identity in its transport list, the key name in the authorization
/// prompt.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Bound on the whole CNXN/AUTH handshake. Generous because the
    /// public-key path waits for a human to approve a prompt on the device.
    pub connect_timeout: Duration,
    /// Bound on one `open` waiting for the peer's OKAY/CLSE.
    pub open_timeout: Duration,
    /// Bound on one write chunk waiting for its flow-control OKAY.
    pub write_timeout: Duration,
    /// System identity sent in CNXN.
    pub system_identity: String,
    /// Key name appended to the public-key blob.
    pub key_name: String,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            open_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            system_identity: "host::adblink".to_string(),
            key_name: "host@adblink".to_string(),
        }
    }
}

impl ConnectConfig {
    /// Override the handshake bound.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the open bound.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Override the per-chunk write bound.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Override the CNXN system identity.
    pub fn with_system_identity(mut self, identity: impl Into<String>) -> Self {
        self.system_identity = identity.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_override_defaults() {
        let config = ConnectConfig::default()
            .with_connect_timeout(Duration::from_millis(1))
            .with_open_timeout(Duration::from_millis(2))
            .with_write_timeout(Duration::from_millis(3))
            .with_system_identity("host::custom");

        assert_eq!(config.connect_timeout, Duration::from_millis(1));
        assert_eq!(config.open_timeout, Duration::from_millis(2));
        assert_eq!(config.write_timeout, Duration::from_millis(3));
        assert_eq!(config.system_identity, "host::custom");
    }
}
