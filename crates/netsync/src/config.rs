use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::net::{DEFAULT_PORT, MAX_MESSAGE_SIZE};

pub const MIN_MTU: usize = 256;

/// Tunables shared by the channel, both session ends and discovery.
///
/// Durations are stored as plain numbers so RON files stay readable; use the
/// accessor methods to get [`Duration`]s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetConfig {
    pub max_clients: usize,
    pub tick_rate: u32,
    /// Snapshots per second sent to each client.
    pub snapshot_rate: u32,
    pub silence_timeout_secs: f32,
    /// Message payload bytes per datagram above which fragmentation kicks in.
    pub mtu: usize,
    pub max_reliable_per_packet: usize,
    pub reliable_queue_limit: usize,
    pub reliable_resend_ms: u64,
    pub reliable_backoff: f32,
    pub reliable_max_retries: u32,
    pub fragment_timeout_ms: u64,
    pub keepalive_ms: u64,
    /// Zero-run-length code channel bodies when that makes them smaller.
    pub compress_bodies: bool,
    /// Outgoing bytes per second, 0 disables the limit.
    pub max_outgoing_rate: u32,
    /// Outgoing packets per second, 0 disables the limit.
    pub max_outgoing_packets: u32,
    /// Rate a client asks the server to stay under.
    pub client_max_rate: u32,
    pub handshake_retry_ms: u64,
    pub handshake_backoff: f32,
    pub handshake_max_retries: u32,
    pub handshake_timeout_secs: f32,
    pub challenge_lifetime_secs: f32,
    pub max_challenges: usize,
    pub snapshot_history: usize,
    pub playout_delay_ms: u64,
    pub playout_capacity: usize,
    pub discovery_timeout_ms: u64,
    pub discovery_port: u16,
    pub discovery_broadcast: bool,
    pub rendezvous: Vec<SocketAddr>,
    pub server_name: String,
    pub map_name: String,
    pub banned: Vec<IpAddr>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_clients: 32,
            tick_rate: 60,
            snapshot_rate: 20,
            silence_timeout_secs: 10.0,
            mtu: 1400,
            max_reliable_per_packet: 8,
            reliable_queue_limit: 1024,
            reliable_resend_ms: 100,
            reliable_backoff: 1.5,
            reliable_max_retries: 30,
            fragment_timeout_ms: 2000,
            keepalive_ms: 250,
            compress_bodies: true,
            max_outgoing_rate: 64_000,
            max_outgoing_packets: 120,
            client_max_rate: 32_000,
            handshake_retry_ms: 500,
            handshake_backoff: 1.5,
            handshake_max_retries: 10,
            handshake_timeout_secs: 10.0,
            challenge_lifetime_secs: 10.0,
            max_challenges: 1024,
            snapshot_history: 64,
            playout_delay_ms: 100,
            playout_capacity: 32,
            discovery_timeout_ms: 1000,
            discovery_port: DEFAULT_PORT,
            discovery_broadcast: true,
            rendezvous: Vec::new(),
            server_name: String::from("netsync server"),
            map_name: String::from("default"),
            banned: Vec::new(),
        }
    }
}

impl NetConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        let config: Self = ron::from_str(&text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(ConfigError::Serialize)?;
        std::fs::write(path, text).map_err(ConfigError::Write)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be positive".into()));
        }
        if self.snapshot_rate == 0 {
            return Err(ConfigError::Invalid("snapshot_rate must be positive".into()));
        }
        if self.mtu < MIN_MTU || self.mtu > MAX_MESSAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "mtu must be between {} and {} bytes",
                MIN_MTU, MAX_MESSAGE_SIZE
            )));
        }
        if self.max_clients == 0 || self.max_clients > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_clients must be between 1 and {}",
                u16::MAX
            )));
        }
        if self.snapshot_history == 0 || self.playout_capacity < 2 {
            return Err(ConfigError::Invalid(
                "snapshot_history and playout_capacity are too small".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    /// Ticks between two snapshots for the same client, never below one.
    pub fn snapshot_interval_ticks(&self) -> u32 {
        (self.tick_rate / self.snapshot_rate.max(1)).max(1)
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.silence_timeout_secs.max(0.0))
    }

    pub fn reliable_resend(&self) -> Duration {
        Duration::from_millis(self.reliable_resend_ms)
    }

    pub fn fragment_timeout(&self) -> Duration {
        Duration::from_millis(self.fragment_timeout_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn handshake_retry(&self) -> Duration {
        Duration::from_millis(self.handshake_retry_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.handshake_timeout_secs.max(0.0))
    }

    pub fn challenge_lifetime(&self) -> Duration {
        Duration::from_secs_f32(self.challenge_lifetime_secs.max(0.0))
    }

    pub fn playout_delay(&self) -> Duration {
        Duration::from_millis(self.playout_delay_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.snapshot_interval_ticks(), 3);
    }

    #[test]
    fn test_validate_rejects_tiny_mtu() {
        let config = NetConfig {
            mtu: 100,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_ron_roundtrip_with_partial_file() {
        let text = "(max_clients: 4, server_name: \"lan party\", banned: [\"10.0.0.7\"])";
        let config: NetConfig = ron::from_str(text).unwrap();

        assert_eq!(config.max_clients, 4);
        assert_eq!(config.server_name, "lan party");
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.banned.len(), 1);

        let written = ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::default())
            .unwrap();
        let reread: NetConfig = ron::from_str(&written).unwrap();
        assert_eq!(reread, config);
    }

    #[test]
    fn test_snapshot_interval_never_zero() {
        let config = NetConfig {
            tick_rate: 10,
            snapshot_rate: 60,
            ..Default::default()
        };
        assert_eq!(config.snapshot_interval_ticks(), 1);
    }
}
