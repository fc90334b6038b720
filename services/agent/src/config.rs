//! Configuration for the doko agent.
//!
//! Every setting is a long flag that falls back to an environment variable.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;

use crate::identity::INSTANCE_CHECK_TTL;

/// Agent configuration.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Docker Engine endpoint (`unix://` only).
    #[arg(long, env = "DOCKER_HOST", default_value = "unix:///var/run/docker.sock")]
    pub docker_host: String,

    /// Consul agent HTTP address.
    #[arg(long, env = "CONSUL_HTTP_ADDR", default_value = "http://127.0.0.1:8500")]
    pub consul_addr: String,

    /// Consul ACL token.
    #[arg(long, env = "CONSUL_HTTP_TOKEN", hide_env_values = true)]
    pub consul_token: Option<String>,

    /// File holding this agent's persisted instance ID.
    #[arg(long, env = "DOKO_ID_FILE", default_value = "doko-id")]
    pub id_file: PathBuf,

    /// Address health checks are pointed at.
    #[arg(long, env = "DOKO_CHECK_ADDR", default_value = "127.0.0.1")]
    pub check_addr: String,

    /// Quiet window before a reconciliation pass runs, in milliseconds.
    #[arg(long, env = "DOKO_DEBOUNCE_MS", default_value_t = 3000)]
    pub debounce_ms: u64,

    /// Interval of the full resync, in seconds.
    #[arg(long, env = "DOKO_RESYNC_INTERVAL_SECS", default_value_t = 30)]
    pub resync_interval_secs: u64,

    /// Interval between liveness heartbeats, in seconds. Capped at half
    /// the liveness check TTL.
    #[arg(long, env = "DOKO_HEARTBEAT_INTERVAL_SECS", default_value_t = 5)]
    pub heartbeat_interval_secs: u64,

    /// Delay before resubscribing to the Docker event stream, in milliseconds.
    #[arg(long, env = "DOKO_RESUBSCRIBE_DELAY_MS", default_value_t = 1000)]
    pub resubscribe_delay_ms: u64,

    /// Capacity of the reconciliation signal queue.
    #[arg(long, env = "DOKO_SIGNAL_CAPACITY", default_value_t = 10)]
    pub signal_capacity: usize,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[arg(long, env = "DOKO_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Path of the Docker unix socket.
    pub fn docker_socket(&self) -> Result<PathBuf> {
        match self.docker_host.strip_prefix("unix://") {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => bail!(
                "DOCKER_HOST must be a unix:// socket, got '{}'",
                self.docker_host
            ),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.max(1))
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1)).min(max_heartbeat_interval())
    }

    /// True when the configured heartbeat interval had to be shortened.
    pub fn heartbeat_interval_capped(&self) -> bool {
        Duration::from_secs(self.heartbeat_interval_secs) > max_heartbeat_interval()
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }

    pub fn signal_capacity(&self) -> usize {
        self.signal_capacity.max(1)
    }
}

/// Two heartbeats per TTL, so one lost heartbeat never expires the check.
fn max_heartbeat_interval() -> Duration {
    INSTANCE_CHECK_TTL / 2
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        config: Config,
    }

    fn parse(args: &[&str]) -> Config {
        let argv = std::iter::once("doko").chain(args.iter().copied());
        TestCli::try_parse_from(argv).unwrap().config
    }

    #[test]
    fn test_docker_socket_from_unix_url() {
        let config = parse(&["--docker-host", "unix:///run/docker.sock"]);
        assert_eq!(
            config.docker_socket().unwrap(),
            PathBuf::from("/run/docker.sock")
        );
    }

    #[test]
    fn test_docker_socket_rejects_tcp() {
        let config = parse(&["--docker-host", "tcp://127.0.0.1:2375"]);
        assert!(config.docker_socket().is_err());
    }

    #[test]
    fn test_durations_clamped() {
        let config = parse(&[
            "--debounce-ms",
            "0",
            "--resync-interval-secs",
            "0",
            "--signal-capacity",
            "0",
        ]);
        assert_eq!(config.debounce(), Duration::from_millis(1));
        assert_eq!(config.resync_interval(), Duration::from_secs(1));
        assert_eq!(config.signal_capacity(), 1);
    }

    #[test]
    fn test_explicit_intervals() {
        let config = parse(&[
            "--debounce-ms",
            "250",
            "--heartbeat-interval-secs",
            "4",
            "--resubscribe-delay-ms",
            "1500",
        ]);
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(4));
        assert_eq!(config.resubscribe_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn test_heartbeat_interval_stays_inside_ttl() {
        let config = parse(&["--heartbeat-interval-secs", "30"]);
        assert!(config.heartbeat_interval_capped());
        assert_eq!(config.heartbeat_interval(), INSTANCE_CHECK_TTL / 2);
        assert!(config.heartbeat_interval() < INSTANCE_CHECK_TTL);

        let config = parse(&[]);
        assert!(!config.heartbeat_interval_capped());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
    }
}
