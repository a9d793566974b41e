use std::time::Duration;

use clap::Args;

use crate::error::ConfigError;

/// Message shown to an entity whose record is locked by another process.
pub const DEFAULT_KICK_MESSAGE: &str =
    "Your data is still in use on another server. Please rejoin in a minute.";
/// Message shown to an entity whose record could not be loaded for any other reason.
pub const DEFAULT_LOAD_FAILURE_MESSAGE: &str =
    "Your data could not be loaded. Please try again later.";

/// Tunables of the session layer, shared by every binary.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Autosave period in seconds; also the session-lock staleness threshold
    #[arg(long = "autosave-interval", default_value = "60", env = "AUTOSAVE_INTERVAL")]
    pub autosave_interval_secs: u64,

    /// Attempts per remote call before giving up
    #[arg(long, default_value = "3", env = "RETRY_ATTEMPTS")]
    pub retry_attempts: u32,

    /// Fixed delay between failed attempts (seconds)
    #[arg(long = "retry-delay", default_value = "2", env = "RETRY_DELAY")]
    pub retry_delay_secs: u64,

    /// Message shown to an entity rejected by a fresh session lock
    #[arg(long, default_value = DEFAULT_KICK_MESSAGE, env = "SESSION_LOCK_KICK_MESSAGE")]
    pub kick_message: String,

    /// Message shown to an entity whose data failed to load
    #[arg(long, default_value = DEFAULT_LOAD_FAILURE_MESSAGE, env = "LOAD_FAILURE_MESSAGE")]
    pub load_failure_message: String,

    /// Upper bound on the shutdown flush (seconds)
    #[arg(long = "shutdown-deadline", default_value = "30", env = "SHUTDOWN_DEADLINE")]
    pub shutdown_deadline_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave_interval_secs: 60,
            retry_attempts: 3,
            retry_delay_secs: 2,
            kick_message: DEFAULT_KICK_MESSAGE.to_string(),
            load_failure_message: DEFAULT_LOAD_FAILURE_MESSAGE.to_string(),
            shutdown_deadline_secs: 30,
        }
    }
}

impl SessionConfig {
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_secs)
    }

    /// Reject settings the lock protocol cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        if self.autosave_interval_secs == 0 {
            return Err(ConfigError::ZeroAutosaveInterval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        session: SessionConfig,
    }

    #[test]
    fn test_cli_defaults_match_default_impl() {
        let cli = TestCli::try_parse_from(["test"]).unwrap();
        assert_eq!(cli.session, SessionConfig::default());
        assert_eq!(cli.session.autosave_interval(), Duration::from_secs(60));
        assert_eq!(cli.session.retry_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = TestCli::try_parse_from([
            "test",
            "--autosave-interval",
            "15",
            "--retry-attempts",
            "5",
            "--kick-message",
            "busy",
        ])
        .unwrap();
        assert_eq!(cli.session.autosave_interval_secs, 15);
        assert_eq!(cli.session.retry_attempts, 5);
        assert_eq!(cli.session.kick_message, "busy");
    }

    #[test]
    fn test_validate() {
        assert!(SessionConfig::default().validate().is_ok());

        let config = SessionConfig {
            retry_attempts: 0,
            ..SessionConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroRetryAttempts));

        let config = SessionConfig {
            autosave_interval_secs: 0,
            ..SessionConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroAutosaveInterval));
    }
}
