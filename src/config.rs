//! Command-line configuration.

use clap::Parser;
use thiserror::Error;

/// Longest accepted connection password.
pub const MAX_PASSWORD_LEN: usize = 50;

/// Server invocation: `ferricd <port> <password>`.
#[derive(Debug, Clone, Parser)]
#[command(name = "ferricd", about = "RFC 1459 subset IRC relay server")]
pub struct ServerConfig {
    /// TCP port to listen on (1024-65535).
    pub port: u16,
    /// Connection password clients must supply with PASS.
    pub password: String,
    /// Server name used as the prefix of numeric replies.
    #[arg(long, default_value = "ferric.localdomain")]
    pub server_name: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("port must be between 1024 and 65535 (got {0})")]
    PortOutOfRange(u16),
    #[error("password cannot be empty")]
    EmptyPassword,
    #[error("password too long (max 50 characters)")]
    PasswordTooLong,
    #[error("password cannot contain whitespace")]
    PasswordWhitespace,
}

impl ServerConfig {
    /// Check the invocation contract before binding anything. A failure
    /// here is a startup error: one diagnostic, exit non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port < 1024 {
            return Err(ConfigError::PortOutOfRange(self.port));
        }
        if self.password.is_empty() {
            return Err(ConfigError::EmptyPassword);
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooLong);
        }
        if self.password.chars().any(|c| c.is_whitespace()) {
            return Err(ConfigError::PasswordWhitespace);
        }
        Ok(())
    }
}
