//! Sandbox configuration with builder pattern.

use std::time::Duration;

use crate::error::{Result, SandboxError};

/// Configuration for a JavaScript sandbox. Fixed once the sandbox is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Engine heap ceiling in bytes, applied after the context is initialized.
    pub max_memory: usize,
    /// Wall-clock budget per evaluation. `Duration::ZERO` disables it.
    pub timeout: Duration,
    /// Maximum number of console bytes captured per evaluation.
    pub console_max_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_memory: 1_000_000,
            timeout: Duration::from_millis(5_000),
            console_max_bytes: 10_000,
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Whether evaluations are subject to a timeout.
    pub fn has_timeout(&self) -> bool {
        !self.timeout.is_zero()
    }

    /// Reject limits the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_memory == 0 {
            return Err(SandboxError::Config(
                "max_memory must be greater than zero".to_string(),
            ));
        }
        if self.console_max_bytes == 0 {
            return Err(SandboxError::Config(
                "console_max_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    max_memory: Option<usize>,
    timeout: Option<Duration>,
    console_max_bytes: Option<usize>,
}

impl SandboxConfigBuilder {
    /// Set the engine memory limit in bytes.
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Set the per-evaluation timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Let evaluations run without a wall-clock limit.
    pub fn no_timeout(self) -> Self {
        self.timeout(Duration::ZERO)
    }

    /// Set the console capture ceiling in bytes.
    pub fn console_max_bytes(mut self, bytes: usize) -> Self {
        self.console_max_bytes = Some(bytes);
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        let default = SandboxConfig::default();
        SandboxConfig {
            max_memory: self.max_memory.unwrap_or(default.max_memory),
            timeout: self.timeout.unwrap_or(default.timeout),
            console_max_bytes: self.console_max_bytes.unwrap_or(default.console_max_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.max_memory, 1_000_000);
        assert_eq!(config.timeout, Duration::from_millis(5_000));
        assert_eq!(config.console_max_bytes, 10_000);
        assert!(config.has_timeout());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SandboxConfig::builder()
            .max_memory(4 * 1024 * 1024)
            .timeout(Duration::from_millis(250))
            .console_max_bytes(64)
            .build();

        assert_eq!(config.max_memory, 4 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.console_max_bytes, 64);
    }

    #[test]
    fn test_no_timeout() {
        let config = SandboxConfig::builder().no_timeout().build();
        assert!(!config.has_timeout());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = SandboxConfig::builder().max_memory(0).build();
        assert!(matches!(config.validate(), Err(SandboxError::Config(_))));

        let config = SandboxConfig::builder().console_max_bytes(0).build();
        assert!(matches!(config.validate(), Err(SandboxError::Config(_))));
    }
}
