use crate::process::ProcessSignal;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// How a subprocess channel stops its child on close
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownPolicy {
    /// Time the child gets to exit after being signalled (in milliseconds)
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Signal sent before the grace period starts
    #[serde(default)]
    pub signal: ProcessSignal,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            signal: ProcessSignal::default(),
        }
    }
}

impl ShutdownPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period_ms = u64::try_from(grace_period.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_signal(mut self, signal: ProcessSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.grace_period_ms == 0 {
            return Err(anyhow::anyhow!("grace_period_ms must be greater than zero"));
        }

        if self.grace_period_ms > 60_000 {
            return Err(anyhow::anyhow!(
                "grace_period_ms should not exceed 60 seconds"
            ));
        }

        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Everything needed to launch a plugin process
#[derive(Default, Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct ChannelConfig {
    /// Path of the executable
    pub command: String,
    #[builder(default)]
    #[builder(setter(custom))]
    pub args: Vec<String>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    #[builder(default)]
    pub working_directory: Option<PathBuf>,
    #[builder(default)]
    pub shutdown: ShutdownPolicy,
}

impl ChannelConfig {
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(command: impl Into<String>, args: I) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::default()
    }
}

impl ChannelConfigBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());

        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

fn default_grace_period_ms() -> u64 {
    1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ShutdownPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.grace_period(), Duration::from_secs(1));
        assert_eq!(policy.signal, ProcessSignal::Interrupt);
    }

    #[test]
    fn test_invalid_policy() {
        let policy = ShutdownPolicy::new().with_grace_period(Duration::ZERO);
        assert!(policy.validate().is_err());

        let policy = ShutdownPolicy {
            grace_period_ms: 120_000,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_huge_grace_period_saturates() {
        let policy = ShutdownPolicy::new().with_grace_period(Duration::MAX);
        assert_eq!(policy.grace_period_ms, u64::MAX);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_policy_deserialize_defaults() {
        let policy: ShutdownPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, ShutdownPolicy::default());

        let policy: ShutdownPolicy =
            serde_json::from_str(r#"{"gracePeriodMs": 250, "signal": "terminate"}"#).unwrap();
        assert_eq!(policy.grace_period(), Duration::from_millis(250));
        assert_eq!(policy.signal, ProcessSignal::Terminate);
    }

    #[test]
    fn test_builder() {
        let config = ChannelConfig::builder()
            .command("plugin")
            .args(["--verbose", "serve"])
            .env("RUST_LOG", "debug")
            .working_directory("/tmp")
            .build()
            .unwrap();

        assert_eq!(config.command, "plugin");
        assert_eq!(config.args, vec!["--verbose", "serve"]);
        assert_eq!(config.env.get("RUST_LOG").map(String::as_str), Some("debug"));
        assert_eq!(config.working_directory, Some(PathBuf::from("/tmp")));
        assert_eq!(config.shutdown, ShutdownPolicy::default());
    }

    #[test]
    fn test_builder_env_multi() {
        let config = ChannelConfig::builder()
            .command("plugin")
            .env("A", "1")
            .env_multi([("B", "2"), ("A", "3")])
            .build()
            .unwrap();

        assert_eq!(config.env.len(), 2);
        assert_eq!(config.env.get("A").map(String::as_str), Some("3"));
        assert_eq!(config.env.get("B").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_builder_requires_command() {
        assert!(ChannelConfig::builder().args(["x"]).build().is_err());
    }

    #[test]
    fn test_new() {
        let config = ChannelConfig::new("foo", ["bar", "baz"]);
        assert_eq!(config.command, "foo");
        assert_eq!(config.args, vec!["bar", "baz"]);
        assert!(config.env.is_empty());
    }
}
