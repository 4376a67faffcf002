//! Engine configuration

use crate::error::{ConfigError, TesseraResult};
use crate::identity::DEFAULT_PROP_VALUE;
use serde::{Deserialize, Serialize};

/// Engine-wide defaults. Per-entry options override these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Initial window of a stream entry when its options name none.
    pub stream_initial: usize,
    /// Page size of `more` when neither the call nor the options name one.
    pub stream_more: usize,
    /// Field that receives non-object document values.
    pub prop_value: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_initial: 20,
            stream_more: 10,
            prop_value: DEFAULT_PROP_VALUE.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from `TESSERA_*` environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            stream_initial: std::env::var("TESSERA_STREAM_INITIAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stream_initial),
            stream_more: std::env::var("TESSERA_STREAM_MORE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stream_more),
            prop_value: std::env::var("TESSERA_PROP_VALUE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.prop_value),
        }
    }

    pub fn with_stream_initial(mut self, initial: usize) -> Self {
        self.stream_initial = initial;
        self
    }

    pub fn with_stream_more(mut self, more: usize) -> Self {
        self.stream_more = more;
        self
    }

    pub fn with_prop_value(mut self, prop: impl Into<String>) -> Self {
        self.prop_value = prop.into();
        self
    }

    pub fn validate(&self) -> TesseraResult<()> {
        if self.stream_initial == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stream_initial".to_string(),
                value: self.stream_initial.to_string(),
                reason: "stream_initial must be greater than 0".to_string(),
            }
            .into());
        }

        if self.stream_more == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stream_more".to_string(),
                value: self.stream_more.to_string(),
                reason: "stream_more must be greater than 0".to_string(),
            }
            .into());
        }

        if self.prop_value.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "prop_value".to_string(),
                value: String::new(),
                reason: "prop_value must name a field".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TesseraError;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.stream_initial, 20);
        assert_eq!(config.stream_more, 10);
        assert_eq!(config.prop_value, ".value");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = EngineConfig::default().with_stream_initial(0).validate();
        assert!(matches!(
            result,
            Err(TesseraError::Config(ConfigError::InvalidValue { ref field, .. })) if field == "stream_initial"
        ));

        assert!(EngineConfig::default().with_stream_more(0).validate().is_err());
    }

    #[test]
    fn test_empty_prop_value_rejected() {
        assert!(EngineConfig::default().with_prop_value("").validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = EngineConfig::default().with_stream_initial(5);
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
