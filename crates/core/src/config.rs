// Engine-wide configuration
//
// Values here are host-level defaults. Per-step configuration always wins;
// e.g. an AI funnel step with its own autoAssignThreshold ignores
// `auto_assign_threshold`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::traits::AiSettings;

/// Defaults shared by all executors of one runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Confidence (0-100) at or above which AI pipeline suggestions auto-assign
    pub auto_assign_threshold: u8,
    /// Bound of the best-effort notification queue
    pub notification_queue_capacity: usize,
    /// Per-attempt timeout for outbound webhooks
    pub webhook_timeout_secs: u64,
    pub default_ai_model: String,
    pub default_ai_max_tokens: u32,
    pub default_ai_temperature: f32,
    /// Decision used when an AI decision step cannot get a usable answer
    pub default_ai_decision: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_assign_threshold: 80,
            notification_queue_capacity: 256,
            webhook_timeout_secs: 10,
            default_ai_model: "gpt-4o-mini".to_string(),
            default_ai_max_tokens: 1000,
            default_ai_temperature: 0.3,
            default_ai_decision: "approve".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `STEPWISE_AUTO_ASSIGN_THRESHOLD` (default: 80, clamped to 100)
    /// - `STEPWISE_NOTIFICATION_QUEUE_CAPACITY` (default: 256)
    /// - `STEPWISE_WEBHOOK_TIMEOUT_SECS` (default: 10)
    /// - `STEPWISE_DEFAULT_AI_MODEL` (default: "gpt-4o-mini")
    /// - `STEPWISE_DEFAULT_AI_MAX_TOKENS` (default: 1000)
    /// - `STEPWISE_DEFAULT_AI_TEMPERATURE` (default: 0.3)
    /// - `STEPWISE_DEFAULT_AI_DECISION` (default: "approve")
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            auto_assign_threshold: parsed::<u8>(&lookup, "STEPWISE_AUTO_ASSIGN_THRESHOLD")
                .map(|v| v.min(100))
                .unwrap_or(defaults.auto_assign_threshold),
            notification_queue_capacity: parsed::<usize>(
                &lookup,
                "STEPWISE_NOTIFICATION_QUEUE_CAPACITY",
            )
            .filter(|v| *v > 0)
            .unwrap_or(defaults.notification_queue_capacity),
            webhook_timeout_secs: parsed(&lookup, "STEPWISE_WEBHOOK_TIMEOUT_SECS")
                .unwrap_or(defaults.webhook_timeout_secs),
            default_ai_model: lookup("STEPWISE_DEFAULT_AI_MODEL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.default_ai_model),
            default_ai_max_tokens: parsed(&lookup, "STEPWISE_DEFAULT_AI_MAX_TOKENS")
                .unwrap_or(defaults.default_ai_max_tokens),
            default_ai_temperature: parsed(&lookup, "STEPWISE_DEFAULT_AI_TEMPERATURE")
                .unwrap_or(defaults.default_ai_temperature),
            default_ai_decision: lookup("STEPWISE_DEFAULT_AI_DECISION")
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.default_ai_decision),
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// Fill unset AI settings from the engine defaults
    pub fn ai_settings(&self, overrides: &AiSettings) -> AiSettings {
        AiSettings {
            model: overrides
                .model
                .clone()
                .or_else(|| Some(self.default_ai_model.clone())),
            max_tokens: overrides.max_tokens.or(Some(self.default_ai_max_tokens)),
            temperature: overrides.temperature.or(Some(self.default_ai_temperature)),
        }
    }
}

/// Parse one variable, treating unset and malformed values alike
fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.auto_assign_threshold, 80);
        assert_eq!(config.webhook_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("STEPWISE_AUTO_ASSIGN_THRESHOLD", "65"),
            ("STEPWISE_NOTIFICATION_QUEUE_CAPACITY", "0"),
            ("STEPWISE_WEBHOOK_TIMEOUT_SECS", "soon"),
            ("STEPWISE_DEFAULT_AI_DECISION", " Escalate "),
        ]));
        assert_eq!(config.auto_assign_threshold, 65);
        assert_eq!(config.notification_queue_capacity, 256);
        assert_eq!(config.webhook_timeout_secs, 10);
        assert_eq!(config.default_ai_decision, "escalate");
    }

    #[test]
    fn test_each_numeric_field_parses_its_own_type() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("STEPWISE_AUTO_ASSIGN_THRESHOLD", "150"),
            ("STEPWISE_NOTIFICATION_QUEUE_CAPACITY", "32"),
            ("STEPWISE_WEBHOOK_TIMEOUT_SECS", " 30 "),
            ("STEPWISE_DEFAULT_AI_MAX_TOKENS", "2048"),
            ("STEPWISE_DEFAULT_AI_TEMPERATURE", "0.7"),
        ]));
        assert_eq!(config.auto_assign_threshold, 100);
        assert_eq!(config.notification_queue_capacity, 32);
        assert_eq!(config.webhook_timeout(), Duration::from_secs(30));
        assert_eq!(config.default_ai_max_tokens, 2048);
        assert_eq!(config.default_ai_temperature, 0.7);
    }

    #[test]
    fn test_ai_settings_prefers_step_values() {
        let config = EngineConfig::default();
        let settings = config.ai_settings(&AiSettings {
            model: Some("gpt-4o".into()),
            max_tokens: None,
            temperature: Some(0.0),
        });
        assert_eq!(settings.model.as_deref(), Some("gpt-4o"));
        assert_eq!(settings.max_tokens, Some(1000));
        assert_eq!(settings.temperature, Some(0.0));
    }
}
