// Executor results and error codes
//
// ActionExecutionResult is the only thing that crosses the executor
// boundary. `success = false` means the outer scheduler treats the step as
// failed; the error code tells it whether the failure is worth retrying.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Closed set of error codes carried in `ActionExecutionResult::error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ValidationError,
    ScopeDenied,
    ScopeAccessDenied,
    NoPipelineConfigured,
    NoManualPipeline,
    NoFallbackPipeline,
    NotFound,
    PipelineFunnelMismatch,
    StageGateFailed,
    WebhookDeliveryFailed,
    DeliveryFailed,
    ConnectorError,
    DatabaseError,
    TriggerRejected,
}

impl ErrorCode {
    const ALL: [ErrorCode; 14] = [
        ErrorCode::ValidationError,
        ErrorCode::ScopeDenied,
        ErrorCode::ScopeAccessDenied,
        ErrorCode::NoPipelineConfigured,
        ErrorCode::NoManualPipeline,
        ErrorCode::NoFallbackPipeline,
        ErrorCode::NotFound,
        ErrorCode::PipelineFunnelMismatch,
        ErrorCode::StageGateFailed,
        ErrorCode::WebhookDeliveryFailed,
        ErrorCode::DeliveryFailed,
        ErrorCode::ConnectorError,
        ErrorCode::DatabaseError,
        ErrorCode::TriggerRejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ScopeDenied => "SCOPE_DENIED",
            ErrorCode::ScopeAccessDenied => "SCOPE_ACCESS_DENIED",
            ErrorCode::NoPipelineConfigured => "NO_PIPELINE_CONFIGURED",
            ErrorCode::NoManualPipeline => "NO_MANUAL_PIPELINE",
            ErrorCode::NoFallbackPipeline => "NO_FALLBACK_PIPELINE",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::PipelineFunnelMismatch => "PIPELINE_FUNNEL_MISMATCH",
            ErrorCode::StageGateFailed => "STAGE_GATE_FAILED",
            ErrorCode::WebhookDeliveryFailed => "WEBHOOK_DELIVERY_FAILED",
            ErrorCode::DeliveryFailed => "DELIVERY_FAILED",
            ErrorCode::ConnectorError => "CONNECTOR_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::TriggerRejected => "TRIGGER_REJECTED",
        }
    }

    /// Soft failures caused by an upstream capability; re-running the step may succeed.
    ///
    /// Everything else is a configuration, scope or input problem that will fail
    /// the same way until someone changes the definition or the data.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::WebhookDeliveryFailed
                | ErrorCode::DeliveryFailed
                | ErrorCode::ConnectorError
                | ErrorCode::DatabaseError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| format!("unknown error code: {}", s))
    }
}

/// Outcome of one executor call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionExecutionResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    /// Label chosen by branch/condition steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    /// Target step id(s); comma-joined for fan-out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionExecutionResult {
    /// Successful outcome
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            decision: None,
            next_action: None,
            error: None,
        }
    }

    /// Failed outcome
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::success(message)
        }
    }

    /// Failed outcome for missing or malformed config/input
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::failure(message).with_error(ErrorCode::ValidationError)
    }

    pub fn with_error(mut self, code: ErrorCode) -> Self {
        self.error = Some(code.as_str().to_string());
        self
    }

    /// Replace the data map. Non-object values are stored under `value`.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        });
        self
    }

    /// Insert a single data field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_decision(mut self, decision: impl Into<String>) -> Self {
        self.decision = Some(decision.into());
        self
    }

    pub fn with_next_action(mut self, next_action: impl Into<String>) -> Self {
        self.next_action = Some(next_action.into());
        self
    }

    pub fn with_optional_next_action(mut self, next_action: Option<String>) -> Self {
        self.next_action = next_action;
        self
    }

    /// Read a data field
    pub fn data_value(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }

    /// Target step ids, split on commas for fan-out results
    pub fn next_actions(&self) -> Vec<&str> {
        self.next_action
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parsed error code, if the result carries a known one
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_deref().and_then(|e| e.parse().ok())
    }
}

impl From<ConfigError> for ActionExecutionResult {
    fn from(err: ConfigError) -> Self {
        ActionExecutionResult::validation_error(err.to_string())
    }
}
