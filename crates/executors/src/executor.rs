// Executor contract and shared helpers
//
// Every executor implements `Executor::execute(step, input, context)` and
// always returns an ActionExecutionResult. Internally executors are written
// as `Result<ActionExecutionResult, ActionExecutionResult>` (StepOutcome) so
// `?` can short-circuit with a failure result; `settle` collapses both arms.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};

use stepwise_core::conditions::{lookup_field, stringify};
use stepwise_core::{
    ActionExecutionResult, ConfigError, ErrorCode, ExecutionContext, ExecutorId, InputData,
    Logger, RuntimeError, Step,
};

/// A stateless handler for one step kind
#[async_trait]
pub trait Executor: Send + Sync {
    /// Identity this executor is registered under
    fn id(&self) -> ExecutorId;

    /// Run one step. Never panics and never fails across this boundary.
    async fn execute(
        &self,
        step: &Step,
        input: &InputData,
        context: &ExecutionContext,
    ) -> ActionExecutionResult;
}

/// Early-return friendly executor outcome; the Err arm is a failure result
pub type StepOutcome<T = ActionExecutionResult> = Result<T, ActionExecutionResult>;

/// Collapse a StepOutcome into the result returned across the contract
pub fn settle(outcome: StepOutcome) -> ActionExecutionResult {
    outcome.unwrap_or_else(|failure| failure)
}

// ============================================================================
// Typed configuration
// ============================================================================

/// Typed configuration of one executor, parsed from `Step.config`
pub trait StepConfig: DeserializeOwned {
    /// Constraint checks beyond what deserialization enforces
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Deserialize and validate a step's typed config
pub fn parse_config<C: StepConfig>(step: &Step) -> Result<C, ConfigError> {
    let config: C = step.typed_config()?;
    config
        .validate()
        .map_err(|reason| ConfigError::invalid(&step.id, reason))?;
    Ok(config)
}

// ============================================================================
// Upstream failures
// ============================================================================

/// Turn a capability error into a failure result. The raw error is logged;
/// only `message` is surfaced.
pub fn upstream_failure(
    logger: &dyn Logger,
    code: ErrorCode,
    message: &str,
    error: &RuntimeError,
) -> ActionExecutionResult {
    logger.error(
        message,
        Some(&json!({ "code": code.as_str(), "error": error.to_string() })),
    );
    ActionExecutionResult::failure(message).with_error(code)
}

/// `?`-friendly mapping of capability results into StepOutcome
pub trait UpstreamExt<T> {
    fn or_fail(self, logger: &dyn Logger, code: ErrorCode, message: &str) -> StepOutcome<T>;
}

impl<T> UpstreamExt<T> for stepwise_core::Result<T> {
    fn or_fail(self, logger: &dyn Logger, code: ErrorCode, message: &str) -> StepOutcome<T> {
        self.map_err(|e| upstream_failure(logger, code, message, &e))
    }
}

/// Failure for a referenced record that does not exist
pub fn not_found(kind: &str, id: &str) -> ActionExecutionResult {
    ActionExecutionResult::failure(format!("{} {} not found", kind, id)).with_error(ErrorCode::NotFound)
}

// ============================================================================
// Values and templates
// ============================================================================

/// Resolve a named value: step input first (dotted paths allowed), then the context
pub fn resolve_value(key: &str, input: &InputData, context: &ExecutionContext) -> Option<Value> {
    let input_value = Value::Object(input.clone());
    lookup_field(&input_value, key)
        .filter(|v| !v.is_null())
        .cloned()
        .or_else(|| context.lookup(key))
}

/// Non-empty string input field
pub fn input_str<'a>(input: &'a InputData, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// The object under `key`, or the whole input when `key` is absent
pub fn entity_snapshot(input: &InputData, key: &str) -> Value {
    match input.get(key) {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => Value::Object(input.clone()),
    }
}

static TEMPLATE_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("template pattern is valid")
});

/// Replace `{{name}}` placeholders from input/context. Unknown names render empty.
pub fn render_template(template: &str, input: &InputData, context: &ExecutionContext) -> String {
    TEMPLATE_VAR
        .replace_all(template, |caps: &regex::Captures<'_>| {
            resolve_value(&caps[1], input, context)
                .map(|v| stringify(&v))
                .unwrap_or_default()
        })
        .into_owned()
}

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for executors with time-dependent rules
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Clock pinned to a fixed instant (tests, replays)
pub fn fixed_clock(at: DateTime<Utc>) -> Clock {
    Arc::new(move || at)
}
