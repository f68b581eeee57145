// Trigger executors
//
// Triggers gate the entry of an instance: they validate the triggering
// payload and either accept it (success) or reject it with TRIGGER_REJECTED
// so the host can drop the event without treating it as an error.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use stepwise_core::conditions::lookup_field;
use stepwise_core::{ActionExecutionResult, ErrorCode, ExecutionContext, ExecutorId, InputData, Step};

use crate::executor::{input_str, parse_config, settle, Executor, StepConfig, StepOutcome};

fn rejected(message: impl Into<String>) -> ActionExecutionResult {
    ActionExecutionResult::failure(message).with_error(ErrorCode::TriggerRejected)
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(_) => false,
    }
}

// ============================================================================
// form_trigger
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormTriggerConfig {
    /// Only submissions of this form start the workflow
    #[serde(default)]
    pub form_id: Option<String>,
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl StepConfig for FormTriggerConfig {}

#[derive(Debug, Default)]
pub struct FormTriggerExecutor;

impl FormTriggerExecutor {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, step: &Step, input: &InputData) -> StepOutcome {
        let config: FormTriggerConfig = parse_config(step)?;
        let submitted_form = input_str(input, "formId");

        if let Some(expected) = config.form_id.as_deref() {
            if submitted_form != Some(expected) {
                return Err(rejected(format!(
                    "Submission for form {} does not match trigger form {}",
                    submitted_form.unwrap_or("<none>"),
                    expected
                )));
            }
        }

        // Field values live under `fields` when the host wraps them
        let fields = match input.get("fields") {
            Some(Value::Object(fields)) => fields.clone(),
            _ => input.clone(),
        };
        let missing: Vec<&str> = config
            .required_fields
            .iter()
            .map(String::as_str)
            .filter(|f| is_blank(fields.get(*f)))
            .collect();
        if !missing.is_empty() {
            return Err(ActionExecutionResult::validation_error(format!(
                "Missing required form fields: {}",
                missing.join(", ")
            )));
        }

        Ok(ActionExecutionResult::success("Form submission accepted")
            .with_field("triggered", true)
            .with_field("formId", submitted_form.map(String::from))
            .with_field("fields", Value::Object(fields)))
    }
}

#[async_trait]
impl Executor for FormTriggerExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::FormTrigger
    }

    async fn execute(
        &self,
        step: &Step,
        input: &InputData,
        _context: &ExecutionContext,
    ) -> ActionExecutionResult {
        settle(self.run(step, input))
    }
}

// ============================================================================
// task_event_trigger
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEventTriggerConfig {
    /// Accepted event types; empty accepts any
    #[serde(default)]
    pub event_types: Vec<String>,
    /// Field -> value equality filters against the event payload
    #[serde(default)]
    pub filters: Map<String, Value>,
}

impl StepConfig for TaskEventTriggerConfig {}

#[derive(Debug, Default)]
pub struct TaskEventTriggerExecutor;

impl TaskEventTriggerExecutor {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, step: &Step, input: &InputData) -> StepOutcome {
        let config: TaskEventTriggerConfig = parse_config(step)?;
        let event_type = input_str(input, "eventType").or_else(|| input_str(input, "event"));

        if !config.event_types.is_empty() {
            match event_type {
                Some(event) if config.event_types.iter().any(|t| t == event) => {}
                other => {
                    return Err(rejected(format!(
                        "Event type {} is not handled by this trigger",
                        other.unwrap_or("<none>")
                    )))
                }
            }
        }

        let payload = Value::Object(input.clone());
        if let Some((field, _)) = config
            .filters
            .iter()
            .find(|(field, expected)| lookup_field(&payload, field) != Some(*expected))
        {
            return Err(rejected(format!("Event does not match filter on '{}'", field)));
        }

        Ok(ActionExecutionResult::success("Task event accepted")
            .with_field("triggered", true)
            .with_field("eventType", event_type.map(String::from))
            .with_field("taskId", input_str(input, "taskId").map(String::from)))
    }
}

#[async_trait]
impl Executor for TaskEventTriggerExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::TaskEventTrigger
    }

    async fn execute(
        &self,
        step: &Step,
        input: &InputData,
        _context: &ExecutionContext,
    ) -> ActionExecutionResult {
        settle(self.run(step, input))
    }
}
