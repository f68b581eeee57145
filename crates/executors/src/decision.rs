// Decision executors
//
// evaluate_condition parses a single `field op literal` expression at
// definition time; ai_decision asks the AI capability to pick one of a
// closed set of options and degrades to a configured default instead of
// failing the instance.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use stepwise_core::conditions::{as_number, stringify};
use stepwise_core::{
    ActionExecutionResult, AiRequestContext, AiSettings, ExecutionContext, ExecutorId, InputData,
    Runtime, Step,
};

use crate::executor::{
    parse_config, render_template, resolve_value, settle, Executor, StepConfig, StepOutcome,
};

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "==" | "=" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            _ => None,
        }
    }
}

/// A parsed `field op literal` expression, e.g. `amount >= 1000` or `status == 'open'`
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub field: String,
    pub op: CompareOp,
    pub literal: Value,
}

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([\w.]+)\s*(==|!=|>=|<=|=|>|<)\s*(.+?)\s*$")
        .expect("expression pattern is valid")
});

impl Expression {
    pub fn parse(source: &str) -> Result<Self, String> {
        let caps = EXPRESSION
            .captures(source)
            .ok_or_else(|| format!("cannot parse condition '{}'", source))?;
        let op = CompareOp::parse(&caps[2])
            .ok_or_else(|| format!("unknown operator '{}'", &caps[2]))?;
        Ok(Self {
            field: caps[1].to_string(),
            op,
            literal: parse_literal(&caps[3]),
        })
    }

    /// Evaluate against a resolved field value. A missing field is false.
    pub fn evaluate(&self, actual: Option<&Value>) -> bool {
        let actual = match actual {
            None | Some(Value::Null) => return false,
            Some(v) => v,
        };

        let numbers = (as_number(actual), as_number(&self.literal));
        match self.op {
            CompareOp::Eq => loosely_equal(actual, &self.literal),
            CompareOp::Ne => !loosely_equal(actual, &self.literal),
            CompareOp::Gt => matches!(numbers, (Some(a), Some(b)) if a > b),
            CompareOp::Ge => matches!(numbers, (Some(a), Some(b)) if a >= b),
            CompareOp::Lt => matches!(numbers, (Some(a), Some(b)) if a < b),
            CompareOp::Le => matches!(numbers, (Some(a), Some(b)) if a <= b),
        }
    }
}

fn parse_literal(raw: &str) -> Value {
    let quoted = |q: char| raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q);
    if quoted('\'') || quoted('"') {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
    }
}

/// Numeric comparison when both sides are numeric, string comparison otherwise
fn loosely_equal(actual: &Value, literal: &Value) -> bool {
    match (as_number(actual), as_number(literal)) {
        (Some(a), Some(b)) => a == b,
        _ => stringify(actual) == stringify(literal),
    }
}

// ============================================================================
// evaluate_condition
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateConditionConfig {
    pub condition: String,
    #[serde(default)]
    pub true_path: Option<String>,
    #[serde(default)]
    pub false_path: Option<String>,
}

impl EvaluateConditionConfig {
    pub fn expression(&self) -> Result<Expression, String> {
        Expression::parse(&self.condition)
    }
}

impl StepConfig for EvaluateConditionConfig {
    fn validate(&self) -> Result<(), String> {
        self.expression().map(|_| ())
    }
}

pub struct EvaluateConditionExecutor;

impl EvaluateConditionExecutor {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: EvaluateConditionConfig = parse_config(step)?;
        let expression = config
            .expression()
            .map_err(ActionExecutionResult::validation_error)?;

        let actual = resolve_value(&expression.field, input, context);
        let outcome = expression.evaluate(actual.as_ref());

        let next = if outcome {
            config.true_path
        } else {
            config.false_path
        };
        Ok(
            ActionExecutionResult::success(format!("Condition '{}' is {}", config.condition, outcome))
                .with_decision(outcome.to_string())
                .with_optional_next_action(next)
                .with_field("result", outcome)
                .with_field("field", expression.field)
                .with_field("actual", actual.unwrap_or(Value::Null)),
        )
    }
}

impl Default for EvaluateConditionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for EvaluateConditionExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::EvaluateCondition
    }

    async fn execute(
        &self,
        step: &Step,
        input: &InputData,
        context: &ExecutionContext,
    ) -> ActionExecutionResult {
        settle(self.run(step, input, context))
    }
}

// ============================================================================
// ai_decision
// ============================================================================

fn default_decision_agent() -> String {
    "workflow-decision".to_string()
}

fn default_decision_options() -> Vec<String> {
    vec!["approve".into(), "reject".into(), "escalate".into()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiDecisionConfig {
    pub prompt: String,
    #[serde(default = "default_decision_agent")]
    pub agent_id: String,
    #[serde(default = "default_decision_options")]
    pub options: Vec<String>,
    #[serde(flatten)]
    pub settings: AiSettings,
    /// Used when the AI call fails or its answer cannot be parsed
    #[serde(default)]
    pub default_decision: Option<String>,
    /// decision -> next step
    #[serde(default)]
    pub paths: BTreeMap<String, String>,
}

impl StepConfig for AiDecisionConfig {
    fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("prompt must not be empty".into());
        }
        if self.options.is_empty() {
            return Err("options must not be empty".into());
        }
        Ok(())
    }
}

/// Parsed AI answer
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDecision {
    pub decision: String,
    pub reasoning: Option<String>,
}

#[derive(Deserialize)]
struct DecisionPayload {
    decision: String,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Extract a decision from model output.
///
/// Prefers an embedded `{"decision": ..., "reasoning": ...}` object; otherwise
/// takes the option mentioned earliest in the text. The result is always one
/// of `options`, spelled as configured.
pub fn parse_decision(text: &str, options: &[String]) -> Option<ParsedDecision> {
    let canonical = |candidate: &str| {
        options
            .iter()
            .find(|o| o.eq_ignore_ascii_case(candidate.trim()))
            .cloned()
    };

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(payload) = serde_json::from_str::<DecisionPayload>(&text[start..=end]) {
                if let Some(decision) = canonical(&payload.decision) {
                    return Some(ParsedDecision {
                        decision,
                        reasoning: payload.reasoning,
                    });
                }
            }
        }
    }

    let lowered = text.to_lowercase();
    options
        .iter()
        .filter_map(|o| lowered.find(&o.to_lowercase()).map(|pos| (pos, o)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, o)| ParsedDecision {
            decision: o.clone(),
            reasoning: Some(text.trim().to_string()),
        })
}

pub struct AiDecisionExecutor {
    runtime: Runtime,
}

impl AiDecisionExecutor {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    async fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: AiDecisionConfig = parse_config(step)?;

        let prompt = format!(
            "{}\n\nRespond with JSON: {{\"decision\": one of [{}], \"reasoning\": \"<short explanation>\"}}",
            render_template(&config.prompt, input, context),
            config.options.join(", ")
        );
        let settings = self.runtime.config.ai_settings(&config.settings);
        let request = AiRequestContext {
            agent_id: config.agent_id.clone(),
            tenant_id: context.tenant_id.clone(),
            user_id: context.requester_id.clone(),
            module_context: "workflow".to_string(),
            business_entity_id: Some(context.instance_id.clone()),
        };

        let (parsed, tokens_used) = match self
            .runtime
            .ai
            .create_unified_response(&prompt, &settings, &request)
            .await
        {
            Ok(response) => (
                response.text().and_then(|t| parse_decision(t, &config.options)),
                response.tokens_used,
            ),
            Err(e) => {
                self.runtime.logger.warn(
                    "AI decision call failed",
                    Some(&json!({ "stepId": step.id, "error": e.to_string() })),
                );
                (None, None)
            }
        };

        let fallback_used = parsed.is_none();
        let ParsedDecision {
            decision,
            reasoning,
        } = parsed.unwrap_or_else(|| ParsedDecision {
            decision: config
                .default_decision
                .clone()
                .unwrap_or_else(|| self.runtime.config.default_ai_decision.clone()),
            reasoning: None,
        });
        if fallback_used {
            self.runtime.logger.warn(
                "AI decision unavailable, using default",
                Some(&json!({ "stepId": step.id, "decision": decision })),
            );
        }

        Ok(ActionExecutionResult::success(format!("AI decided: {}", decision))
            .with_optional_next_action(config.paths.get(&decision).cloned())
            .with_decision(decision.clone())
            .with_field("decision", decision)
            .with_field("reasoning", json!(reasoning))
            .with_field("fallbackUsed", fallback_used)
            .with_field("tokensUsed", json!(tokens_used)))
    }
}

#[async_trait]
impl Executor for AiDecisionExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::AiDecision
    }

    async fn execute(
        &self,
        step: &Step,
        input: &InputData,
        context: &ExecutionContext,
    ) -> ActionExecutionResult {
        settle(self.run(step, input, context).await)
    }
}
