// Control-flow executors: switch_case, while_loop, parallel_fork, join_sync
//
// None of these keep state. Loop counters and branch completions live in
// `ExecutionContext.ledger`, which only the outer scheduler advances; these
// executors read it and report what the scheduler should do next.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;

use stepwise_core::conditions::{compare, stringify};
use stepwise_core::{ActionExecutionResult, ExecutionContext, ExecutorId, InputData, Operator, Step};

use crate::executor::{parse_config, resolve_value, settle, Executor, StepConfig, StepOutcome};

// ============================================================================
// switch_case
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchCase {
    pub value: Value,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchCaseConfig {
    /// Looked up in input, then context fields and metadata
    pub variable: String,
    pub cases: Vec<SwitchCase>,
    #[serde(default)]
    pub default_path: Option<String>,
}

impl StepConfig for SwitchCaseConfig {
    fn validate(&self) -> Result<(), String> {
        if self.variable.trim().is_empty() {
            return Err("variable must not be empty".into());
        }
        if self.cases.is_empty() {
            return Err("at least one case is required".into());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SwitchCaseExecutor;

impl SwitchCaseExecutor {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: SwitchCaseConfig = parse_config(step)?;
        let value = resolve_value(&config.variable, input, context).unwrap_or(Value::Null);

        if let Some(case) = config.cases.iter().find(|c| c.value == value) {
            return Ok(ActionExecutionResult::success(format!(
                "{} matched case {}",
                config.variable,
                stringify(&case.value)
            ))
            .with_decision(stringify(&case.value))
            .with_next_action(case.path.clone())
            .with_field("variable", config.variable.clone())
            .with_field("value", value)
            .with_field("matched", true));
        }

        match config.default_path {
            Some(path) => Ok(ActionExecutionResult::success(format!(
                "{} matched no case, taking default path",
                config.variable
            ))
            .with_decision("default")
            .with_next_action(path)
            .with_field("variable", config.variable)
            .with_field("value", value)
            .with_field("matched", false)),
            None => Err(ActionExecutionResult::validation_error(format!(
                "No case matches {} = {} and no defaultPath is configured",
                config.variable,
                stringify(&value)
            ))),
        }
    }
}

#[async_trait]
impl Executor for SwitchCaseExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::SwitchCase
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
// while_loop
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopCondition {
    #[serde(alias = "field")]
    pub variable: String,
    pub operator: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhileLoopConfig {
    pub condition: LoopCondition,
    pub max_iterations: u32,
    pub loop_body: String,
    #[serde(default)]
    pub exit_path: Option<String>,
}

impl StepConfig for WhileLoopConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("maxIterations must be greater than zero".into());
        }
        if !matches!(
            self.condition.operator,
            Operator::LessThan | Operator::GreaterThan | Operator::Equals
        ) {
            return Err("loop condition operator must be less_than, greater_than or equals".into());
        }
        if self.loop_body.trim().is_empty() {
            return Err("loopBody must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct WhileLoopExecutor;

impl WhileLoopExecutor {
    pub fn new() -> Self {
        Self
    }

    fn exit(config: WhileLoopConfig, iteration: u32, reason: &str) -> ActionExecutionResult {
        ActionExecutionResult::success(format!("Loop exited after {} iterations ({})", iteration, reason))
            .with_decision("exit")
            .with_optional_next_action(config.exit_path)
            .with_field("iteration", iteration)
            .with_field("exitReason", reason)
    }

    fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: WhileLoopConfig = parse_config(step)?;
        let iteration = context.ledger.iteration(&step.id);

        if iteration >= config.max_iterations {
            return Ok(Self::exit(config, iteration, "max_iterations"));
        }

        let holds = resolve_value(&config.condition.variable, input, context)
            .map(|actual| compare(&actual, config.condition.operator, &config.condition.value))
            .unwrap_or(false);

        if holds {
            Ok(ActionExecutionResult::success(format!(
                "Loop continues (iteration {})",
                iteration + 1
            ))
            .with_decision("continue")
            .with_next_action(config.loop_body)
            .with_field("iteration", iteration + 1))
        } else {
            Ok(Self::exit(config, iteration, "condition_false"))
        }
    }
}

#[async_trait]
impl Executor for WhileLoopExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::WhileLoop
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
// parallel_fork
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkBranch {
    pub name: String,
    pub start_node: String,
}

fn default_wait_for() -> String {
    "all".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelForkConfig {
    pub branches: Vec<ForkBranch>,
    /// Advisory for the scheduler: "all" or "any"
    #[serde(default = "default_wait_for")]
    pub wait_for: String,
    /// Advisory for the scheduler; not enforced here
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,
}

impl StepConfig for ParallelForkConfig {
    fn validate(&self) -> Result<(), String> {
        if self.branches.is_empty() {
            return Err("at least one branch is required".into());
        }
        let mut names = HashSet::new();
        for branch in &self.branches {
            if branch.start_node.trim().is_empty() {
                return Err(format!("branch '{}' has no startNode", branch.name));
            }
            if branch.start_node.contains(',') {
                return Err(format!("startNode of branch '{}' must not contain ','", branch.name));
            }
            if !names.insert(branch.name.as_str()) {
                return Err(format!("duplicate branch name '{}'", branch.name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ParallelForkExecutor;

impl ParallelForkExecutor {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, step: &Step) -> StepOutcome {
        let config: ParallelForkConfig = parse_config(step)?;
        let starts: Vec<&str> = config.branches.iter().map(|b| b.start_node.as_str()).collect();
        let names: Vec<&str> = config.branches.iter().map(|b| b.name.as_str()).collect();

        Ok(ActionExecutionResult::success(format!(
            "Forking into {} branches",
            config.branches.len()
        ))
        .with_next_action(starts.join(","))
        .with_field("branches", json!(names))
        .with_field("totalBranches", config.branches.len())
        .with_field("waitFor", config.wait_for.clone())
        .with_field("timeoutMs", json!(config.timeout_ms))
        .with_field("advisory", true))
    }
}

#[async_trait]
impl Executor for ParallelForkExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::ParallelFork
    }

    async fn execute(
        &self,
        step: &Step,
        _input: &InputData,
        _context: &ExecutionContext,
    ) -> ActionExecutionResult {
        settle(self.run(step))
    }
}

// ============================================================================
// join_sync
// ============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSyncConfig {
    #[serde(default = "default_true")]
    pub wait_for_all: bool,
    /// Expected branch names; used when the ledger carries no total
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub continue_path: Option<String>,
}

impl StepConfig for JoinSyncConfig {}

#[derive(Debug, Default)]
pub struct JoinSyncExecutor;

impl JoinSyncExecutor {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, step: &Step, context: &ExecutionContext) -> StepOutcome {
        let config: JoinSyncConfig = parse_config(step)?;
        let ledger = &context.ledger;

        // An expected list joins on exactly those branches; otherwise the ledger
        // supplies both counts. Never mix the two sources.
        let (completed, total) = if config.branches.is_empty() {
            (ledger.completed_branches.len(), ledger.total_branches)
        } else {
            let completed = config
                .branches
                .iter()
                .filter(|b| ledger.is_completed(b))
                .count();
            (completed, Some(config.branches.len()))
        };

        let complete = if config.wait_for_all {
            matches!(total, Some(total) if completed >= total)
        } else {
            completed >= 1
        };

        let result = if complete {
            ActionExecutionResult::success(format!("Join complete ({} branches)", completed))
                .with_decision("complete")
                .with_optional_next_action(config.continue_path)
                .with_field("waiting", false)
        } else {
            ActionExecutionResult::success(format!(
                "Waiting for branches ({} of {} complete)",
                completed,
                total.map(|t| t.to_string()).unwrap_or_else(|| "?".into())
            ))
            .with_decision("waiting")
            .with_field("waiting", true)
        };

        Ok(result
            .with_field("completedBranches", completed)
            .with_field("totalBranches", json!(total))
            .with_field("ledgerVersion", ledger.version))
    }
}

#[async_trait]
impl Executor for JoinSyncExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::JoinSync
    }

    async fn execute(
        &self,
        step: &Step,
        _input: &InputData,
        context: &ExecutionContext,
    ) -> ActionExecutionResult {
        settle(self.run(step, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::{BranchLedger, ErrorCode};

    fn context() -> ExecutionContext {
        ExecutionContext::new("t1", "u1", "inst-1", "tpl-1")
    }

    fn input(value: Value) -> InputData {
        value.as_object().cloned().unwrap_or_default()
    }

    fn switch_step(default_path: Option<&str>) -> Step {
        let mut config = json!({
            "variable": "priority",
            "cases": [
                {"value": "high", "path": "escalate"},
                {"value": 3, "path": "queue-3"}
            ]
        });
        if let Some(path) = default_path {
            config["defaultPath"] = json!(path);
        }
        Step::new("switch", ExecutorId::SwitchCase).with_config(config)
    }

    #[tokio::test]
    async fn test_switch_exact_match() {
        let executor = SwitchCaseExecutor::new();
        let result = executor
            .execute(&switch_step(None), &input(json!({"priority": "high"})), &context())
            .await;
        assert_eq!(result.decision.as_deref(), Some("high"));
        assert_eq!(result.next_action.as_deref(), Some("escalate"));

        // "3" is not 3: matching is exact
        let result = executor
            .execute(&switch_step(Some("triage")), &input(json!({"priority": "3"})), &context())
            .await;
        assert_eq!(result.decision.as_deref(), Some("default"));
        assert_eq!(result.next_action.as_deref(), Some("triage"));
    }

    #[tokio::test]
    async fn test_switch_falls_back_to_context_metadata() {
        let ctx = context().with_metadata("priority", json!(3));
        let result = SwitchCaseExecutor::new()
            .execute(&switch_step(None), &InputData::new(), &ctx)
            .await;
        assert_eq!(result.decision.as_deref(), Some("3"));
        assert_eq!(result.next_action.as_deref(), Some("queue-3"));
    }

    #[tokio::test]
    async fn test_switch_without_default_fails() {
        let result = SwitchCaseExecutor::new()
            .execute(&switch_step(None), &input(json!({"priority": "low"})), &context())
            .await;
        assert!(!result.success);
        assert_eq!(result.error_code(), Some(ErrorCode::ValidationError));
    }

    fn loop_step() -> Step {
        Step::new("retry-loop", ExecutorId::WhileLoop).with_config(json!({
            "condition": {"variable": "remaining", "operator": "greater_than", "value": 0},
            "maxIterations": 3,
            "loopBody": "process-item",
            "exitPath": "done"
        }))
    }

    #[tokio::test]
    async fn test_while_continues_while_condition_holds() {
        let ledger = BranchLedger::new().record_iteration("retry-loop");
        let result = WhileLoopExecutor::new()
            .execute(&loop_step(), &input(json!({"remaining": 5})), &context().with_ledger(ledger))
            .await;
        assert_eq!(result.decision.as_deref(), Some("continue"));
        assert_eq!(result.next_action.as_deref(), Some("process-item"));
        assert_eq!(result.data_value("iteration"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_while_exits_on_false_condition() {
        let result = WhileLoopExecutor::new()
            .execute(&loop_step(), &input(json!({"remaining": 0})), &context())
            .await;
        assert_eq!(result.next_action.as_deref(), Some("done"));
        assert_eq!(result.data_value("exitReason"), Some(&json!("condition_false")));
    }

    #[tokio::test]
    async fn test_while_exits_at_max_iterations() {
        let ledger = (0..3).fold(BranchLedger::new(), |l, _| l.record_iteration("retry-loop"));
        let result = WhileLoopExecutor::new()
            .execute(&loop_step(), &input(json!({"remaining": 5})), &context().with_ledger(ledger))
            .await;
        assert_eq!(result.data_value("exitReason"), Some(&json!("max_iterations")));
        assert_eq!(result.next_action.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_while_rejects_zero_max_iterations() {
        let step = Step::new("loop", ExecutorId::WhileLoop).with_config(json!({
            "condition": {"field": "x", "operator": "equals", "value": 1},
            "maxIterations": 0,
            "loopBody": "body"
        }));
        let result = WhileLoopExecutor::new()
            .execute(&step, &InputData::new(), &context())
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::ValidationError));
    }

    #[tokio::test]
    async fn test_fork_joins_start_nodes() {
        let step = Step::new("fork", ExecutorId::ParallelFork).with_config(json!({
            "branches": [
                {"name": "credit", "startNode": "credit-check"},
                {"name": "kyc", "startNode": "kyc-check"}
            ],
            "timeout": 30000
        }));
        let result = ParallelForkExecutor::new()
            .execute(&step, &InputData::new(), &context())
            .await;
        assert_eq!(result.next_action.as_deref(), Some("credit-check,kyc-check"));
        assert_eq!(result.next_actions(), vec!["credit-check", "kyc-check"]);
        assert_eq!(result.data_value("totalBranches"), Some(&json!(2)));
        assert_eq!(result.data_value("waitFor"), Some(&json!("all")));
        assert_eq!(result.data_value("timeoutMs"), Some(&json!(30000)));
    }

    #[tokio::test]
    async fn test_fork_rejects_duplicate_names() {
        let step = Step::new("fork", ExecutorId::ParallelFork).with_config(json!({
            "branches": [
                {"name": "a", "startNode": "x"},
                {"name": "a", "startNode": "y"}
            ]
        }));
        let result = ParallelForkExecutor::new()
            .execute(&step, &InputData::new(), &context())
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_join_waits_for_all_branches() {
        let step = Step::new("join", ExecutorId::JoinSync)
            .with_config(json!({"continuePath": "merge"}));
        let ledger = BranchLedger::new()
            .with_total_branches(2)
            .record_branch_completion("credit");

        let result = JoinSyncExecutor::new()
            .execute(&step, &InputData::new(), &context().with_ledger(ledger.clone()))
            .await;
        assert!(result.success);
        assert_eq!(result.data_value("waiting"), Some(&json!(true)));
        assert_eq!(result.next_action, None);

        let ledger = ledger.record_branch_completion("kyc");
        let result = JoinSyncExecutor::new()
            .execute(&step, &InputData::new(), &context().with_ledger(ledger))
            .await;
        assert_eq!(result.data_value("waiting"), Some(&json!(false)));
        assert_eq!(result.next_action.as_deref(), Some("merge"));
        assert_eq!(result.data_value("ledgerVersion"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_join_expected_list_ignores_extra_ledger_branches() {
        let step = Step::new("join", ExecutorId::JoinSync)
            .with_config(json!({"branches": ["a", "b"], "continuePath": "merge"}));
        let ledger = BranchLedger::new()
            .with_total_branches(3)
            .record_branch_completion("a")
            .record_branch_completion("b")
            .record_branch_completion("c");

        let result = JoinSyncExecutor::new()
            .execute(&step, &InputData::new(), &context().with_ledger(ledger))
            .await;
        assert_eq!(result.data_value("waiting"), Some(&json!(false)));
        assert_eq!(result.data_value("completedBranches"), Some(&json!(2)));
        assert_eq!(result.data_value("totalBranches"), Some(&json!(2)));
        assert_eq!(result.next_action.as_deref(), Some("merge"));
    }

    #[tokio::test]
    async fn test_join_expected_list_waits_for_listed_branch() {
        let step = Step::new("join", ExecutorId::JoinSync)
            .with_config(json!({"branches": ["a", "b"]}));
        let ledger = BranchLedger::new()
            .with_total_branches(3)
            .record_branch_completion("a")
            .record_branch_completion("c");

        let result = JoinSyncExecutor::new()
            .execute(&step, &InputData::new(), &context().with_ledger(ledger))
            .await;
        assert_eq!(result.data_value("waiting"), Some(&json!(true)));
        assert_eq!(result.data_value("completedBranches"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_join_unknown_total_keeps_waiting() {
        let step = Step::new("join", ExecutorId::JoinSync);
        let ledger = BranchLedger::new().record_branch_completion("a");
        let result = JoinSyncExecutor::new()
            .execute(&step, &InputData::new(), &context().with_ledger(ledger))
            .await;
        assert_eq!(result.data_value("waiting"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_join_any_completes_on_first_branch() {
        let step = Step::new("join", ExecutorId::JoinSync)
            .with_config(json!({"waitForAll": false, "branches": ["a", "b"], "continuePath": "next"}));
        let ledger = BranchLedger::new().record_branch_completion("b");
        let result = JoinSyncExecutor::new()
            .execute(&step, &InputData::new(), &context().with_ledger(ledger))
            .await;
        assert_eq!(result.next_action.as_deref(), Some("next"));
    }
}
