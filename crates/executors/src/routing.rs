// Entity routers (lead / deal / customer)
//
// One implementation, parameterized by the entity it reads. Branches are
// evaluated in declaration order against the entity snapshot (input[entity]
// when present, the whole input otherwise); the first full match wins. No
// match is not an error: the router takes the default path.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;

use stepwise_core::{
    select_branch, ActionExecutionResult, Branch, ExecutionContext, ExecutorId, InputData, Step,
};

use crate::executor::{entity_snapshot, parse_config, settle, Executor, StepConfig, StepOutcome};

/// Which entity a router evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutedEntity {
    Lead,
    Deal,
    Customer,
}

impl RoutedEntity {
    /// Input key holding the entity snapshot
    pub fn key(&self) -> &'static str {
        match self {
            RoutedEntity::Lead => "lead",
            RoutedEntity::Deal => "deal",
            RoutedEntity::Customer => "customer",
        }
    }

    pub fn executor_id(&self) -> ExecutorId {
        match self {
            RoutedEntity::Lead => ExecutorId::LeadRouter,
            RoutedEntity::Deal => ExecutorId::DealRouter,
            RoutedEntity::Customer => ExecutorId::CustomerRouter,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub default_path: Option<String>,
}

impl StepConfig for RouterConfig {
    fn validate(&self) -> Result<(), String> {
        if self.branches.is_empty() {
            return Err("at least one branch is required".into());
        }
        let mut seen = HashSet::new();
        for branch in &self.branches {
            if branch.name.trim().is_empty() {
                return Err("branch names must not be empty".into());
            }
            if branch.name == "default" {
                return Err("'default' is reserved for the fallback route".into());
            }
            if !seen.insert(branch.name.as_str()) {
                return Err(format!("duplicate branch name '{}'", branch.name));
            }
        }
        Ok(())
    }
}

pub struct EntityRouter {
    entity: RoutedEntity,
}

impl EntityRouter {
    pub fn new(entity: RoutedEntity) -> Self {
        Self { entity }
    }

    pub fn lead() -> Self {
        Self::new(RoutedEntity::Lead)
    }

    pub fn deal() -> Self {
        Self::new(RoutedEntity::Deal)
    }

    pub fn customer() -> Self {
        Self::new(RoutedEntity::Customer)
    }

    fn run(&self, step: &Step, input: &InputData) -> StepOutcome {
        let config: RouterConfig = parse_config(step)?;
        let snapshot = entity_snapshot(input, self.entity.key());

        let result = match select_branch(&config.branches, &snapshot) {
            Some((index, branch)) => ActionExecutionResult::success(format!(
                "{} routed to branch '{}'",
                self.entity.key(),
                branch.name
            ))
            .with_decision(branch.name.clone())
            .with_optional_next_action(branch.target.clone())
            .with_field("branch", branch.name.clone())
            .with_field("branchIndex", index),
            None => ActionExecutionResult::success(format!(
                "No branch matched, {} takes the default route",
                self.entity.key()
            ))
            .with_decision("default")
            .with_optional_next_action(config.default_path)
            .with_field("branch", "default"),
        };
        Ok(result)
    }
}

#[async_trait]
impl Executor for EntityRouter {
    fn id(&self) -> ExecutorId {
        self.entity.executor_id()
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use stepwise_core::ErrorCode;

    fn context() -> ExecutionContext {
        ExecutionContext::new("t1", "u1", "inst-1", "tpl-1")
    }

    fn input(value: Value) -> InputData {
        value.as_object().cloned().unwrap_or_default()
    }

    fn lead_step() -> Step {
        Step::new("route", ExecutorId::LeadRouter).with_config(json!({
            "branches": [
                {
                    "name": "enterprise",
                    "target": "enterprise-team",
                    "conditions": [
                        {"field": "score", "operator": "greater_than", "value": 80},
                        {"field": "companySize", "operator": "in", "value": ["large", "xl"]}
                    ]
                },
                {
                    "name": "hot",
                    "nextStep": "sales-team",
                    "conditions": [{"field": "score", "operator": "between", "value": "50-100"}]
                }
            ],
            "defaultPath": "nurture"
        }))
    }

    #[tokio::test]
    async fn test_first_matching_branch_wins() {
        let result = EntityRouter::lead()
            .execute(
                &lead_step(),
                &input(json!({"lead": {"score": 90, "companySize": "xl"}})),
                &context(),
            )
            .await;
        assert_eq!(result.decision.as_deref(), Some("enterprise"));
        assert_eq!(result.next_action.as_deref(), Some("enterprise-team"));
        assert_eq!(result.data_value("branchIndex"), Some(&json!(0)));

        // Enterprise fails on size, hot still matches
        let result = EntityRouter::lead()
            .execute(&lead_step(), &input(json!({"score": 90, "companySize": "small"})), &context())
            .await;
        assert_eq!(result.decision.as_deref(), Some("hot"));
        assert_eq!(result.next_action.as_deref(), Some("sales-team"));
    }

    #[tokio::test]
    async fn test_no_match_takes_default() {
        let result = EntityRouter::lead()
            .execute(&lead_step(), &input(json!({"lead": {"score": 10}})), &context())
            .await;
        assert!(result.success);
        assert_eq!(result.decision.as_deref(), Some("default"));
        assert_eq!(result.next_action.as_deref(), Some("nurture"));
        assert_eq!(result.data_value("branch"), Some(&json!("default")));
    }

    #[tokio::test]
    async fn test_router_identity_follows_entity() {
        assert_eq!(EntityRouter::deal().id(), ExecutorId::DealRouter);
        assert_eq!(EntityRouter::customer().id(), ExecutorId::CustomerRouter);
    }

    #[tokio::test]
    async fn test_duplicate_branch_names_rejected() {
        let step = Step::new("route", ExecutorId::DealRouter).with_config(json!({
            "branches": [{"name": "a"}, {"name": "a"}]
        }));
        let result = EntityRouter::deal().execute(&step, &InputData::new(), &context()).await;
        assert_eq!(result.error_code(), Some(ErrorCode::ValidationError));
        assert!(result.message.contains("duplicate"));
    }
}
