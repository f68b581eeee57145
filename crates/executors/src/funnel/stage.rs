// Deal movement inside a funnel
//
// stage_transition moves a deal to another stage of its pipeline, gated by
// optional minDealValue/maxDaysInStage checks, then notifies the assigned
// team. pipeline_transition moves a deal to another pipeline of the same
// funnel and tenant, optionally resetting it to that pipeline's first stage.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use stepwise_core::{
    ActionExecutionResult, ErrorCode, ExecutionContext, ExecutorId, InputData, Notification,
    Runtime, Step,
};

use super::{load_deal, resolve_deal_id};
use crate::executor::{
    not_found, parse_config, settle, system_clock, Clock, Executor, StepConfig, StepOutcome,
    UpstreamExt,
};

fn gate_failed(message: String) -> ActionExecutionResult {
    ActionExecutionResult::failure(message).with_error(ErrorCode::StageGateFailed)
}

// ============================================================================
// stage_transition
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTransitionConfig {
    pub target_stage_id: String,
    #[serde(default)]
    pub deal_id: Option<String>,
    /// Gate: deal value must be at least this
    #[serde(default)]
    pub min_deal_value: Option<f64>,
    /// Gate: deal must not have sat in its current stage longer than this
    #[serde(default)]
    pub max_days_in_stage: Option<i64>,
    #[serde(default)]
    pub notify_team: bool,
    /// Department whose team is notified; defaults to the context department
    #[serde(default)]
    pub team_department_id: Option<String>,
}

impl StepConfig for StageTransitionConfig {
    fn validate(&self) -> Result<(), String> {
        if self.target_stage_id.trim().is_empty() {
            return Err("targetStageId must not be empty".into());
        }
        if matches!(self.max_days_in_stage, Some(days) if days < 0) {
            return Err("maxDaysInStage must not be negative".into());
        }
        Ok(())
    }
}

pub struct StageTransitionExecutor {
    runtime: Runtime,
    clock: Clock,
}

impl StageTransitionExecutor {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    async fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: StageTransitionConfig = parse_config(step)?;
        let logger = self.runtime.logger.as_ref();
        let db = self.runtime.database.as_ref();

        let deal_id = resolve_deal_id(config.deal_id.as_deref(), input)?;
        let deal = load_deal(&self.runtime, &context.tenant_id, &deal_id).await?;

        let pipeline = db
            .get_pipeline(&context.tenant_id, &deal.pipeline_id)
            .await
            .or_fail(logger, ErrorCode::DatabaseError, "Failed to load pipeline")?
            .ok_or_else(|| not_found("Pipeline", &deal.pipeline_id))?;
        if !pipeline.has_stage(&config.target_stage_id) {
            return Err(ActionExecutionResult::validation_error(format!(
                "Stage {} does not belong to pipeline {}",
                config.target_stage_id, pipeline.id
            )));
        }

        if let Some(min) = config.min_deal_value {
            if deal.value < min {
                return Err(gate_failed(format!(
                    "Deal value {} is below the minimum {} for this transition",
                    deal.value, min
                )));
            }
        }
        if let Some(max_days) = config.max_days_in_stage {
            if let Some(days) = deal.days_in_stage((self.clock)()) {
                if days > max_days {
                    return Err(gate_failed(format!(
                        "Deal has been in its stage for {} days (maximum {})",
                        days, max_days
                    )));
                }
            }
        }

        db.update_deal_stage(&context.tenant_id, &deal.id, &config.target_stage_id)
            .await
            .or_fail(logger, ErrorCode::DatabaseError, "Failed to update deal stage")?;

        let notified = if config.notify_team {
            self.notify_team(&config, context, &deal.title, &config.target_stage_id)
                .await
        } else {
            0
        };

        Ok(ActionExecutionResult::success(format!(
            "Deal {} moved to stage {}",
            deal.id, config.target_stage_id
        ))
        .with_field("dealId", deal.id.clone())
        .with_field("fromStageId", deal.stage_id.clone())
        .with_field("toStageId", config.target_stage_id.clone())
        .with_field("notified", notified))
    }

    /// Best-effort: lookup failures are logged and yield zero notifications
    async fn notify_team(
        &self,
        config: &StageTransitionConfig,
        context: &ExecutionContext,
        deal_title: &str,
        stage_id: &str,
    ) -> usize {
        let Some(department) = config
            .team_department_id
            .as_deref()
            .or(context.department_id.as_deref())
        else {
            return 0;
        };

        match self
            .runtime
            .database
            .find_team_by_department(&context.tenant_id, department)
            .await
        {
            Ok(Some(team)) => self.runtime.dispatcher.dispatch_all(team.member_ids.iter().map(
                |member| {
                    Notification::in_app(
                        &context.tenant_id,
                        member,
                        "Deal stage changed",
                        format!("{} moved to stage {}", deal_title, stage_id),
                    )
                    .with_type("deal_stage_changed")
                },
            )),
            Ok(None) => 0,
            Err(e) => {
                self.runtime.logger.warn(
                    "Team lookup failed, skipping stage notification",
                    Some(&json!({ "departmentId": department, "error": e.to_string() })),
                );
                0
            }
        }
    }
}

#[async_trait]
impl Executor for StageTransitionExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::StageTransition
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

// ============================================================================
// pipeline_transition
// ============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTransitionConfig {
    pub funnel_id: String,
    pub target_pipeline_id: String,
    #[serde(default)]
    pub deal_id: Option<String>,
    #[serde(default = "default_true")]
    pub reset_to_first_stage: bool,
    #[serde(default)]
    pub notify_assignee: bool,
}

impl StepConfig for PipelineTransitionConfig {
    fn validate(&self) -> Result<(), String> {
        if self.funnel_id.trim().is_empty() || self.target_pipeline_id.trim().is_empty() {
            return Err("funnelId and targetPipelineId must not be empty".into());
        }
        Ok(())
    }
}

pub struct PipelineTransitionExecutor {
    runtime: Runtime,
}

impl PipelineTransitionExecutor {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    async fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: PipelineTransitionConfig = parse_config(step)?;
        let logger = self.runtime.logger.as_ref();
        let db = self.runtime.database.as_ref();

        let deal_id = resolve_deal_id(config.deal_id.as_deref(), input)?;
        let deal = load_deal(&self.runtime, &context.tenant_id, &deal_id).await?;

        let target = db
            .get_pipeline(&context.tenant_id, &config.target_pipeline_id)
            .await
            .or_fail(logger, ErrorCode::DatabaseError, "Failed to load target pipeline")?
            .ok_or_else(|| not_found("Pipeline", &config.target_pipeline_id))?;

        // Validate before any mutation
        if target.tenant_id != context.tenant_id
            || target.funnel_id.as_deref() != Some(config.funnel_id.as_str())
        {
            return Err(ActionExecutionResult::failure(format!(
                "Pipeline {} does not belong to funnel {}",
                target.id, config.funnel_id
            ))
            .with_error(ErrorCode::PipelineFunnelMismatch));
        }

        let stage_id = if config.reset_to_first_stage {
            let first = target.first_stage().ok_or_else(|| {
                ActionExecutionResult::validation_error(format!(
                    "Pipeline {} has no stages to reset to",
                    target.id
                ))
            })?;
            Some(first.id.clone())
        } else {
            None
        };

        db.move_deal_to_pipeline(&context.tenant_id, &deal.id, &target.id, stage_id.as_deref())
            .await
            .or_fail(logger, ErrorCode::DatabaseError, "Failed to move deal")?;

        let notified = match deal.assignee_id.as_deref() {
            Some(assignee) if config.notify_assignee => self.runtime.dispatcher.dispatch(
                Notification::in_app(
                    &context.tenant_id,
                    assignee,
                    "Deal moved to a new pipeline",
                    format!("{} moved to pipeline {}", deal.title, target.name),
                )
                .with_type("deal_pipeline_changed"),
            ),
            _ => false,
        };

        Ok(ActionExecutionResult::success(format!(
            "Deal {} moved to pipeline {}",
            deal.id, target.id
        ))
        .with_field("dealId", deal.id.clone())
        .with_field("fromPipelineId", deal.pipeline_id.clone())
        .with_field("toPipelineId", target.id.clone())
        .with_field("stageId", stage_id.unwrap_or_else(|| deal.stage_id.clone()))
        .with_field("notified", notified))
    }
}

#[async_trait]
impl Executor for PipelineTransitionExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::PipelineTransition
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::fixed_clock;
    use crate::funnel::fixtures::{deal, entered, pipeline};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::Value;
    use stepwise_core::memory::InMemoryRuntime;
    use stepwise_core::Team;

    fn context() -> ExecutionContext {
        ExecutionContext::new("t1", "u1", "inst-1", "tpl-1")
    }

    fn input(value: Value) -> InputData {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn seeded() -> InMemoryRuntime {
        let mem = InMemoryRuntime::new();
        mem.database
            .insert_pipeline(pipeline("p-sales", "f1", &["qualify", "propose", "close"]))
            .await;
        mem.database
            .insert_pipeline(pipeline("p-onboard", "f1", &["kickoff", "live"]))
            .await;
        mem.database
            .insert_pipeline(pipeline("p-other", "f2", &["x"]))
            .await;
        mem
    }

    #[tokio::test]
    async fn test_stage_transition_moves_deal_and_notifies_team() {
        let mem = seeded().await;
        mem.database.insert_deal(deal("d1", "p-sales", "qualify")).await;
        mem.database
            .insert_team(
                "t1",
                Team {
                    id: "team-1".into(),
                    name: "Sales".into(),
                    department_id: "dep-sales".into(),
                    member_ids: vec!["a".into(), "b".into()],
                },
            )
            .await;
        let step = Step::new("stage", ExecutorId::StageTransition)
            .with_config(json!({"targetStageId": "propose", "notifyTeam": true}));

        let result = StageTransitionExecutor::new(mem.runtime.clone())
            .execute(
                &step,
                &input(json!({"dealId": "d1"})),
                &context().with_department("dep-sales"),
            )
            .await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.data_value("fromStageId"), Some(&json!("qualify")));
        assert_eq!(result.data_value("notified"), Some(&json!(2)));
        assert_eq!(mem.database.deal("t1", "d1").await.unwrap().stage_id, "propose");
        assert_eq!(mem.delivered_notifications().await.len(), 2);
    }

    #[tokio::test]
    async fn test_stage_transition_rejects_foreign_stage() {
        let mem = seeded().await;
        mem.database.insert_deal(deal("d1", "p-sales", "qualify")).await;
        let step = Step::new("stage", ExecutorId::StageTransition)
            .with_config(json!({"targetStageId": "kickoff"}));

        let result = StageTransitionExecutor::new(mem.runtime.clone())
            .execute(&step, &input(json!({"dealId": "d1"})), &context())
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::ValidationError));
        assert!(mem.database.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_stage_gates() {
        let mem = seeded().await;
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        mem.database
            .insert_deal(entered(deal("d1", "p-sales", "qualify"), now - Duration::days(20)))
            .await;
        let executor =
            StageTransitionExecutor::new(mem.runtime.clone()).with_clock(fixed_clock(now));

        let value_gate = Step::new("stage", ExecutorId::StageTransition)
            .with_config(json!({"targetStageId": "propose", "minDealValue": 50000}));
        let result = executor
            .execute(&value_gate, &input(json!({"dealId": "d1"})), &context())
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::StageGateFailed));

        let age_gate = Step::new("stage", ExecutorId::StageTransition)
            .with_config(json!({"targetStageId": "propose", "maxDaysInStage": 14}));
        let result = executor
            .execute(&age_gate, &input(json!({"dealId": "d1"})), &context())
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::StageGateFailed));
        assert!(result.message.contains("20 days"));

        assert!(mem.database.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_stage_transition_missing_deal() {
        let mem = seeded().await;
        let step = Step::new("stage", ExecutorId::StageTransition)
            .with_config(json!({"targetStageId": "propose", "dealId": "nope"}));
        let result = StageTransitionExecutor::new(mem.runtime.clone())
            .execute(&step, &InputData::new(), &context())
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn test_pipeline_transition_resets_to_first_stage() {
        let mem = seeded().await;
        mem.database.insert_deal(deal("d1", "p-sales", "close")).await;
        let step = Step::new("move", ExecutorId::PipelineTransition).with_config(json!({
            "funnelId": "f1",
            "targetPipelineId": "p-onboard",
            "notifyAssignee": true
        }));

        let result = PipelineTransitionExecutor::new(mem.runtime.clone())
            .execute(&step, &input(json!({"dealId": "d1"})), &context())
            .await;

        assert!(result.success, "{}", result.message);
        assert_eq!(
            mem.database.mutations().await,
            vec!["move_deal_to_pipeline:d1:p-onboard:kickoff".to_string()]
        );
        let delivered = mem.delivered_notifications().await;
        assert_eq!(delivered[0].recipient, "owner");
    }

    #[tokio::test]
    async fn test_pipeline_transition_keeps_stage_when_not_resetting() {
        let mem = seeded().await;
        mem.database.insert_deal(deal("d1", "p-sales", "close")).await;
        let step = Step::new("move", ExecutorId::PipelineTransition).with_config(json!({
            "funnelId": "f1",
            "targetPipelineId": "p-onboard",
            "resetToFirstStage": false
        }));

        let result = PipelineTransitionExecutor::new(mem.runtime.clone())
            .execute(&step, &input(json!({"dealId": "d1"})), &context())
            .await;
        assert_eq!(result.data_value("stageId"), Some(&json!("close")));
        assert_eq!(
            mem.database.mutations().await,
            vec!["move_deal_to_pipeline:d1:p-onboard:-".to_string()]
        );
    }

    #[tokio::test]
    async fn test_pipeline_transition_funnel_mismatch_does_not_mutate() {
        let mem = seeded().await;
        mem.database.insert_deal(deal("d1", "p-sales", "close")).await;
        let step = Step::new("move", ExecutorId::PipelineTransition)
            .with_config(json!({"funnelId": "f1", "targetPipelineId": "p-other"}));

        let result = PipelineTransitionExecutor::new(mem.runtime.clone())
            .execute(&step, &input(json!({"dealId": "d1"})), &context())
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::PipelineFunnelMismatch));
        assert!(mem.database.mutations().await.is_empty());
    }
}
