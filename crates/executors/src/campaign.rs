// Campaign lead intake
//
// Loads the campaign, checks the requester may act on the campaign's store,
// then resolves the pipeline the lead enters:
// - automatic: the campaign's sub-workflow is not run from here; the step
//   always takes fallback pipeline 1, else 2, and flags `subWorkflowDeferred`
// - manual: manual pipeline 1, else 2
// Missing pipelines are hard errors. Notifying `notifyUserIds` is best-effort.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use stepwise_core::{
    validate_user_scope, ActionExecutionResult, Campaign, ErrorCode, ExecutionContext, ExecutorId,
    InputData, Notification, RoutingMode, Runtime, Step,
};

use crate::executor::{
    input_str, not_found, parse_config, settle, Executor, StepConfig, StepOutcome, UpstreamExt,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignLeadIntakeConfig {
    /// Campaign to route through; falls back to input `campaignId`
    #[serde(default)]
    pub campaign_id: Option<String>,
}

impl StepConfig for CampaignLeadIntakeConfig {}

/// Where a lead goes and how that was decided
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineChoice {
    pub pipeline_id: String,
    pub fallback_used: bool,
    pub sub_workflow_deferred: bool,
}

/// Pick the intake pipeline for a campaign according to its routing mode
pub fn choose_pipeline(campaign: &Campaign) -> Result<PipelineChoice, ActionExecutionResult> {
    match campaign.routing_mode {
        RoutingMode::Automatic => campaign
            .fallback_pipeline_id1
            .clone()
            .or_else(|| campaign.fallback_pipeline_id2.clone())
            .map(|pipeline_id| PipelineChoice {
                pipeline_id,
                fallback_used: true,
                sub_workflow_deferred: campaign.workflow_id.is_some(),
            })
            .ok_or_else(|| {
                ActionExecutionResult::failure(
                    "Automatic routing mode requires at least one fallback pipeline configured",
                )
                .with_error(ErrorCode::NoFallbackPipeline)
            }),
        RoutingMode::Manual => campaign
            .manual_pipeline_id1
            .clone()
            .or_else(|| campaign.manual_pipeline_id2.clone())
            .map(|pipeline_id| PipelineChoice {
                pipeline_id,
                fallback_used: false,
                sub_workflow_deferred: false,
            })
            .ok_or_else(|| {
                ActionExecutionResult::failure(
                    "Manual routing mode requires at least one manual pipeline configured",
                )
                .with_error(ErrorCode::NoManualPipeline)
            }),
    }
}

pub struct CampaignLeadIntakeExecutor {
    runtime: Runtime,
}

impl CampaignLeadIntakeExecutor {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    async fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: CampaignLeadIntakeConfig = parse_config(step)?;
        let logger = self.runtime.logger.as_ref();
        let db = self.runtime.database.as_ref();

        let campaign_id = config
            .campaign_id
            .or_else(|| input_str(input, "campaignId").map(String::from))
            .ok_or_else(|| ActionExecutionResult::validation_error("campaignId is required"))?;

        let campaign = db
            .get_campaign(&context.tenant_id, &campaign_id)
            .await
            .or_fail(logger, ErrorCode::DatabaseError, "Failed to load campaign")?
            .ok_or_else(|| not_found("Campaign", &campaign_id))?;

        if let Some(store_id) = campaign.store_id.as_deref() {
            let scope = validate_user_scope(
                db,
                &context.requester_id,
                &context.tenant_id,
                Some(store_id),
                None,
            )
            .await
            .or_fail(logger, ErrorCode::DatabaseError, "Failed to verify campaign scope")?;

            if !scope.has_access {
                return Err(ActionExecutionResult::failure(format!(
                    "Access to campaign {} denied: {}",
                    campaign.id,
                    scope.reason_or_default()
                ))
                .with_error(ErrorCode::ScopeDenied));
            }
        }

        let choice = choose_pipeline(&campaign)?;
        if choice.sub_workflow_deferred {
            logger.info(
                "Campaign sub-workflow execution deferred, routing to fallback pipeline",
                Some(&json!({
                    "campaignId": campaign.id,
                    "workflowId": campaign.workflow_id,
                    "pipelineId": choice.pipeline_id,
                })),
            );
        }

        let lead_label = input_str(input, "leadName")
            .or_else(|| input_str(input, "leadId"))
            .unwrap_or("A new lead");
        let notified = self.runtime.dispatcher.dispatch_all(
            campaign.notify_user_ids.iter().map(|user_id| {
                Notification::in_app(
                    &context.tenant_id,
                    user_id,
                    format!("New lead for {}", campaign.name),
                    format!(
                        "{} entered campaign {} ({} routing)",
                        lead_label,
                        campaign.name,
                        campaign.routing_mode.as_str()
                    ),
                )
                .with_type("campaign_lead")
                .with_metadata(json!({
                    "campaignId": campaign.id,
                    "pipelineId": choice.pipeline_id,
                }))
            }),
        );

        Ok(ActionExecutionResult::success(format!(
            "Lead routed to pipeline {} via campaign {}",
            choice.pipeline_id, campaign.name
        ))
        .with_next_action(choice.pipeline_id.clone())
        .with_field("campaignId", campaign.id.clone())
        .with_field("routingMode", campaign.routing_mode.as_str())
        .with_field("pipelineId", choice.pipeline_id)
        .with_field("fallbackUsed", choice.fallback_used)
        .with_field("subWorkflowDeferred", choice.sub_workflow_deferred)
        .with_field("notified", notified))
    }
}

#[async_trait]
impl Executor for CampaignLeadIntakeExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::CampaignLeadIntake
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
    use serde_json::Value;
    use stepwise_core::memory::InMemoryRuntime;
    use stepwise_core::UserAssignment;

    fn campaign(mode: RoutingMode) -> Campaign {
        Campaign {
            id: "c1".into(),
            tenant_id: "t1".into(),
            name: "Spring promo".into(),
            store_id: None,
            routing_mode: mode,
            workflow_id: None,
            fallback_pipeline_id1: None,
            fallback_pipeline_id2: None,
            manual_pipeline_id1: None,
            manual_pipeline_id2: None,
            default_pipeline_id: None,
            notify_user_ids: Vec::new(),
        }
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new("t1", "rep", "inst-1", "tpl-1")
    }

    fn step() -> Step {
        Step::new("intake", ExecutorId::CampaignLeadIntake)
            .with_config(serde_json::json!({"campaignId": "c1"}))
    }

    #[test]
    fn test_choose_pipeline_prefers_first_slot() {
        let mut c = campaign(RoutingMode::Manual);
        c.manual_pipeline_id2 = Some("m2".into());
        assert_eq!(choose_pipeline(&c).unwrap().pipeline_id, "m2");
        c.manual_pipeline_id1 = Some("m1".into());
        assert_eq!(choose_pipeline(&c).unwrap().pipeline_id, "m1");
    }

    #[tokio::test]
    async fn test_manual_mode_without_pipelines_fails() {
        let mem = InMemoryRuntime::new();
        mem.database.insert_campaign(campaign(RoutingMode::Manual)).await;

        let result = CampaignLeadIntakeExecutor::new(mem.runtime.clone())
            .execute(&step(), &InputData::new(), &context())
            .await;

        assert!(!result.success);
        assert_eq!(result.error_code(), Some(ErrorCode::NoManualPipeline));
        assert_eq!(
            result.message,
            "Manual routing mode requires at least one manual pipeline configured"
        );
    }

    #[tokio::test]
    async fn test_automatic_mode_defers_workflow_and_notifies() {
        let mem = InMemoryRuntime::new();
        let mut c = campaign(RoutingMode::Automatic);
        c.workflow_id = Some("wf-qualify".into());
        c.fallback_pipeline_id2 = Some("p-fallback".into());
        c.notify_user_ids = vec!["u1".into(), "u2".into()];
        mem.database.insert_campaign(c).await;

        let mut input = InputData::new();
        input.insert("leadName".into(), Value::from("Ada"));
        let result = CampaignLeadIntakeExecutor::new(mem.runtime.clone())
            .execute(&step(), &input, &context())
            .await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.next_action.as_deref(), Some("p-fallback"));
        assert_eq!(result.data_value("subWorkflowDeferred"), Some(&Value::Bool(true)));
        assert_eq!(result.data_value("notified"), Some(&Value::from(2)));
        let delivered = mem.delivered_notifications().await;
        assert_eq!(delivered.len(), 2);
        assert!(delivered[0].message.starts_with("Ada entered"));
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_step() {
        let mem = InMemoryRuntime::new();
        mem.notifier.set_failing(true).await;
        let mut c = campaign(RoutingMode::Manual);
        c.manual_pipeline_id1 = Some("m1".into());
        c.notify_user_ids = vec!["u1".into()];
        mem.database.insert_campaign(c).await;

        let result = CampaignLeadIntakeExecutor::new(mem.runtime.clone())
            .execute(&step(), &InputData::new(), &context())
            .await;

        assert!(result.success);
        mem.runtime.dispatcher.flush().await;
        assert_eq!(mem.notifier.failures().await, 1);
    }

    #[tokio::test]
    async fn test_store_scope_denied() {
        let mem = InMemoryRuntime::new();
        let mut c = campaign(RoutingMode::Manual);
        c.store_id = Some("store-a".into());
        c.manual_pipeline_id1 = Some("m1".into());
        mem.database.insert_campaign(c).await;
        mem.database
            .insert_assignment("t1", UserAssignment::store("rep", "store-b"))
            .await;

        let result = CampaignLeadIntakeExecutor::new(mem.runtime.clone())
            .execute(&step(), &InputData::new(), &context())
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::ScopeDenied));
    }

    #[tokio::test]
    async fn test_missing_campaign_and_database_error() {
        let mem = InMemoryRuntime::new();
        let executor = CampaignLeadIntakeExecutor::new(mem.runtime.clone());

        let missing = executor.execute(&step(), &InputData::new(), &context()).await;
        assert_eq!(missing.error_code(), Some(ErrorCode::NotFound));

        mem.database.fail_next("connection reset").await;
        let failed = executor.execute(&step(), &InputData::new(), &context()).await;
        assert_eq!(failed.error_code(), Some(ErrorCode::DatabaseError));
        assert!(!failed.message.contains("connection reset"));
    }
}
