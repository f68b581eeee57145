// Funnel executors
//
// A funnel is a set of pipelines (macro-stages); a deal moves through the
// stages of one pipeline and may hop between pipelines of the same funnel.
//
// - stage: stage_transition (gated) and pipeline_transition (same funnel)
// - orchestrator: AI-suggested pipeline with confidence gating
// - exit: won/lost closure plus side-channel hooks
// - webhook: transition-gated webhook with retry

mod exit;
mod orchestrator;
mod stage;
mod webhook;

pub use exit::{DealOutcome, FunnelExitConfig, FunnelExitExecutor};
pub use orchestrator::{
    parse_orchestrator_decision, AiFunnelOrchestratorConfig, AiFunnelOrchestratorExecutor,
    OrchestratorDecision,
};
pub use stage::{
    PipelineTransitionConfig, PipelineTransitionExecutor, StageTransitionConfig,
    StageTransitionExecutor,
};
pub use webhook::{select_event, DealEvent, DealWebhookConfig, DealWebhookTriggerExecutor};

use stepwise_core::{ActionExecutionResult, Deal, ErrorCode, InputData, Runtime};

use crate::executor::{input_str, not_found, StepOutcome, UpstreamExt};

/// Deal id from the step config, else from input `dealId`
fn resolve_deal_id(configured: Option<&str>, input: &InputData) -> StepOutcome<String> {
    configured
        .map(str::to_string)
        .or_else(|| input_str(input, "dealId").map(String::from))
        .ok_or_else(|| ActionExecutionResult::validation_error("dealId is required"))
}

async fn load_deal(runtime: &Runtime, tenant_id: &str, deal_id: &str) -> StepOutcome<Deal> {
    runtime
        .database
        .get_deal(tenant_id, deal_id)
        .await
        .or_fail(runtime.logger.as_ref(), ErrorCode::DatabaseError, "Failed to load deal")?
        .ok_or_else(|| not_found("Deal", deal_id))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};
    use serde_json::Map;
    use stepwise_core::{Deal, DealStatus, Pipeline, Stage};

    pub fn stage(id: &str, position: u32) -> Stage {
        Stage {
            id: id.into(),
            name: id.to_uppercase(),
            position,
        }
    }

    pub fn pipeline(id: &str, funnel: &str, stages: &[&str]) -> Pipeline {
        Pipeline {
            id: id.into(),
            tenant_id: "t1".into(),
            name: format!("Pipeline {}", id),
            funnel_id: Some(funnel.into()),
            stages: stages
                .iter()
                .enumerate()
                .map(|(i, s)| stage(s, i as u32 + 1))
                .collect(),
        }
    }

    pub fn deal(id: &str, pipeline_id: &str, stage_id: &str) -> Deal {
        Deal {
            id: id.into(),
            tenant_id: "t1".into(),
            title: format!("Deal {}", id),
            value: 10_000.0,
            pipeline_id: pipeline_id.into(),
            stage_id: stage_id.into(),
            status: DealStatus::Open,
            assignee_id: Some("owner".into()),
            stage_entered_at: None,
            created_at: None,
            attributes: Map::new(),
        }
    }

    pub fn entered(mut deal: Deal, at: DateTime<Utc>) -> Deal {
        deal.stage_entered_at = Some(at);
        deal.created_at = Some(at);
        deal
    }
}
