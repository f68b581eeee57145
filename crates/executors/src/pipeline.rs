// Pipeline assignment
//
// Ordered declarative rules over the lead; the first rule whose every set
// criterion holds supplies the pipeline. Without a match the campaign's
// default pipeline is used, then the step's own default. No pipeline at all
// is terminal (NO_PIPELINE_CONFIGURED).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use stepwise_core::conditions::{as_number, lookup_field, stringify};
use stepwise_core::{
    ActionExecutionResult, ErrorCode, ExecutionContext, ExecutorId, InputData, Runtime, Step,
};

use crate::executor::{
    entity_snapshot, input_str, parse_config, settle, Executor, StepConfig, StepOutcome,
    UpstreamExt,
};

/// One assignment rule. Unset criteria are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRule {
    pub pipeline_id: String,
    #[serde(default)]
    pub product_interest: Option<String>,
    #[serde(default)]
    pub source_channel: Option<String>,
    #[serde(default)]
    pub min_score: Option<f64>,
}

impl AssignmentRule {
    pub fn matches(&self, lead: &Value) -> bool {
        let text = |field: &str| lookup_field(lead, field).map(stringify);

        if let Some(interest) = &self.product_interest {
            match text("productInterest") {
                Some(actual) if actual.eq_ignore_ascii_case(interest) => {}
                _ => return false,
            }
        }
        if let Some(channel) = &self.source_channel {
            let actual = text("sourceChannel").or_else(|| text("source"));
            match actual {
                Some(actual) if actual.eq_ignore_ascii_case(channel) => {}
                _ => return false,
            }
        }
        if let Some(min) = self.min_score {
            match lookup_field(lead, "score").and_then(as_number) {
                Some(score) if score >= min => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineAssignmentConfig {
    #[serde(default)]
    pub rules: Vec<AssignmentRule>,
    /// Campaign whose default pipeline applies when no rule matches
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub default_pipeline_id: Option<String>,
}

impl StepConfig for PipelineAssignmentConfig {
    fn validate(&self) -> Result<(), String> {
        match self.rules.iter().position(|r| r.pipeline_id.trim().is_empty()) {
            Some(i) => Err(format!("rule {} has an empty pipelineId", i)),
            None => Ok(()),
        }
    }
}

pub struct PipelineAssignmentExecutor {
    runtime: Runtime,
}

impl PipelineAssignmentExecutor {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    async fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: PipelineAssignmentConfig = parse_config(step)?;
        let lead = entity_snapshot(input, "lead");

        if let Some((index, rule)) = config
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(&lead))
        {
            return Ok(assigned(&rule.pipeline_id, "rule").with_field("ruleIndex", index));
        }

        let campaign_id = config
            .campaign_id
            .clone()
            .or_else(|| input_str(input, "campaignId").map(String::from));
        if let Some(campaign_id) = campaign_id {
            let campaign = self
                .runtime
                .database
                .get_campaign(&context.tenant_id, &campaign_id)
                .await
                .or_fail(
                    self.runtime.logger.as_ref(),
                    ErrorCode::DatabaseError,
                    "Failed to load campaign",
                )?;
            if let Some(pipeline_id) = campaign.and_then(|c| c.default_pipeline_id) {
                return Ok(assigned(&pipeline_id, "campaign_default"));
            }
        }

        if let Some(pipeline_id) = config.default_pipeline_id.as_deref() {
            return Ok(assigned(pipeline_id, "config_default"));
        }

        Err(ActionExecutionResult::failure(
            "No assignment rule matched and no default pipeline is configured",
        )
        .with_error(ErrorCode::NoPipelineConfigured))
    }
}

fn assigned(pipeline_id: &str, source: &str) -> ActionExecutionResult {
    ActionExecutionResult::success(format!("Lead assigned to pipeline {}", pipeline_id))
        .with_next_action(pipeline_id)
        .with_field("pipelineId", pipeline_id)
        .with_field("source", source)
}

#[async_trait]
impl Executor for PipelineAssignmentExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::PipelineAssignment
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
