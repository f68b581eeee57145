// Funnel exit: close a deal as won or lost
//
// Hook failures are logged and reported in `hooksFailed`; the closure
// itself already happened and is not rolled back.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use stepwise_core::{
    ActionExecutionResult, DealClosure, DealStatus, ErrorCode, ExecutionContext, ExecutorId,
    InputData, Runtime, Step,
};

use super::{load_deal, resolve_deal_id};
use crate::executor::{
    input_str, parse_config, settle, system_clock, Clock, Executor, StepConfig, StepOutcome,
    UpstreamExt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealOutcome {
    Won,
    Lost,
}

impl DealOutcome {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "won" => Some(DealOutcome::Won),
            "lost" => Some(DealOutcome::Lost),
            _ => None,
        }
    }

    fn status(self) -> DealStatus {
        match self {
            DealOutcome::Won => DealStatus::Won,
            DealOutcome::Lost => DealStatus::Lost,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelExitConfig {
    /// Falls back to input `outcome`
    #[serde(default)]
    pub outcome: Option<DealOutcome>,
    #[serde(default)]
    pub deal_id: Option<String>,
    /// Falls back to input `lostReason`, then "unspecified"
    #[serde(default)]
    pub lost_reason: Option<String>,
    #[serde(default)]
    pub archive: bool,
    #[serde(default = "default_true")]
    pub create_customer_record: bool,
    #[serde(default = "default_true")]
    pub trigger_retention: bool,
    #[serde(default = "default_true")]
    pub emit_analytics: bool,
}

impl StepConfig for FunnelExitConfig {}

pub struct FunnelExitExecutor {
    runtime: Runtime,
    clock: Clock,
}

impl FunnelExitExecutor {
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
        let config: FunnelExitConfig = parse_config(step)?;
        let logger = self.runtime.logger.as_ref();

        let outcome = config
            .outcome
            .or_else(|| input_str(input, "outcome").and_then(DealOutcome::parse))
            .ok_or_else(|| {
                ActionExecutionResult::validation_error("outcome must be 'won' or 'lost'")
            })?;

        let deal_id = resolve_deal_id(config.deal_id.as_deref(), input)?;
        let mut deal = load_deal(&self.runtime, &context.tenant_id, &deal_id).await?;
        if deal.status != DealStatus::Open {
            return Err(ActionExecutionResult::validation_error(format!(
                "Deal {} is already closed as {}",
                deal.id,
                deal.status.as_str()
            )));
        }

        let lost_reason = match outcome {
            DealOutcome::Won => None,
            DealOutcome::Lost => Some(
                config
                    .lost_reason
                    .clone()
                    .or_else(|| input_str(input, "lostReason").map(String::from))
                    .unwrap_or_else(|| "unspecified".to_string()),
            ),
        };
        let closure = DealClosure {
            status: outcome.status(),
            closed_at: (self.clock)(),
            lost_reason,
            archived: config.archive,
        };

        self.runtime
            .database
            .close_deal(&context.tenant_id, &deal.id, &closure)
            .await
            .or_fail(logger, ErrorCode::DatabaseError, "Failed to close deal")?;
        deal.status = closure.status;

        let hooks = self.runtime.exit_hooks.as_ref();
        let mut fired = Vec::new();
        let mut failed = Vec::new();
        let mut record = |name: &'static str, result: stepwise_core::Result<()>| match result {
            Ok(()) => fired.push(name),
            Err(e) => {
                logger.warn(
                    "Funnel exit hook failed",
                    Some(&json!({ "hook": name, "dealId": deal_id, "error": e.to_string() })),
                );
                failed.push(name);
            }
        };

        match outcome {
            DealOutcome::Won if config.create_customer_record => record(
                "create_customer_record",
                hooks.create_customer_record(&deal, context).await,
            ),
            DealOutcome::Lost if config.trigger_retention => record(
                "trigger_retention_workflow",
                hooks.trigger_retention_workflow(&deal, context).await,
            ),
            _ => {}
        }
        if config.emit_analytics {
            record(
                "emit_analytics_event",
                hooks.emit_analytics_event(&deal, closure.status, context).await,
            );
        }

        Ok(ActionExecutionResult::success(format!(
            "Deal {} closed as {}",
            deal.id,
            closure.status.as_str()
        ))
        .with_field("dealId", deal.id.clone())
        .with_field("outcome", closure.status.as_str())
        .with_field("closedAt", closure.closed_at.to_rfc3339())
        .with_field("lostReason", json!(closure.lost_reason))
        .with_field("archived", closure.archived)
        .with_field("hooksFired", json!(fired))
        .with_field("hooksFailed", json!(failed)))
    }
}

#[async_trait]
impl Executor for FunnelExitExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::FunnelExit
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
