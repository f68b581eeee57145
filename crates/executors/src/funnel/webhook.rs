// Deal webhook trigger
//
// Fires only when a configured gate matches the deal's transition:
//   won > lost > pipeline change > stage change
// `forceSend` in the input sends `deal.updated` when no gate matched.
// Delivery goes through RetryPolicy; exhausting every attempt yields
// WEBHOOK_DELIVERY_FAILED.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use stepwise_core::{
    ActionExecutionResult, Deal, DealStatus, ErrorCode, ExecutionContext, ExecutorId, InputData,
    RetryPolicy, Runtime, Step, WebhookRequest,
};

use super::{load_deal, resolve_deal_id};
use crate::executor::{
    parse_config, settle, system_clock, upstream_failure, Clock, Executor, StepConfig,
    StepOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealEvent {
    Won,
    Lost,
    PipelineChanged,
    StageChanged,
    Updated,
}

impl DealEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealEvent::Won => "deal.won",
            DealEvent::Lost => "deal.lost",
            DealEvent::PipelineChanged => "deal.pipeline.changed",
            DealEvent::StageChanged => "deal.stage.changed",
            DealEvent::Updated => "deal.updated",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealWebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub on_stage_change: bool,
    #[serde(default)]
    pub on_pipeline_change: bool,
    #[serde(default)]
    pub on_deal_won: bool,
    #[serde(default)]
    pub on_deal_lost: bool,
    /// Extra fields merged over the serialized deal in `data`
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub deal_id: Option<String>,
    #[serde(flatten)]
    pub retry: RetryPolicy,
}

impl StepConfig for DealWebhookConfig {
    fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(format!("url must be an http(s) URL, got '{}'", self.url));
        }
        Ok(())
    }
}

/// Pick the event to send for a deal transition, if any gate matches
pub fn select_event(
    config: &DealWebhookConfig,
    deal: &Deal,
    stage_changed: bool,
    pipeline_changed: bool,
) -> Option<DealEvent> {
    if config.on_deal_won && deal.status == DealStatus::Won {
        Some(DealEvent::Won)
    } else if config.on_deal_lost && deal.status == DealStatus::Lost {
        Some(DealEvent::Lost)
    } else if config.on_pipeline_change && pipeline_changed {
        Some(DealEvent::PipelineChanged)
    } else if config.on_stage_change && stage_changed {
        Some(DealEvent::StageChanged)
    } else {
        None
    }
}

fn flag(input: &InputData, key: &str) -> bool {
    input.get(key).and_then(Value::as_bool).unwrap_or(false)
}

pub struct DealWebhookTriggerExecutor {
    runtime: Runtime,
    clock: Clock,
}

impl DealWebhookTriggerExecutor {
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
        let config: DealWebhookConfig = parse_config(step)?;
        let deal_id = resolve_deal_id(config.deal_id.as_deref(), input)?;
        let deal = load_deal(&self.runtime, &context.tenant_id, &deal_id).await?;

        let event = select_event(
            &config,
            &deal,
            flag(input, "stageChanged"),
            flag(input, "pipelineChanged"),
        )
        .or_else(|| flag(input, "forceSend").then_some(DealEvent::Updated));
        let Some(event) = event else {
            return Ok(ActionExecutionResult::success("No webhook gate matched, nothing sent")
                .with_field("triggered", false)
                .with_field("dealId", deal.id));
        };

        let mut data = match serde_json::to_value(&deal) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        data.extend(config.payload.clone());

        let request = WebhookRequest {
            url: config.url.clone(),
            headers: config.headers.clone(),
            body: json!({
                "event": event.as_str(),
                "tenantId": context.tenant_id,
                "dealId": deal.id,
                "timestamp": (self.clock)().to_rfc3339(),
                "data": data,
            }),
        };

        let client = self.runtime.webhooks.as_ref();
        let req = &request;
        let delivered = config
            .retry
            .run(move |attempt| async move {
                client.post_json(req).await.map(|status| (status, attempt))
            })
            .await;

        match delivered {
            Ok((status, attempts)) => Ok(ActionExecutionResult::success(format!(
                "Webhook {} delivered",
                event.as_str()
            ))
            .with_field("triggered", true)
            .with_field("event", event.as_str())
            .with_field("dealId", deal.id)
            .with_field("statusCode", status)
            .with_field("attempts", attempts)),
            Err(e) => Err(upstream_failure(
                self.runtime.logger.as_ref(),
                ErrorCode::WebhookDeliveryFailed,
                &format!(
                    "Webhook delivery failed after {} attempts",
                    config.retry.total_attempts()
                ),
                &e,
            )),
        }
    }
}

#[async_trait]
impl Executor for DealWebhookTriggerExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::DealWebhookTrigger
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
    use crate::funnel::fixtures::deal;
    use chrono::{TimeZone, Utc};
    use stepwise_core::memory::InMemoryRuntime;

    fn context() -> ExecutionContext {
        ExecutionContext::new("t1", "u1", "inst-1", "tpl-1")
    }

    fn input(value: Value) -> InputData {
        value.as_object().cloned().unwrap_or_default()
    }

    fn config(value: Value) -> DealWebhookConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_event_priority() {
        let all = config(json!({
            "url": "https://hooks.example.com",
            "onStageChange": true,
            "onPipelineChange": true,
            "onDealWon": true,
            "onDealLost": true
        }));
        let mut d = deal("d1", "p1", "s1");
        assert_eq!(select_event(&all, &d, true, true), Some(DealEvent::PipelineChanged));
        assert_eq!(select_event(&all, &d, true, false), Some(DealEvent::StageChanged));
        assert_eq!(select_event(&all, &d, false, false), None);
        d.status = DealStatus::Won;
        assert_eq!(select_event(&all, &d, true, true), Some(DealEvent::Won));

        let stage_only = config(json!({"url": "https://x", "onStageChange": true}));
        assert_eq!(select_event(&stage_only, &d, false, true), None);
    }

    #[test]
    fn test_retry_settings_flatten_into_config() {
        let c = config(json!({"url": "https://x", "maxRetries": 1, "delayMs": 10}));
        assert_eq!(c.retry, RetryPolicy::new(1, 10));
        let c = config(json!({"url": "https://x"}));
        assert_eq!(c.retry, RetryPolicy::default());
    }

    #[tokio::test]
    async fn test_no_gate_matched_sends_nothing() {
        let mem = InMemoryRuntime::new();
        mem.database.insert_deal(deal("d1", "p1", "s1")).await;
        let step = Step::new("hook", ExecutorId::DealWebhookTrigger)
            .with_config(json!({"url": "https://hooks.example.com", "onDealWon": true}));

        let result = DealWebhookTriggerExecutor::new(mem.runtime.clone())
            .execute(&step, &input(json!({"dealId": "d1", "stageChanged": true})), &context())
            .await;
        assert!(result.success);
        assert_eq!(result.data_value("triggered"), Some(&json!(false)));
        assert!(mem.webhooks.attempts().await.is_empty());
    }

    #[tokio::test]
    async fn test_envelope_shape_and_headers() {
        let mem = InMemoryRuntime::new();
        mem.database.insert_deal(deal("d1", "p1", "s2")).await;
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        let step = Step::new("hook", ExecutorId::DealWebhookTrigger).with_config(json!({
            "url": "https://hooks.example.com/deals",
            "headers": {"X-Api-Key": "secret"},
            "onStageChange": true,
            "payload": {"source": "stepwise"}
        }));

        let result = DealWebhookTriggerExecutor::new(mem.runtime.clone())
            .with_clock(fixed_clock(at))
            .execute(&step, &input(json!({"dealId": "d1", "stageChanged": true})), &context())
            .await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.data_value("event"), Some(&json!("deal.stage.changed")));
        let attempts = mem.webhooks.attempts().await;
        assert_eq!(attempts.len(), 1);
        let request = &attempts[0].request;
        assert_eq!(request.headers.get("X-Api-Key").map(String::as_str), Some("secret"));
        assert_eq!(request.body["event"], json!("deal.stage.changed"));
        assert_eq!(request.body["tenantId"], json!("t1"));
        assert_eq!(request.body["timestamp"], json!(at.to_rfc3339()));
        assert_eq!(request.body["data"]["stageId"], json!("s2"));
        assert_eq!(request.body["data"]["source"], json!("stepwise"));
    }

    #[tokio::test]
    async fn test_force_send_uses_updated_event() {
        let mem = InMemoryRuntime::new();
        mem.database.insert_deal(deal("d1", "p1", "s1")).await;
        let step = Step::new("hook", ExecutorId::DealWebhookTrigger)
            .with_config(json!({"url": "https://hooks.example.com"}));

        let result = DealWebhookTriggerExecutor::new(mem.runtime.clone())
            .execute(&step, &input(json!({"dealId": "d1", "forceSend": true})), &context())
            .await;
        assert_eq!(result.data_value("event"), Some(&json!("deal.updated")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let mem = InMemoryRuntime::new();
        mem.database.insert_deal(deal("d1", "p1", "s1")).await;
        mem.webhooks.fail_times(2, "503 Service Unavailable").await;
        let step = Step::new("hook", ExecutorId::DealWebhookTrigger).with_config(json!({
            "url": "https://hooks.example.com",
            "onStageChange": true,
            "delayMs": 100
        }));

        let result = DealWebhookTriggerExecutor::new(mem.runtime.clone())
            .execute(&step, &input(json!({"dealId": "d1", "stageChanged": true})), &context())
            .await;
        assert!(result.success);
        assert_eq!(result.data_value("attempts"), Some(&json!(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail() {
        let mem = InMemoryRuntime::new();
        mem.database.insert_deal(deal("d1", "p1", "s1")).await;
        mem.webhooks.fail_always("connection refused").await;
        let step = Step::new("hook", ExecutorId::DealWebhookTrigger).with_config(json!({
            "url": "https://hooks.example.com",
            "onStageChange": true,
            "maxRetries": 2
        }));

        let result = DealWebhookTriggerExecutor::new(mem.runtime.clone())
            .execute(&step, &input(json!({"dealId": "d1", "stageChanged": true})), &context())
            .await;
        assert!(!result.success);
        assert_eq!(result.error_code(), Some(ErrorCode::WebhookDeliveryFailed));
        assert_eq!(mem.webhooks.attempts().await.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let mem = InMemoryRuntime::new();
        let step = Step::new("hook", ExecutorId::DealWebhookTrigger)
            .with_config(json!({"url": "ftp://example.com"}));
        let result = DealWebhookTriggerExecutor::new(mem.runtime.clone())
            .execute(&step, &input(json!({"dealId": "d1"})), &context())
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::ValidationError));
    }
}
