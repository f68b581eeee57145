// AI funnel orchestrator
//
// Asks the AI capability which pipeline of the funnel a deal should move to.
// Confidence at or above the threshold auto-assigns (nextAction is set);
// below it the suggestion is returned for manual confirmation. When the AI
// is unavailable or answers with something unusable, the configured
// fallback pipeline is suggested with confidence 50. Only a missing fallback
// fails the step.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;

use stepwise_core::{
    ActionExecutionResult, AiRequestContext, AiSettings, Deal, ErrorCode, ExecutionContext,
    ExecutorId, InputData, Pipeline, Runtime, Step,
};

use super::{load_deal, resolve_deal_id};
use crate::executor::{
    parse_config, settle, system_clock, Clock, Executor, StepConfig, StepOutcome, UpstreamExt,
};

const FALLBACK_CONFIDENCE: f64 = 50.0;

fn default_orchestrator_agent() -> String {
    "funnel-orchestrator".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiFunnelOrchestratorConfig {
    pub funnel_id: String,
    #[serde(default)]
    pub deal_id: Option<String>,
    /// 0-100; defaults to the engine's auto-assign threshold
    #[serde(default)]
    pub auto_assign_threshold: Option<u8>,
    #[serde(default)]
    pub fallback_pipeline_id: Option<String>,
    #[serde(default = "default_orchestrator_agent")]
    pub agent_id: String,
    #[serde(flatten)]
    pub settings: AiSettings,
}

impl StepConfig for AiFunnelOrchestratorConfig {
    fn validate(&self) -> Result<(), String> {
        if self.funnel_id.trim().is_empty() {
            return Err("funnelId must not be empty".into());
        }
        if matches!(self.auto_assign_threshold, Some(t) if t > 100) {
            return Err("autoAssignThreshold must be between 0 and 100".into());
        }
        Ok(())
    }
}

/// The AI's pipeline suggestion
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorDecision {
    pub target_pipeline_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Parse the JSON object embedded in model output. The target must be one of
/// `candidates` and confidence must lie in 0..=100.
pub fn parse_orchestrator_decision(
    text: &str,
    candidates: &[Pipeline],
) -> Result<OrchestratorDecision, String> {
    let start = text.find('{').ok_or("response contains no JSON object")?;
    let end = text.rfind('}').ok_or("response contains no JSON object")?;
    if end < start {
        return Err("response contains no JSON object".into());
    }
    let decision: OrchestratorDecision =
        serde_json::from_str(&text[start..=end]).map_err(|e| format!("invalid decision: {}", e))?;

    if !candidates.iter().any(|p| p.id == decision.target_pipeline_id) {
        return Err(format!(
            "pipeline {} is not part of the funnel",
            decision.target_pipeline_id
        ));
    }
    if !(0.0..=100.0).contains(&decision.confidence) {
        return Err(format!("confidence {} is out of range", decision.confidence));
    }
    Ok(decision)
}

pub struct AiFunnelOrchestratorExecutor {
    runtime: Runtime,
    clock: Clock,
}

impl AiFunnelOrchestratorExecutor {
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

    fn build_prompt(&self, deal: &Deal, candidates: &[Pipeline], input: &InputData) -> String {
        let now = (self.clock)();
        // Tenant-supplied signals: step input first, deal attributes second
        let metric = |key: &str| -> Value {
            input
                .get(key)
                .or_else(|| deal.attributes.get(key))
                .cloned()
                .unwrap_or(Value::Null)
        };
        let days = |d: Option<i64>| d.map(|d| d.to_string()).unwrap_or_else(|| "unknown".into());

        let mut prompt = String::from(
            "You route sales deals between the pipelines of a funnel.\n\nDeal:\n",
        );
        let _ = writeln!(prompt, "- id: {}", deal.id);
        let _ = writeln!(prompt, "- title: {}", deal.title);
        let _ = writeln!(prompt, "- value: {}", deal.value);
        let _ = writeln!(prompt, "- current pipeline: {}", deal.pipeline_id);
        let _ = writeln!(prompt, "- current stage: {}", deal.stage_id);
        let _ = writeln!(prompt, "- days in stage: {}", days(deal.days_in_stage(now)));
        let _ = writeln!(prompt, "- days in funnel: {}", days(deal.days_in_funnel(now)));
        let _ = writeln!(prompt, "- lead score: {}", metric("leadScore"));
        let _ = writeln!(prompt, "- probability: {}", metric("probability"));
        let _ = writeln!(prompt, "- customer lifetime value: {}", metric("customerLifetimeValue"));
        let _ = writeln!(prompt, "- interaction quality: {}", metric("interactionQuality"));

        prompt.push_str("\nCandidate pipelines:\n");
        for pipeline in candidates {
            let stages: Vec<&str> = pipeline.stages.iter().map(|s| s.name.as_str()).collect();
            let _ = writeln!(
                prompt,
                "- {} ({}): stages [{}]",
                pipeline.id,
                pipeline.name,
                stages.join(", ")
            );
        }
        prompt.push_str(
            "\nRespond with JSON only: {\"targetPipelineId\": \"<id>\", \"confidence\": <0-100>, \"reasoning\": \"<short explanation>\"}",
        );
        prompt
    }

    async fn ask(
        &self,
        config: &AiFunnelOrchestratorConfig,
        prompt: &str,
        candidates: &[Pipeline],
        deal: &Deal,
        context: &ExecutionContext,
    ) -> Result<OrchestratorDecision, String> {
        let settings = self.runtime.config.ai_settings(&config.settings);
        let request = AiRequestContext {
            agent_id: config.agent_id.clone(),
            tenant_id: context.tenant_id.clone(),
            user_id: context.requester_id.clone(),
            module_context: "crm".to_string(),
            business_entity_id: Some(deal.id.clone()),
        };
        let response = self
            .runtime
            .ai
            .create_unified_response(prompt, &settings, &request)
            .await
            .map_err(|e| e.to_string())?;
        let text = response.text().ok_or("AI returned no output")?;
        parse_orchestrator_decision(text, candidates)
    }

    async fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: AiFunnelOrchestratorConfig = parse_config(step)?;
        let threshold = config
            .auto_assign_threshold
            .unwrap_or(self.runtime.config.auto_assign_threshold);

        let deal_id = resolve_deal_id(config.deal_id.as_deref(), input)?;
        let deal = load_deal(&self.runtime, &context.tenant_id, &deal_id).await?;
        let candidates = self
            .runtime
            .database
            .get_funnel_pipelines(&context.tenant_id, &config.funnel_id)
            .await
            .or_fail(
                self.runtime.logger.as_ref(),
                ErrorCode::DatabaseError,
                "Failed to load funnel pipelines",
            )?;

        let prompt = self.build_prompt(&deal, &candidates, input);
        match self.ask(&config, &prompt, &candidates, &deal, context).await {
            Ok(decision) => Ok(gated(&deal, decision, threshold)),
            Err(reason) => {
                self.runtime.logger.warn(
                    "Funnel orchestration fell back",
                    Some(&json!({ "dealId": deal.id, "reason": reason })),
                );
                let fallback = config.fallback_pipeline_id.ok_or_else(|| {
                    ActionExecutionResult::failure(format!(
                        "AI orchestration failed and no fallback pipeline is configured: {}",
                        reason
                    ))
                    .with_error(ErrorCode::NoFallbackPipeline)
                })?;

                Ok(ActionExecutionResult::success(format!(
                    "AI unavailable, deal {} routed to fallback pipeline {}",
                    deal.id, fallback
                ))
                .with_next_action(fallback.clone())
                .with_field("dealId", deal.id.clone())
                .with_field("targetPipelineId", fallback)
                .with_field("confidence", FALLBACK_CONFIDENCE)
                .with_field("reasoning", reason)
                .with_field("autoAssigned", false)
                .with_field("requiresManualConfirmation", false)
                .with_field("fallbackUsed", true)
                .with_field("threshold", threshold))
            }
        }
    }
}

fn gated(deal: &Deal, decision: OrchestratorDecision, threshold: u8) -> ActionExecutionResult {
    let auto_assigned = decision.confidence >= f64::from(threshold);
    let result = if auto_assigned {
        ActionExecutionResult::success(format!(
            "Deal {} assigned to pipeline {} ({}% confidence)",
            deal.id, decision.target_pipeline_id, decision.confidence
        ))
        .with_next_action(decision.target_pipeline_id.clone())
    } else {
        ActionExecutionResult::success(format!(
            "Pipeline {} suggested for deal {} ({}% confidence), confirmation required",
            decision.target_pipeline_id, deal.id, decision.confidence
        ))
    };

    result
        .with_field("dealId", deal.id.clone())
        .with_field("targetPipelineId", decision.target_pipeline_id)
        .with_field("confidence", decision.confidence)
        .with_field("reasoning", json!(decision.reasoning))
        .with_field("autoAssigned", auto_assigned)
        .with_field("requiresManualConfirmation", !auto_assigned)
        .with_field("fallbackUsed", false)
        .with_field("threshold", threshold)
}

#[async_trait]
impl Executor for AiFunnelOrchestratorExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::AiFunnelOrchestrator
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
    use crate::funnel::fixtures::{deal, pipeline};
    use stepwise_core::memory::InMemoryRuntime;

    fn context() -> ExecutionContext {
        ExecutionContext::new("t1", "u1", "inst-1", "tpl-1")
    }

    fn input(value: Value) -> InputData {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn seeded() -> InMemoryRuntime {
        let mem = InMemoryRuntime::new();
        mem.database
            .insert_pipeline(pipeline("p-sales", "f1", &["qualify"]))
            .await;
        mem.database
            .insert_pipeline(pipeline("p-upsell", "f1", &["offer"]))
            .await;
        mem.database.insert_deal(deal("d1", "p-sales", "qualify")).await;
        mem
    }

    fn step(extra: Value) -> Step {
        let mut config = json!({"funnelId": "f1", "dealId": "d1"});
        if let (Some(base), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        Step::new("orchestrate", ExecutorId::AiFunnelOrchestrator).with_config(config)
    }

    #[test]
    fn test_parse_decision_validates_candidates() {
        let candidates = vec![pipeline("p-sales", "f1", &[]), pipeline("p-upsell", "f1", &[])];
        let ok = parse_orchestrator_decision(
            "Here you go: {\"targetPipelineId\": \"p-upsell\", \"confidence\": 85, \"reasoning\": \"engaged\"}",
            &candidates,
        )
        .unwrap();
        assert_eq!(ok.target_pipeline_id, "p-upsell");
        assert_eq!(ok.confidence, 85.0);

        assert!(parse_orchestrator_decision(
            "{\"targetPipelineId\": \"p-elsewhere\", \"confidence\": 99}",
            &candidates
        )
        .is_err());
        assert!(parse_orchestrator_decision(
            "{\"targetPipelineId\": \"p-sales\", \"confidence\": 140}",
            &candidates
        )
        .is_err());
        assert!(parse_orchestrator_decision("upsell, definitely", &candidates).is_err());
    }

    #[tokio::test]
    async fn test_threshold_gates_auto_assignment() {
        let mem = seeded().await;
        mem.ai
            .push_text(r#"{"targetPipelineId": "p-upsell", "confidence": 80, "reasoning": "ready"}"#)
            .await;
        mem.ai
            .push_text(r#"{"targetPipelineId": "p-upsell", "confidence": 79, "reasoning": "maybe"}"#)
            .await;
        let executor = AiFunnelOrchestratorExecutor::new(mem.runtime.clone());

        let at = executor.execute(&step(json!({})), &InputData::new(), &context()).await;
        assert!(at.success);
        assert_eq!(at.data_value("autoAssigned"), Some(&json!(true)));
        assert_eq!(at.next_action.as_deref(), Some("p-upsell"));

        let below = executor.execute(&step(json!({})), &InputData::new(), &context()).await;
        assert!(below.success);
        assert_eq!(below.data_value("autoAssigned"), Some(&json!(false)));
        assert_eq!(below.data_value("requiresManualConfirmation"), Some(&json!(true)));
        assert_eq!(below.next_action, None);
    }

    #[tokio::test]
    async fn test_step_threshold_overrides_engine_default() {
        let mem = seeded().await;
        mem.ai
            .push_text(r#"{"targetPipelineId": "p-upsell", "confidence": 65}"#)
            .await;
        let result = AiFunnelOrchestratorExecutor::new(mem.runtime.clone())
            .execute(&step(json!({"autoAssignThreshold": 60})), &InputData::new(), &context())
            .await;
        assert_eq!(result.data_value("autoAssigned"), Some(&json!(true)));
        assert_eq!(result.data_value("threshold"), Some(&json!(60)));
    }

    #[tokio::test]
    async fn test_ai_failure_uses_fallback() {
        let mem = seeded().await;
        mem.ai.push_error("timeout").await;
        let result = AiFunnelOrchestratorExecutor::new(mem.runtime.clone())
            .execute(
                &step(json!({"fallbackPipelineId": "p-sales"})),
                &InputData::new(),
                &context(),
            )
            .await;
        assert!(result.success);
        assert_eq!(result.data_value("confidence"), Some(&json!(50.0)));
        assert_eq!(result.data_value("fallbackUsed"), Some(&json!(true)));
        assert_eq!(result.next_action.as_deref(), Some("p-sales"));
    }

    #[tokio::test]
    async fn test_ai_failure_without_fallback_fails() {
        let mem = seeded().await;
        mem.ai.push_text("no json here").await;
        let result = AiFunnelOrchestratorExecutor::new(mem.runtime.clone())
            .execute(&step(json!({})), &InputData::new(), &context())
            .await;
        assert!(!result.success);
        assert_eq!(result.error_code(), Some(ErrorCode::NoFallbackPipeline));
    }

    #[tokio::test]
    async fn test_prompt_carries_deal_and_metrics() {
        let mem = seeded().await;
        mem.ai
            .push_text(r#"{"targetPipelineId": "p-sales", "confidence": 90}"#)
            .await;
        AiFunnelOrchestratorExecutor::new(mem.runtime.clone())
            .execute(
                &step(json!({})),
                &input(json!({"leadScore": 72, "probability": 0.4})),
                &context(),
            )
            .await;

        let calls = mem.ai.calls().await;
        let prompt = &calls[0].prompt;
        assert!(prompt.contains("- lead score: 72"));
        assert!(prompt.contains("- probability: 0.4"));
        assert!(prompt.contains("- p-upsell (Pipeline p-upsell): stages [OFFER]"));
        assert_eq!(calls[0].context.agent_id, "funnel-orchestrator");
        assert_eq!(calls[0].context.business_entity_id.as_deref(), Some("d1"));
    }
}
