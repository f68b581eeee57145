// End-to-end behaviour of built-in executors, dispatched through ExecutorRegistry
// against the in-memory runtime.

use serde_json::{json, Map, Value};
use std::time::Duration;

use stepwise_core::memory::InMemoryRuntime;
use stepwise_core::{
    BranchLedger, Campaign, Deal, DealStatus, ErrorCode, ExecutionContext, ExecutorId, InputData,
    Pipeline, RoutingMode, Stage, Step, UserAssignment,
};
use stepwise_executors::ExecutorRegistry;

fn context() -> ExecutionContext {
    ExecutionContext::new("t1", "requester", "inst-1", "tpl-1")
}

fn input(value: Value) -> InputData {
    value.as_object().cloned().unwrap_or_default()
}

fn setup() -> (InMemoryRuntime, ExecutorRegistry) {
    let mem = InMemoryRuntime::new();
    let registry = ExecutorRegistry::with_builtins(mem.runtime.clone());
    (mem, registry)
}

fn pipeline(id: &str, funnel: &str, stages: &[&str]) -> Pipeline {
    Pipeline {
        id: id.into(),
        tenant_id: "t1".into(),
        name: id.into(),
        funnel_id: Some(funnel.into()),
        stages: stages
            .iter()
            .enumerate()
            .map(|(i, s)| Stage {
                id: (*s).into(),
                name: s.to_uppercase(),
                position: i as u32 + 1,
            })
            .collect(),
    }
}

fn deal(id: &str, pipeline_id: &str, stage_id: &str) -> Deal {
    Deal {
        id: id.into(),
        tenant_id: "t1".into(),
        title: format!("Deal {}", id),
        value: 25_000.0,
        pipeline_id: pipeline_id.into(),
        stage_id: stage_id.into(),
        status: DealStatus::Open,
        assignee_id: Some("owner".into()),
        stage_entered_at: None,
        created_at: None,
        attributes: Map::new(),
    }
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_router_takes_first_matching_branch_in_declaration_order() {
    let (_mem, registry) = setup();
    let step = Step::new("route", ExecutorId::LeadRouter).with_config(json!({
        "branches": [
            {"name": "enterprise", "target": "ae-queue",
             "conditions": [{"field": "employees", "operator": "greater_than", "value": 1000}]},
            {"name": "big", "target": "smb-queue",
             "conditions": [{"field": "employees", "operator": "greater_than", "value": 50}]}
        ],
        "defaultPath": "nurture"
    }));

    // Both branches hold; the earlier one wins
    let result = registry
        .execute(&step, &input(json!({"lead": {"employees": 5000}})), &context())
        .await;
    assert_eq!(result.decision.as_deref(), Some("enterprise"));
    assert_eq!(result.next_action.as_deref(), Some("ae-queue"));

    let result = registry
        .execute(&step, &input(json!({"lead": {"employees": 10}})), &context())
        .await;
    assert!(result.success);
    assert_eq!(result.decision.as_deref(), Some("default"));
    assert_eq!(result.next_action.as_deref(), Some("nurture"));
}

// ============================================================================
// Webhook retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_webhook_retries_with_exponential_backoff() {
    let (mem, registry) = setup();
    mem.database.insert_deal(deal("d1", "p1", "s2")).await;
    mem.webhooks.fail_always("connection refused").await;
    let step = Step::new("hook", ExecutorId::DealWebhookTrigger).with_config(json!({
        "url": "https://hooks.example.com/deals",
        "onStageChange": true
    }));

    let result = registry
        .execute(&step, &input(json!({"dealId": "d1", "stageChanged": true})), &context())
        .await;

    assert!(!result.success);
    assert_eq!(result.error_code(), Some(ErrorCode::WebhookDeliveryFailed));

    let attempts = mem.webhooks.attempts().await;
    assert_eq!(attempts.len(), 4);
    let start = attempts[0].at;
    let offsets: Vec<Duration> = attempts.iter().map(|a| a.at - start).collect();
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_millis(1000),
            Duration::from_millis(3000),
            Duration::from_millis(7000),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_webhook_recovers_after_transient_failures() {
    let (mem, registry) = setup();
    mem.database.insert_deal(deal("d1", "p1", "s2")).await;
    mem.webhooks.fail_times(2, "502 from upstream").await;
    let step = Step::new("hook", ExecutorId::DealWebhookTrigger).with_config(json!({
        "url": "https://hooks.example.com/deals",
        "onStageChange": true
    }));

    let result = registry
        .execute(&step, &input(json!({"dealId": "d1", "stageChanged": true})), &context())
        .await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.data_value("attempts"), Some(&json!(3)));
    assert_eq!(mem.webhooks.attempts().await.len(), 3);
}

// ============================================================================
// AI funnel orchestrator
// ============================================================================

#[tokio::test]
async fn test_orchestrator_confidence_threshold_is_inclusive() {
    let (mem, registry) = setup();
    mem.database
        .insert_pipeline(pipeline("p-sales", "f1", &["qualify"]))
        .await;
    mem.database
        .insert_pipeline(pipeline("p-upsell", "f1", &["offer"]))
        .await;
    mem.database.insert_deal(deal("d1", "p-sales", "qualify")).await;
    mem.ai
        .push_text(r#"{"targetPipelineId": "p-upsell", "confidence": 79}"#)
        .await;
    mem.ai
        .push_text(r#"{"targetPipelineId": "p-upsell", "confidence": 80}"#)
        .await;
    let step = Step::new("orchestrate", ExecutorId::AiFunnelOrchestrator)
        .with_config(json!({"funnelId": "f1", "dealId": "d1", "autoAssignThreshold": 80}));

    let below = registry.execute(&step, &InputData::new(), &context()).await;
    assert!(below.success);
    assert_eq!(below.data_value("autoAssigned"), Some(&json!(false)));
    assert_eq!(below.data_value("requiresManualConfirmation"), Some(&json!(true)));

    let at = registry.execute(&step, &InputData::new(), &context()).await;
    assert_eq!(at.data_value("autoAssigned"), Some(&json!(true)));
    assert_eq!(at.next_action.as_deref(), Some("p-upsell"));
}

// ============================================================================
// Scope validation
// ============================================================================

#[tokio::test]
async fn test_tenant_assignment_short_circuits_store_lookup() {
    let (mem, registry) = setup();
    mem.database
        .insert_assignment("t1", UserAssignment::tenant("approver"))
        .await;
    let step = Step::new("approve", ExecutorId::RequestApproval)
        .with_config(json!({"approverId": "approver"}));
    let ctx = context().with_store("store-9");

    let result = registry.execute(&step, &InputData::new(), &ctx).await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.data_value("grantedBy"), Some(&json!("tenant")));
    assert_eq!(mem.database.store_lookups().await, 0);
    assert_eq!(mem.delivered_notifications().await.len(), 1);
}

#[tokio::test]
async fn test_denied_scope_sends_nothing() {
    let (mem, registry) = setup();
    mem.database
        .insert_assignment("t1", UserAssignment::store("approver", "store-1"))
        .await;
    let step = Step::new("approve", ExecutorId::RequestApproval)
        .with_config(json!({"approverId": "approver"}));
    let ctx = context().with_store("store-2");

    let result = registry.execute(&step, &InputData::new(), &ctx).await;

    assert!(!result.success);
    assert_eq!(result.error_code(), Some(ErrorCode::ScopeAccessDenied));
    assert!(mem.delivered_notifications().await.is_empty());
}

// ============================================================================
// Control flow
// ============================================================================

#[tokio::test]
async fn test_while_loop_stops_at_max_iterations() {
    let (_mem, registry) = setup();
    let step = Step::new("poll", ExecutorId::WhileLoop).with_config(json!({
        "condition": {"variable": "status", "operator": "equals", "value": "pending"},
        "maxIterations": 2,
        "loopBody": "check-status",
        "exitPath": "give-up"
    }));
    let pending = input(json!({"status": "pending"}));

    let mut ledger = BranchLedger::new();
    let mut decisions = Vec::new();
    for _ in 0..3 {
        let result = registry
            .execute(&step, &pending, &context().with_ledger(ledger.clone()))
            .await;
        decisions.push(result.decision.clone().unwrap_or_default());
        if result.decision.as_deref() == Some("continue") {
            ledger = ledger.record_iteration("poll");
        } else {
            assert_eq!(result.data_value("exitReason"), Some(&json!("max_iterations")));
            assert_eq!(result.next_action.as_deref(), Some("give-up"));
        }
    }
    assert_eq!(decisions, vec!["continue", "continue", "exit"]);
}

#[tokio::test]
async fn test_fork_then_join_through_the_ledger() {
    let (_mem, registry) = setup();
    let fork = Step::new("fork", ExecutorId::ParallelFork).with_config(json!({
        "branches": [
            {"name": "credit", "startNode": "credit-check"},
            {"name": "kyc", "startNode": "kyc-check"}
        ]
    }));
    let join = Step::new("join", ExecutorId::JoinSync).with_config(json!({"continuePath": "decide"}));

    let forked = registry.execute(&fork, &InputData::new(), &context()).await;
    assert_eq!(forked.next_actions(), vec!["credit-check", "kyc-check"]);

    let ledger = BranchLedger::new()
        .with_total_branches(forked.next_actions().len())
        .record_branch_completion("kyc");
    let waiting = registry
        .execute(&join, &InputData::new(), &context().with_ledger(ledger.clone()))
        .await;
    assert_eq!(waiting.data_value("waiting"), Some(&json!(true)));

    let ledger = ledger.record_branch_completion("credit");
    let joined = registry
        .execute(&join, &InputData::new(), &context().with_ledger(ledger))
        .await;
    assert_eq!(joined.next_action.as_deref(), Some("decide"));
}

// ============================================================================
// Campaign intake
// ============================================================================

#[tokio::test]
async fn test_manual_campaign_without_pipelines_fails() {
    let (mem, registry) = setup();
    mem.database
        .insert_campaign(Campaign {
            id: "c1".into(),
            tenant_id: "t1".into(),
            name: "Spring promo".into(),
            store_id: None,
            routing_mode: RoutingMode::Manual,
            workflow_id: None,
            fallback_pipeline_id1: Some("p-fallback".into()),
            fallback_pipeline_id2: None,
            manual_pipeline_id1: None,
            manual_pipeline_id2: None,
            default_pipeline_id: None,
            notify_user_ids: vec!["sales-lead".into()],
        })
        .await;
    let step = Step::new("intake", ExecutorId::CampaignLeadIntake)
        .with_config(json!({"campaignId": "c1"}));

    let result = registry.execute(&step, &InputData::new(), &context()).await;

    assert!(!result.success);
    assert_eq!(result.error_code(), Some(ErrorCode::NoManualPipeline));
    assert_eq!(
        result.message,
        "Manual routing mode requires at least one manual pipeline configured"
    );
    assert!(mem.delivered_notifications().await.is_empty());
}

// ============================================================================
// Definition-time validation
// ============================================================================

#[test]
fn test_definition_time_validation_catches_bad_configs() {
    let bad = [
        Step::new("a", ExecutorId::EvaluateCondition).with_config(json!({"condition": "amount is big"})),
        Step::new("b", ExecutorId::DealWebhookTrigger).with_config(json!({"url": "ftp://x"})),
        Step::new("c", ExecutorId::ParallelFork).with_config(json!({"branches": []})),
        Step::new("d", ExecutorId::AiFunnelOrchestrator)
            .with_config(json!({"funnelId": "f1", "autoAssignThreshold": 120})),
    ];
    for step in &bad {
        assert!(
            ExecutorRegistry::validate_step(step).is_err(),
            "step {} should be rejected",
            step.id
        );
    }

    let good = Step::new("e", ExecutorId::EvaluateCondition)
        .with_config(json!({"condition": "amount >= 5000", "truePath": "review"}));
    assert!(ExecutorRegistry::validate_step(&good).is_ok());
}
