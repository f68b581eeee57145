// In-memory implementations for examples and testing
//
// Every runtime capability has a recording/scripted implementation here:
// - InMemoryDatabase: seedable tenant-scoped records, mutation log, fault injection
// - RecordingNotifier: captures delivered notifications, optional failure mode
// - ScriptedAi: replays queued responses and records prompts
// - StaticConnector: fixed credentials and tool results
// - RecordingWebhookClient: scripted statuses/failures with call timestamps
// - RecordingExitHooks / RecordingLogger: capture side-channel calls
//
// InMemoryRuntime wires all of them into a Runtime and keeps typed handles
// so tests can seed data and inspect effects.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::entities::{
    Campaign, Deal, DealClosure, DealStatus, LegalEntity, Pipeline, Store, Team, UserAssignment,
};
use crate::error::{Result, RuntimeError};
use crate::notify::NotificationDispatcher;
use crate::runtime::Runtime;
use crate::traits::{
    AiProvider, AiRequestContext, AiResponse, AiSettings, ConnectorCallContext,
    ConnectorCredentials, Database, ExternalConnector, FunnelExitHooks, LogLevel, Logger,
    Notification, Notifier, WebhookClient, WebhookRequest,
};

type TenantKey = (String, String);

fn key(tenant_id: &str, id: &str) -> TenantKey {
    (tenant_id.to_string(), id.to_string())
}

// ============================================================================
// InMemoryDatabase
// ============================================================================

#[derive(Debug, Default)]
struct DbState {
    assignments: HashMap<TenantKey, Vec<UserAssignment>>,
    stores: HashMap<TenantKey, Store>,
    legal_entities: HashMap<TenantKey, LegalEntity>,
    teams: HashMap<TenantKey, Team>,
    campaigns: HashMap<TenantKey, Campaign>,
    pipelines: HashMap<TenantKey, Pipeline>,
    deals: HashMap<TenantKey, Deal>,
    closures: HashMap<String, DealClosure>,
    query_results: HashMap<String, Vec<Value>>,
    queries: Vec<(String, Vec<Value>)>,
    mutations: Vec<String>,
    store_lookups: usize,
    fail_next: Option<String>,
}

impl DbState {
    fn check_failure(&mut self) -> Result<()> {
        match self.fail_next.take() {
            Some(msg) => Err(RuntimeError::database(msg)),
            None => Ok(()),
        }
    }
}

/// Tenant-scoped in-memory database
#[derive(Debug, Default, Clone)]
pub struct InMemoryDatabase {
    state: Arc<RwLock<DbState>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_assignment(&self, tenant_id: &str, assignment: UserAssignment) {
        self.state
            .write()
            .await
            .assignments
            .entry(key(tenant_id, &assignment.user_id))
            .or_default()
            .push(assignment);
    }

    pub async fn insert_store(&self, store: Store) {
        let k = key(&store.tenant_id, &store.id);
        self.state.write().await.stores.insert(k, store);
    }

    pub async fn insert_legal_entity(&self, entity: LegalEntity) {
        let k = key(&entity.tenant_id, &entity.id);
        self.state.write().await.legal_entities.insert(k, entity);
    }

    pub async fn insert_team(&self, tenant_id: &str, team: Team) {
        let k = key(tenant_id, &team.department_id);
        self.state.write().await.teams.insert(k, team);
    }

    pub async fn insert_campaign(&self, campaign: Campaign) {
        let k = key(&campaign.tenant_id, &campaign.id);
        self.state.write().await.campaigns.insert(k, campaign);
    }

    pub async fn insert_pipeline(&self, pipeline: Pipeline) {
        let k = key(&pipeline.tenant_id, &pipeline.id);
        self.state.write().await.pipelines.insert(k, pipeline);
    }

    pub async fn insert_deal(&self, deal: Deal) {
        let k = key(&deal.tenant_id, &deal.id);
        self.state.write().await.deals.insert(k, deal);
    }

    /// Rows returned by `query` for this exact SQL string
    pub async fn set_query_result(&self, sql: impl Into<String>, rows: Vec<Value>) {
        self.state
            .write()
            .await
            .query_results
            .insert(sql.into(), rows);
    }

    /// Make the next call (of any kind) fail with a database error
    pub async fn fail_next(&self, message: impl Into<String>) {
        self.state.write().await.fail_next = Some(message.into());
    }

    /// Current snapshot of a deal
    pub async fn deal(&self, tenant_id: &str, deal_id: &str) -> Option<Deal> {
        self.state
            .read()
            .await
            .deals
            .get(&key(tenant_id, deal_id))
            .cloned()
    }

    /// Closure recorded for a deal
    pub async fn closure(&self, deal_id: &str) -> Option<DealClosure> {
        self.state.read().await.closures.get(deal_id).cloned()
    }

    /// Human-readable log of every write, in order
    pub async fn mutations(&self) -> Vec<String> {
        self.state.read().await.mutations.clone()
    }

    pub async fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.state.read().await.queries.clone()
    }

    /// Number of `get_store` calls served so far
    pub async fn store_lookups(&self) -> usize {
        self.state.read().await.store_lookups
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn get_user_assignments(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<UserAssignment>> {
        let mut state = self.state.write().await;
        state.check_failure()?;
        Ok(state
            .assignments
            .get(&key(tenant_id, user_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_store(&self, tenant_id: &str, store_id: &str) -> Result<Option<Store>> {
        let mut state = self.state.write().await;
        state.check_failure()?;
        state.store_lookups += 1;
        Ok(state.stores.get(&key(tenant_id, store_id)).cloned())
    }

    async fn get_legal_entity(
        &self,
        tenant_id: &str,
        legal_entity_id: &str,
    ) -> Result<Option<LegalEntity>> {
        let mut state = self.state.write().await;
        state.check_failure()?;
        Ok(state
            .legal_entities
            .get(&key(tenant_id, legal_entity_id))
            .cloned())
    }

    async fn find_team_by_department(
        &self,
        tenant_id: &str,
        department_id: &str,
    ) -> Result<Option<Team>> {
        let mut state = self.state.write().await;
        state.check_failure()?;
        Ok(state.teams.get(&key(tenant_id, department_id)).cloned())
    }

    async fn get_campaign(&self, tenant_id: &str, campaign_id: &str) -> Result<Option<Campaign>> {
        let mut state = self.state.write().await;
        state.check_failure()?;
        Ok(state.campaigns.get(&key(tenant_id, campaign_id)).cloned())
    }

    async fn get_pipeline(&self, tenant_id: &str, pipeline_id: &str) -> Result<Option<Pipeline>> {
        let mut state = self.state.write().await;
        state.check_failure()?;
        Ok(state.pipelines.get(&key(tenant_id, pipeline_id)).cloned())
    }

    async fn get_funnel_pipelines(
        &self,
        tenant_id: &str,
        funnel_id: &str,
    ) -> Result<Vec<Pipeline>> {
        let mut state = self.state.write().await;
        state.check_failure()?;
        let mut pipelines: Vec<Pipeline> = state
            .pipelines
            .iter()
            .filter(|((tenant, _), p)| {
                tenant == tenant_id && p.funnel_id.as_deref() == Some(funnel_id)
            })
            .map(|(_, p)| p.clone())
            .collect();
        pipelines.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pipelines)
    }

    async fn get_deal(&self, tenant_id: &str, deal_id: &str) -> Result<Option<Deal>> {
        let mut state = self.state.write().await;
        state.check_failure()?;
        Ok(state.deals.get(&key(tenant_id, deal_id)).cloned())
    }

    async fn update_deal_stage(
        &self,
        tenant_id: &str,
        deal_id: &str,
        stage_id: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_failure()?;
        let deal = state
            .deals
            .get_mut(&key(tenant_id, deal_id))
            .ok_or_else(|| RuntimeError::database(format!("deal {} not found", deal_id)))?;
        deal.stage_id = stage_id.to_string();
        deal.stage_entered_at = Some(Utc::now());
        state
            .mutations
            .push(format!("update_deal_stage:{}:{}", deal_id, stage_id));
        Ok(())
    }

    async fn move_deal_to_pipeline(
        &self,
        tenant_id: &str,
        deal_id: &str,
        pipeline_id: &str,
        stage_id: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_failure()?;
        let deal = state
            .deals
            .get_mut(&key(tenant_id, deal_id))
            .ok_or_else(|| RuntimeError::database(format!("deal {} not found", deal_id)))?;
        deal.pipeline_id = pipeline_id.to_string();
        if let Some(stage_id) = stage_id {
            deal.stage_id = stage_id.to_string();
            deal.stage_entered_at = Some(Utc::now());
        }
        state.mutations.push(format!(
            "move_deal_to_pipeline:{}:{}:{}",
            deal_id,
            pipeline_id,
            stage_id.unwrap_or("-")
        ));
        Ok(())
    }

    async fn close_deal(
        &self,
        tenant_id: &str,
        deal_id: &str,
        closure: &DealClosure,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_failure()?;
        let deal = state
            .deals
            .get_mut(&key(tenant_id, deal_id))
            .ok_or_else(|| RuntimeError::database(format!("deal {} not found", deal_id)))?;
        deal.status = closure.status;
        state
            .closures
            .insert(deal_id.to_string(), closure.clone());
        state.mutations.push(format!(
            "close_deal:{}:{}",
            deal_id,
            closure.status.as_str()
        ));
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>> {
        let mut state = self.state.write().await;
        state.check_failure()?;
        state.queries.push((sql.to_string(), params.to_vec()));
        Ok(state.query_results.get(sql).cloned().unwrap_or_default())
    }
}

// ============================================================================
// RecordingNotifier
// ============================================================================

/// Notifier that records deliveries; can be switched into a failing mode
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<Notification>>>,
    failing: Arc<RwLock<bool>>,
    failures: Arc<RwLock<usize>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_failing(&self, failing: bool) {
        *self.failing.write().await = failing;
    }

    /// Successfully delivered notifications, in delivery order
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    /// Number of rejected deliveries
    pub async fn failures(&self) -> usize {
        *self.failures.read().await
    }

    async fn record(&self, notification: &Notification) -> Result<()> {
        if *self.failing.read().await {
            *self.failures.write().await += 1;
            return Err(RuntimeError::notification(format!(
                "delivery to {} rejected",
                notification.recipient
            )));
        }
        self.sent.write().await.push(notification.clone());
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification(&self, notification: &Notification) -> Result<()> {
        self.record(notification).await
    }

    async fn send_email_notification(&self, notification: &Notification) -> Result<()> {
        self.record(notification).await
    }
}

// ============================================================================
// ScriptedAi
// ============================================================================

/// One recorded AI call
#[derive(Debug, Clone)]
pub struct AiCall {
    pub prompt: String,
    pub settings: AiSettings,
    pub context: AiRequestContext,
}

/// AI provider that replays queued responses in order.
///
/// An empty queue answers with an AI error.
#[derive(Debug, Default, Clone)]
pub struct ScriptedAi {
    script: Arc<RwLock<VecDeque<std::result::Result<AiResponse, String>>>>,
    calls: Arc<RwLock<Vec<AiCall>>>,
}

impl ScriptedAi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful text response
    pub async fn push_text(&self, output: impl Into<String>) {
        self.push_response(AiResponse {
            success: true,
            output: Some(output.into()),
            tokens_used: Some(0),
            cost: Some(0.0),
        })
        .await;
    }

    pub async fn push_response(&self, response: AiResponse) {
        self.script.write().await.push_back(Ok(response));
    }

    /// Queue a provider error
    pub async fn push_error(&self, message: impl Into<String>) {
        self.script.write().await.push_back(Err(message.into()));
    }

    pub async fn calls(&self) -> Vec<AiCall> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl AiProvider for ScriptedAi {
    async fn create_unified_response(
        &self,
        prompt: &str,
        settings: &AiSettings,
        context: &AiRequestContext,
    ) -> Result<AiResponse> {
        self.calls.write().await.push(AiCall {
            prompt: prompt.to_string(),
            settings: settings.clone(),
            context: context.clone(),
        });
        match self.script.write().await.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(RuntimeError::ai(message)),
            None => Err(RuntimeError::ai("no scripted response")),
        }
    }
}

// ============================================================================
// StaticConnector
// ============================================================================

/// One recorded connector tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub service: String,
    pub tool: String,
    pub arguments: Value,
    pub context: ConnectorCallContext,
}

/// Connector with fixed credentials and tool results.
///
/// Tools without a configured result echo their arguments back.
#[derive(Debug, Default, Clone)]
pub struct StaticConnector {
    credentials: Arc<RwLock<HashMap<TenantKey, ConnectorCredentials>>>,
    results: Arc<RwLock<HashMap<TenantKey, std::result::Result<Value, String>>>>,
    calls: Arc<RwLock<Vec<ToolCallRecord>>>,
}

impl StaticConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_credentials(&self, user_id: &str, credentials: ConnectorCredentials) {
        let k = key(user_id, &credentials.service);
        self.credentials.write().await.insert(k, credentials);
    }

    pub async fn set_tool_result(&self, service: &str, tool: &str, result: Value) {
        self.results
            .write()
            .await
            .insert(key(service, tool), Ok(result));
    }

    pub async fn set_tool_error(&self, service: &str, tool: &str, message: impl Into<String>) {
        self.results
            .write()
            .await
            .insert(key(service, tool), Err(message.into()));
    }

    pub async fn calls(&self) -> Vec<ToolCallRecord> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl ExternalConnector for StaticConnector {
    async fn get_credentials(
        &self,
        user_id: &str,
        service: &str,
    ) -> Result<Option<ConnectorCredentials>> {
        Ok(self
            .credentials
            .read()
            .await
            .get(&key(user_id, service))
            .cloned())
    }

    async fn call_tool(
        &self,
        service: &str,
        tool: &str,
        arguments: Value,
        context: &ConnectorCallContext,
    ) -> Result<Value> {
        self.calls.write().await.push(ToolCallRecord {
            service: service.to_string(),
            tool: tool.to_string(),
            arguments: arguments.clone(),
            context: context.clone(),
        });
        match self.results.read().await.get(&key(service, tool)) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(message)) => Err(RuntimeError::connector(message.clone())),
            None => Ok(json!({ "echo": arguments })),
        }
    }
}

// ============================================================================
// RecordingWebhookClient
// ============================================================================

/// One recorded webhook attempt
#[derive(Debug, Clone)]
pub struct WebhookAttempt {
    pub request: WebhookRequest,
    /// tokio clock reading at the time of the call (pausable in tests)
    pub at: Instant,
}

/// Webhook client with scripted outcomes.
///
/// Scripted outcomes are consumed first; afterwards every call succeeds with
/// 200 unless `fail_always` was set.
#[derive(Debug, Default, Clone)]
pub struct RecordingWebhookClient {
    script: Arc<RwLock<VecDeque<std::result::Result<u16, String>>>>,
    always_fail: Arc<RwLock<Option<String>>>,
    attempts: Arc<RwLock<Vec<WebhookAttempt>>>,
}

impl RecordingWebhookClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls
    pub async fn fail_times(&self, times: usize, message: impl Into<String>) {
        let message = message.into();
        let mut script = self.script.write().await;
        for _ in 0..times {
            script.push_back(Err(message.clone()));
        }
    }

    /// Fail every call after the script is exhausted
    pub async fn fail_always(&self, message: impl Into<String>) {
        *self.always_fail.write().await = Some(message.into());
    }

    pub async fn attempts(&self) -> Vec<WebhookAttempt> {
        self.attempts.read().await.clone()
    }
}

#[async_trait]
impl WebhookClient for RecordingWebhookClient {
    async fn post_json(&self, request: &WebhookRequest) -> Result<u16> {
        self.attempts.write().await.push(WebhookAttempt {
            request: request.clone(),
            at: Instant::now(),
        });
        if let Some(outcome) = self.script.write().await.pop_front() {
            return outcome.map_err(RuntimeError::http);
        }
        match self.always_fail.read().await.as_ref() {
            Some(message) => Err(RuntimeError::http(message.clone())),
            None => Ok(200),
        }
    }
}

// ============================================================================
// RecordingExitHooks / RecordingLogger
// ============================================================================

/// Exit hooks that record `hook:deal_id` entries
#[derive(Debug, Default, Clone)]
pub struct RecordingExitHooks {
    calls: Arc<RwLock<Vec<String>>>,
}

impl RecordingExitHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl FunnelExitHooks for RecordingExitHooks {
    async fn create_customer_record(&self, deal: &Deal, _context: &ExecutionContext) -> Result<()> {
        self.calls
            .write()
            .await
            .push(format!("create_customer_record:{}", deal.id));
        Ok(())
    }

    async fn trigger_retention_workflow(
        &self,
        deal: &Deal,
        _context: &ExecutionContext,
    ) -> Result<()> {
        self.calls
            .write()
            .await
            .push(format!("trigger_retention_workflow:{}", deal.id));
        Ok(())
    }

    async fn emit_analytics_event(
        &self,
        deal: &Deal,
        outcome: DealStatus,
        _context: &ExecutionContext,
    ) -> Result<()> {
        self.calls.write().await.push(format!(
            "emit_analytics_event:{}:{}",
            deal.id,
            outcome.as_str()
        ));
        Ok(())
    }
}

/// Logger that keeps every entry and also forwards to `tracing`
#[derive(Debug, Default, Clone)]
pub struct RecordingLogger {
    entries: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Messages logged at `level`
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }
}

impl Logger for RecordingLogger {
    fn log(&self, level: LogLevel, message: &str, meta: Option<&Value>) {
        crate::traits::TracingLogger.log(level, message, meta);
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.push((level, message.to_string()));
    }
}

// ============================================================================
// InMemoryRuntime
// ============================================================================

/// A Runtime wired to the in-memory capabilities, with typed handles to each
#[derive(Debug, Clone)]
pub struct InMemoryRuntime {
    pub runtime: Runtime,
    pub database: Arc<InMemoryDatabase>,
    pub notifier: Arc<RecordingNotifier>,
    pub ai: Arc<ScriptedAi>,
    pub connector: Arc<StaticConnector>,
    pub webhooks: Arc<RecordingWebhookClient>,
    pub hooks: Arc<RecordingExitHooks>,
    pub logger: Arc<RecordingLogger>,
}

impl InMemoryRuntime {
    /// Panics outside a tokio runtime (spawns the notification worker)
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let database = Arc::new(InMemoryDatabase::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let ai = Arc::new(ScriptedAi::new());
        let connector = Arc::new(StaticConnector::new());
        let webhooks = Arc::new(RecordingWebhookClient::new());
        let hooks = Arc::new(RecordingExitHooks::new());
        let logger = Arc::new(RecordingLogger::new());

        let dispatcher = NotificationDispatcher::spawn_on(
            &tokio::runtime::Handle::current(),
            notifier.clone(),
            logger.clone(),
            config.notification_queue_capacity,
        );

        let runtime = Runtime {
            logger: logger.clone(),
            notifications: notifier.clone(),
            ai: ai.clone(),
            external_connector: connector.clone(),
            database: database.clone(),
            webhooks: webhooks.clone(),
            exit_hooks: hooks.clone(),
            dispatcher,
            config,
        };

        Self {
            runtime,
            database,
            notifier,
            ai,
            connector,
            webhooks,
            hooks,
            logger,
        }
    }

    /// Wait for queued notifications, then return everything delivered so far
    pub async fn delivered_notifications(&self) -> Vec<Notification> {
        self.runtime.dispatcher.flush().await;
        self.notifier.sent().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Stage;

    fn pipeline(id: &str, funnel: Option<&str>) -> Pipeline {
        Pipeline {
            id: id.into(),
            tenant_id: "t1".into(),
            name: id.to_uppercase(),
            funnel_id: funnel.map(String::from),
            stages: vec![Stage {
                id: format!("{}-s1", id),
                name: "New".into(),
                position: 1,
            }],
        }
    }

    #[tokio::test]
    async fn test_lookups_are_tenant_scoped() {
        let db = InMemoryDatabase::new();
        db.insert_pipeline(pipeline("p1", None)).await;

        assert!(db.get_pipeline("t1", "p1").await.unwrap().is_some());
        assert!(db.get_pipeline("t2", "p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_funnel_pipelines_filtered_and_sorted() {
        let db = InMemoryDatabase::new();
        db.insert_pipeline(pipeline("p2", Some("f1"))).await;
        db.insert_pipeline(pipeline("p1", Some("f1"))).await;
        db.insert_pipeline(pipeline("p3", Some("f2"))).await;

        let ids: Vec<String> = db
            .get_funnel_pipelines("t1", "f1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_fail_next_only_fails_once() {
        let db = InMemoryDatabase::new();
        db.fail_next("boom").await;
        assert!(db.get_deal("t1", "d1").await.is_err());
        assert!(db.get_deal("t1", "d1").await.is_ok());
    }

    #[tokio::test]
    async fn test_scripted_ai_replays_in_order() {
        let ai = ScriptedAi::new();
        ai.push_text("first").await;
        ai.push_error("down").await;

        let ctx = AiRequestContext {
            agent_id: "a".into(),
            tenant_id: "t1".into(),
            user_id: "u1".into(),
            module_context: "test".into(),
            business_entity_id: None,
        };
        let settings = AiSettings::default();
        let first = ai.create_unified_response("p1", &settings, &ctx).await.unwrap();
        assert_eq!(first.text(), Some("first"));
        assert!(ai.create_unified_response("p2", &settings, &ctx).await.is_err());
        assert!(ai.create_unified_response("p3", &settings, &ctx).await.is_err());
        assert_eq!(ai.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_webhook_script_then_success() {
        let client = RecordingWebhookClient::new();
        client.fail_times(1, "refused").await;
        let request = WebhookRequest {
            url: "https://hooks.test/deal".into(),
            headers: Default::default(),
            body: json!({}),
        };
        assert!(client.post_json(&request).await.is_err());
        assert_eq!(client.post_json(&request).await.unwrap(), 200);
        assert_eq!(client.attempts().await.len(), 2);
    }
}
