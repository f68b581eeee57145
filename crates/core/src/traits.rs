// Runtime capability traits
//
// These traits are the only way executors reach the outside world:
// - Logger: structured log sink (TracingLogger forwards to `tracing`)
// - Notifier: in-app and email notification delivery
// - AiProvider: single-shot AI completion
// - ExternalConnector: stored credentials + named tool calls on third-party services
// - Database: typed scope/campaign/pipeline/deal accessors plus a raw query escape hatch
// - WebhookClient: outbound JSON POST for deal webhooks
// - FunnelExitHooks: extension seams fired when a deal leaves the funnel
//
// Hosts supply one implementation of each per application; in-memory
// implementations for tests live in `crate::memory`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::context::ExecutionContext;
use crate::entities::{
    Campaign, Deal, DealClosure, DealStatus, LegalEntity, Pipeline, Store, Team, UserAssignment,
};
use crate::error::Result;

// ============================================================================
// Logger
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured log sink injected into executors
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, meta: Option<&Value>);

    fn debug(&self, message: &str, meta: Option<&Value>) {
        self.log(LogLevel::Debug, message, meta);
    }

    fn info(&self, message: &str, meta: Option<&Value>) {
        self.log(LogLevel::Info, message, meta);
    }

    fn warn(&self, message: &str, meta: Option<&Value>) {
        self.log(LogLevel::Warn, message, meta);
    }

    fn error(&self, message: &str, meta: Option<&Value>) {
        self.log(LogLevel::Error, message, meta);
    }
}

/// Default logger: emits `tracing` events with the metadata rendered as a field
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, meta: Option<&Value>) {
        let meta = meta.map(Value::to_string).unwrap_or_default();
        match level {
            LogLevel::Debug => tracing::debug!(meta = %meta, "{}", message),
            LogLevel::Info => tracing::info!(meta = %meta, "{}", message),
            LogLevel::Warn => tracing::warn!(meta = %meta, "{}", message),
            LogLevel::Error => tracing::error!(meta = %meta, "{}", message),
        }
    }
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    InApp,
    Email,
}

/// A single notification addressed to a user id (in-app) or an address (email)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub channel: NotificationChannel,
    pub tenant_id: String,
    /// User id for in-app, email address for email
    pub recipient: String,
    /// Title (in-app) or subject (email)
    pub title: String,
    pub message: String,
    pub notification_type: String,
    pub priority: NotificationPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Notification {
    pub fn in_app(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            channel: NotificationChannel::InApp,
            tenant_id: tenant_id.into(),
            recipient: user_id.into(),
            title: title.into(),
            message: message.into(),
            notification_type: "workflow".to_string(),
            priority: NotificationPriority::Normal,
            metadata: None,
        }
    }

    pub fn email(
        tenant_id: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            channel: NotificationChannel::Email,
            ..Self::in_app(tenant_id, recipient, subject, message)
        }
    }

    pub fn with_type(mut self, notification_type: impl Into<String>) -> Self {
        self.notification_type = notification_type.into();
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an in-app notification
    async fn send_notification(&self, notification: &Notification) -> Result<()>;

    /// Deliver an email notification
    async fn send_email_notification(&self, notification: &Notification) -> Result<()>;

    /// Deliver on whichever channel the notification names
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        match notification.channel {
            NotificationChannel::InApp => self.send_notification(notification).await,
            NotificationChannel::Email => self.send_email_notification(notification).await,
        }
    }
}

// ============================================================================
// AiProvider
// ============================================================================

/// Per-call model settings; None falls back to the provider's defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Attribution for an AI call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiRequestContext {
    pub agent_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub module_context: String,
    #[serde(default)]
    pub business_entity_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponse {
    pub success: bool,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub tokens_used: Option<u32>,
    #[serde(default)]
    pub cost: Option<f64>,
}

impl AiResponse {
    /// Output text of a successful response; None for failures and empty outputs
    pub fn text(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.output.as_deref().filter(|s| !s.trim().is_empty())
    }
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn create_unified_response(
        &self,
        prompt: &str,
        settings: &AiSettings,
        context: &AiRequestContext,
    ) -> Result<AiResponse>;
}

// ============================================================================
// ExternalConnector
// ============================================================================

/// Stored credentials for a user's connection to a third-party service
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorCredentials {
    pub service: String,
    pub access_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ConnectorCredentials {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

impl fmt::Debug for ConnectorCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorCredentials")
            .field("service", &self.service)
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorCallContext {
    pub tenant_id: String,
    pub user_id: String,
    pub instance_id: String,
}

#[async_trait]
pub trait ExternalConnector: Send + Sync {
    /// Stored credentials for `user_id` on `service`, if any
    async fn get_credentials(
        &self,
        user_id: &str,
        service: &str,
    ) -> Result<Option<ConnectorCredentials>>;

    /// Invoke a named tool on a connected service
    async fn call_tool(
        &self,
        service: &str,
        tool: &str,
        arguments: Value,
        context: &ConnectorCallContext,
    ) -> Result<Value>;
}

// ============================================================================
// Database
// ============================================================================

/// Data access supplied by the host. All lookups are tenant-scoped.
#[async_trait]
pub trait Database: Send + Sync {
    async fn get_user_assignments(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<UserAssignment>>;

    async fn get_store(&self, tenant_id: &str, store_id: &str) -> Result<Option<Store>>;

    async fn get_legal_entity(
        &self,
        tenant_id: &str,
        legal_entity_id: &str,
    ) -> Result<Option<LegalEntity>>;

    async fn find_team_by_department(
        &self,
        tenant_id: &str,
        department_id: &str,
    ) -> Result<Option<Team>>;

    async fn get_campaign(&self, tenant_id: &str, campaign_id: &str) -> Result<Option<Campaign>>;

    async fn get_pipeline(&self, tenant_id: &str, pipeline_id: &str) -> Result<Option<Pipeline>>;

    async fn get_funnel_pipelines(&self, tenant_id: &str, funnel_id: &str)
        -> Result<Vec<Pipeline>>;

    async fn get_deal(&self, tenant_id: &str, deal_id: &str) -> Result<Option<Deal>>;

    async fn update_deal_stage(&self, tenant_id: &str, deal_id: &str, stage_id: &str)
        -> Result<()>;

    /// Move a deal to another pipeline; `stage_id = None` keeps the current stage
    async fn move_deal_to_pipeline(
        &self,
        tenant_id: &str,
        deal_id: &str,
        pipeline_id: &str,
        stage_id: Option<&str>,
    ) -> Result<()>;

    async fn close_deal(&self, tenant_id: &str, deal_id: &str, closure: &DealClosure)
        -> Result<()>;

    /// Parameterized escape hatch for host-specific reads
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>>;
}

// ============================================================================
// WebhookClient
// ============================================================================

/// A JSON POST to an external endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRequest {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

#[async_trait]
pub trait WebhookClient: Send + Sync {
    /// POST the body as JSON. Non-2xx responses are errors; returns the status code.
    async fn post_json(&self, request: &WebhookRequest) -> Result<u16>;
}

// ============================================================================
// FunnelExitHooks
// ============================================================================

/// Side channels fired after a deal is closed.
///
/// The default implementation only logs; hosts that own customer records,
/// retention workflows or analytics plug in here.
#[async_trait]
pub trait FunnelExitHooks: Send + Sync {
    async fn create_customer_record(&self, deal: &Deal, context: &ExecutionContext) -> Result<()>;

    async fn trigger_retention_workflow(&self, deal: &Deal, context: &ExecutionContext)
        -> Result<()>;

    async fn emit_analytics_event(
        &self,
        deal: &Deal,
        outcome: DealStatus,
        context: &ExecutionContext,
    ) -> Result<()>;
}

/// No-op hooks that record the call through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExitHooks;

#[async_trait]
impl FunnelExitHooks for LoggingExitHooks {
    async fn create_customer_record(&self, deal: &Deal, context: &ExecutionContext) -> Result<()> {
        tracing::info!(
            tenant_id = %context.tenant_id,
            deal_id = %deal.id,
            "Customer record creation requested (no hook installed)"
        );
        Ok(())
    }

    async fn trigger_retention_workflow(
        &self,
        deal: &Deal,
        context: &ExecutionContext,
    ) -> Result<()> {
        tracing::info!(
            tenant_id = %context.tenant_id,
            deal_id = %deal.id,
            "Retention workflow requested (no hook installed)"
        );
        Ok(())
    }

    async fn emit_analytics_event(
        &self,
        deal: &Deal,
        outcome: DealStatus,
        context: &ExecutionContext,
    ) -> Result<()> {
        tracing::info!(
            tenant_id = %context.tenant_id,
            deal_id = %deal.id,
            outcome = outcome.as_str(),
            "Funnel exit analytics event (no hook installed)"
        );
        Ok(())
    }
}
