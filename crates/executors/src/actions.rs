// Action executors: single-effect steps
//
// - send_email / send_notification: the notification IS the step's effect,
//   so they deliver inline and fail with DELIVERY_FAILED (retryable)
// - request_approval: scope-checks the approver, then notifies best-effort
// - auto_approval: declarative amount / role / business-hours rules
// - connector_action: stored credentials + one named tool call

use async_trait::async_trait;
use chrono::{Datelike, Timelike, Weekday};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use stepwise_core::conditions::as_number;
use stepwise_core::{
    validate_user_scope, ActionExecutionResult, ConnectorCallContext, ErrorCode, ExecutionContext,
    ExecutorId, InputData, Notification, NotificationPriority, Runtime, Step,
};

use crate::executor::{
    input_str, parse_config, render_template, settle, system_clock, Clock, Executor, StepConfig,
    StepOutcome, UpstreamExt,
};

fn default_notification_type() -> String {
    "workflow".to_string()
}

fn non_blank(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    Ok(())
}

// ============================================================================
// send_email
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailConfig {
    /// Recipient address (templated); falls back to input `to` / `email`
    #[serde(default)]
    pub to: Option<String>,
    pub subject: String,
    pub message: String,
    #[serde(default = "default_notification_type")]
    pub notification_type: String,
    #[serde(default)]
    pub priority: NotificationPriority,
}

impl StepConfig for SendEmailConfig {
    fn validate(&self) -> Result<(), String> {
        non_blank("subject", &self.subject)
    }
}

pub struct SendEmailExecutor {
    runtime: Runtime,
}

impl SendEmailExecutor {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    async fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: SendEmailConfig = parse_config(step)?;

        let recipient = config
            .to
            .as_deref()
            .map(|t| render_template(t, input, context))
            .filter(|r| !r.trim().is_empty())
            .or_else(|| input_str(input, "to").map(String::from))
            .or_else(|| input_str(input, "email").map(String::from))
            .ok_or_else(|| ActionExecutionResult::validation_error("Email recipient is required"))?;

        if !recipient.contains('@') {
            return Err(ActionExecutionResult::validation_error(format!(
                "Invalid email recipient: {}",
                recipient
            )));
        }

        let notification = Notification::email(
            &context.tenant_id,
            recipient.trim(),
            render_template(&config.subject, input, context),
            render_template(&config.message, input, context),
        )
        .with_type(config.notification_type)
        .with_priority(config.priority)
        .with_metadata(json!({ "instanceId": context.instance_id, "stepId": step.id }));

        self.runtime
            .notifications
            .send_email_notification(&notification)
            .await
            .or_fail(
                self.runtime.logger.as_ref(),
                ErrorCode::DeliveryFailed,
                "Failed to send email",
            )?;

        Ok(ActionExecutionResult::success(format!("Email sent to {}", notification.recipient))
            .with_field("recipient", notification.recipient.clone())
            .with_field("subject", notification.title.clone()))
    }
}

#[async_trait]
impl Executor for SendEmailExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::SendEmail
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
// send_notification
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationConfig {
    /// Target user (templated); falls back to input `userId`, then the current assignee
    #[serde(default)]
    pub user_id: Option<String>,
    pub title: String,
    pub message: String,
    #[serde(default = "default_notification_type")]
    pub notification_type: String,
    #[serde(default)]
    pub priority: NotificationPriority,
}

impl StepConfig for SendNotificationConfig {
    fn validate(&self) -> Result<(), String> {
        non_blank("title", &self.title)
    }
}

pub struct SendNotificationExecutor {
    runtime: Runtime,
}

impl SendNotificationExecutor {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    async fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: SendNotificationConfig = parse_config(step)?;

        let user_id = config
            .user_id
            .as_deref()
            .map(|t| render_template(t, input, context))
            .filter(|u| !u.trim().is_empty())
            .or_else(|| input_str(input, "userId").map(String::from))
            .or_else(|| context.current_assignee_id.clone())
            .ok_or_else(|| {
                ActionExecutionResult::validation_error("Notification recipient is required")
            })?;

        let notification = Notification::in_app(
            &context.tenant_id,
            user_id,
            render_template(&config.title, input, context),
            render_template(&config.message, input, context),
        )
        .with_type(config.notification_type)
        .with_priority(config.priority)
        .with_metadata(json!({ "instanceId": context.instance_id, "stepId": step.id }));

        self.runtime
            .notifications
            .send_notification(&notification)
            .await
            .or_fail(
                self.runtime.logger.as_ref(),
                ErrorCode::DeliveryFailed,
                "Failed to send notification",
            )?;

        Ok(
            ActionExecutionResult::success(format!("Notification sent to {}", notification.recipient))
                .with_field("userId", notification.recipient.clone()),
        )
    }
}

#[async_trait]
impl Executor for SendNotificationExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::SendNotification
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
// request_approval
// ============================================================================

fn default_approval_title() -> String {
    "Approval requested".to_string()
}

fn default_approval_message() -> String {
    "A workflow step is waiting for your approval.".to_string()
}

fn default_high_priority() -> NotificationPriority {
    NotificationPriority::High
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestApprovalConfig {
    /// Approver; defaults to the current assignee
    #[serde(default)]
    pub approver_id: Option<String>,
    #[serde(default = "default_approval_title")]
    pub title: String,
    #[serde(default = "default_approval_message")]
    pub message: String,
    #[serde(default = "default_high_priority")]
    pub priority: NotificationPriority,
}

impl StepConfig for RequestApprovalConfig {}

pub struct RequestApprovalExecutor {
    runtime: Runtime,
}

impl RequestApprovalExecutor {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    async fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: RequestApprovalConfig = parse_config(step)?;
        let logger = self.runtime.logger.as_ref();

        let approver = config
            .approver_id
            .clone()
            .or_else(|| context.current_assignee_id.clone())
            .ok_or_else(|| ActionExecutionResult::validation_error("Approver is required"))?;

        // A denied scope is a hard failure: the request must not reach the approver
        let scope = validate_user_scope(
            self.runtime.database.as_ref(),
            &approver,
            &context.tenant_id,
            context.store_id.as_deref(),
            context.legal_entity_id.as_deref(),
        )
        .await
        .or_fail(logger, ErrorCode::DatabaseError, "Failed to verify approver scope")?;

        if !scope.has_access {
            logger.warn(
                "Approval request denied by scope check",
                Some(&json!({ "approverId": approver, "reason": scope.reason })),
            );
            return Err(ActionExecutionResult::failure(format!(
                "Approver lacks scope access: {}",
                scope.reason_or_default()
            ))
            .with_error(ErrorCode::ScopeAccessDenied));
        }

        self.runtime.dispatcher.dispatch(
            Notification::in_app(
                &context.tenant_id,
                &approver,
                render_template(&config.title, input, context),
                render_template(&config.message, input, context),
            )
            .with_type("approval_request")
            .with_priority(config.priority)
            .with_metadata(json!({
                "instanceId": context.instance_id,
                "stepId": step.id,
                "requesterId": context.requester_id,
            })),
        );

        Ok(ActionExecutionResult::success(format!("Approval requested from {}", approver))
            .with_decision("pending")
            .with_field("approverId", approver)
            .with_field("status", "pending")
            .with_field("grantedBy", json!(scope.granted_by)))
    }
}

#[async_trait]
impl Executor for RequestApprovalExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::RequestApproval
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
// auto_approval
// ============================================================================

/// Window (UTC hours, end exclusive) in which automatic approval is allowed
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessHours {
    pub start_hour: u32,
    pub end_hour: u32,
    #[serde(default)]
    pub weekdays_only: bool,
}

fn default_amount_field() -> String {
    "amount".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoApprovalConfig {
    #[serde(default)]
    pub max_amount: Option<f64>,
    /// Input field holding the amount
    #[serde(default = "default_amount_field")]
    pub amount_field: String,
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    #[serde(default)]
    pub business_hours: Option<BusinessHours>,
    #[serde(default)]
    pub approve_path: Option<String>,
    #[serde(default)]
    pub reject_path: Option<String>,
    #[serde(default)]
    pub escalate_path: Option<String>,
}

impl StepConfig for AutoApprovalConfig {
    fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_amount {
            if max < 0.0 {
                return Err("maxAmount must not be negative".into());
            }
        }
        if let Some(hours) = &self.business_hours {
            if hours.start_hour >= hours.end_hour || hours.end_hour > 24 {
                return Err("businessHours must satisfy startHour < endHour <= 24".into());
            }
        }
        Ok(())
    }
}

enum Verdict {
    Approve,
    Reject(String),
    Escalate(String),
}

pub struct AutoApprovalExecutor {
    runtime: Runtime,
    clock: Clock,
}

impl AutoApprovalExecutor {
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

    /// Rules run in order: amount, role, business hours. The first failing one decides.
    fn evaluate(
        &self,
        config: &AutoApprovalConfig,
        input: &InputData,
        context: &ExecutionContext,
    ) -> Verdict {
        if let Some(max) = config.max_amount {
            let amount = match input.get(&config.amount_field) {
                None | Some(Value::Null) => {
                    return Verdict::Escalate(format!("Amount field '{}' missing", config.amount_field))
                }
                Some(raw) => match as_number(raw) {
                    Some(amount) => amount,
                    None => {
                        return Verdict::Escalate(format!(
                            "Amount field '{}' is not numeric",
                            config.amount_field
                        ))
                    }
                },
            };
            if amount > max {
                return Verdict::Reject(format!("Amount {} exceeds maximum {}", amount, max));
            }
        }

        if !config.allowed_roles.is_empty() {
            let role = context
                .requester_role
                .as_deref()
                .or_else(|| input_str(input, "requesterRole"));
            match role {
                Some(role)
                    if config
                        .allowed_roles
                        .iter()
                        .any(|allowed| allowed.eq_ignore_ascii_case(role)) => {}
                Some(role) => {
                    return Verdict::Reject(format!("Role '{}' is not allowed to auto-approve", role))
                }
                None => return Verdict::Reject("Requester role is unknown".to_string()),
            }
        }

        if let Some(hours) = &config.business_hours {
            let now = (self.clock)();
            let weekend = matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
            if (hours.weekdays_only && weekend)
                || now.hour() < hours.start_hour
                || now.hour() >= hours.end_hour
            {
                return Verdict::Reject(format!(
                    "Outside business hours ({:02}:00-{:02}:00 UTC)",
                    hours.start_hour, hours.end_hour
                ));
            }
        }

        Verdict::Approve
    }

    async fn run(&self, step: &Step, input: &InputData, context: &ExecutionContext) -> StepOutcome {
        let config: AutoApprovalConfig = parse_config(step)?;

        let result = match self.evaluate(&config, input, context) {
            Verdict::Approve => ActionExecutionResult::success("Automatically approved")
                .with_decision("approve")
                .with_field("autoApproved", true)
                .with_optional_next_action(config.approve_path),
            Verdict::Reject(reason) => ActionExecutionResult::success(format!("Rejected: {}", reason))
                .with_decision("reject")
                .with_field("autoApproved", false)
                .with_field("reason", reason)
                .with_optional_next_action(config.reject_path),
            // Could not evaluate: hand over to a human instead of halting the instance
            Verdict::Escalate(reason) => {
                self.runtime.logger.warn(
                    "Auto-approval could not evaluate rules, escalating",
                    Some(&json!({ "stepId": step.id, "reason": reason })),
                );
                ActionExecutionResult::success(format!("Escalated: {}", reason))
                    .with_decision("escalate")
                    .with_field("autoApproved", false)
                    .with_field("reason", reason)
                    .with_optional_next_action(config.escalate_path)
            }
        };
        Ok(result)
    }
}

#[async_trait]
impl Executor for AutoApprovalExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::AutoApproval
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
// connector_action
// ============================================================================

fn default_output_key() -> String {
    "result".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorActionConfig {
    pub service: String,
    pub tool: String,
    /// Tool arguments; string values are templated. Input `arguments` entries win.
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// User whose credentials are used; defaults to the requester
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_output_key")]
    pub output_key: String,
}

impl StepConfig for ConnectorActionConfig {
    fn validate(&self) -> Result<(), String> {
        non_blank("service", &self.service)?;
        non_blank("tool", &self.tool)
    }
}

pub struct ConnectorActionExecutor {
    runtime: Runtime,
    clock: Clock,
}

impl ConnectorActionExecutor {
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
        let config: ConnectorActionConfig = parse_config(step)?;
        let logger = self.runtime.logger.as_ref();
        let user_id = config
            .user_id
            .clone()
            .unwrap_or_else(|| context.requester_id.clone());

        let credentials = self
            .runtime
            .external_connector
            .get_credentials(&user_id, &config.service)
            .await
            .or_fail(logger, ErrorCode::ConnectorError, "Failed to load connector credentials")?;

        match credentials {
            None => {
                return Err(ActionExecutionResult::failure(format!(
                    "No {} connection found for user {}",
                    config.service, user_id
                ))
                .with_error(ErrorCode::ConnectorError))
            }
            Some(creds) if creds.is_expired((self.clock)()) => {
                return Err(ActionExecutionResult::failure(format!(
                    "{} connection for user {} has expired",
                    config.service, user_id
                ))
                .with_error(ErrorCode::ConnectorError))
            }
            Some(_) => {}
        }

        let mut arguments: Map<String, Value> = config
            .arguments
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => Value::String(render_template(s, input, context)),
                    other => other.clone(),
                };
                (k.clone(), v)
            })
            .collect();
        if let Some(Value::Object(overrides)) = input.get("arguments") {
            arguments.extend(overrides.clone());
        }

        let call_context = ConnectorCallContext {
            tenant_id: context.tenant_id.clone(),
            user_id: user_id.clone(),
            instance_id: context.instance_id.clone(),
        };
        let output = self
            .runtime
            .external_connector
            .call_tool(&config.service, &config.tool, Value::Object(arguments), &call_context)
            .await
            .or_fail(
                logger,
                ErrorCode::ConnectorError,
                &format!("{} tool {} failed", config.service, config.tool),
            )?;

        Ok(ActionExecutionResult::success(format!(
            "{} tool {} completed",
            config.service, config.tool
        ))
        .with_field("service", config.service)
        .with_field("tool", config.tool)
        .with_field(config.output_key, output))
    }
}

#[async_trait]
impl Executor for ConnectorActionExecutor {
    fn id(&self) -> ExecutorId {
        ExecutorId::ConnectorAction
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
