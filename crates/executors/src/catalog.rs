// Executor metadata catalog
//
// Static description of every built-in executor: display info, category,
// config schema and the config keys a tenant override may change. Built once
// on first use and read-only afterwards. Holds no executor instances; see
// ExecutorRegistry for those.
//
// The schema is deliberately shallow. `validate_executor_config` only checks
// that required keys are present; full validation is the typed parse done by
// `ExecutorRegistry::validate_step`.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use stepwise_core::{ConfigError, ExecutorCategory, ExecutorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

/// One entry of an executor's config schema
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigField {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorMetadata {
    pub id: ExecutorId,
    pub display_name: &'static str,
    pub description: &'static str,
    pub category: ExecutorCategory,
    pub config_schema: Vec<ConfigField>,
    pub overridable_fields: Vec<&'static str>,
}

impl ExecutorMetadata {
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.config_schema
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
    }

    pub fn is_overridable(&self, field: &str) -> bool {
        self.overridable_fields.iter().any(|f| *f == field)
    }
}

// ============================================================================
// Catalog
// ============================================================================

static BUILTIN: LazyLock<ExecutorCatalog> = LazyLock::new(|| ExecutorCatalog {
    entries: ExecutorId::ALL.iter().map(|id| (*id, describe(*id))).collect(),
});

#[derive(Debug)]
pub struct ExecutorCatalog {
    entries: BTreeMap<ExecutorId, ExecutorMetadata>,
}

impl ExecutorCatalog {
    /// The catalog of all built-in executors
    pub fn builtin() -> &'static ExecutorCatalog {
        &BUILTIN
    }

    pub fn get(&self, id: ExecutorId) -> Option<&ExecutorMetadata> {
        self.entries.get(&id)
    }

    /// Look up by wire id, e.g. "send_email"
    pub fn get_by_name(&self, name: &str) -> Option<&ExecutorMetadata> {
        name.parse::<ExecutorId>().ok().and_then(|id| self.get(id))
    }

    /// All entries in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &ExecutorMetadata> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn by_category(&self, category: ExecutorCategory) -> Vec<&ExecutorMetadata> {
        self.iter().filter(|m| m.category == category).collect()
    }

    /// Check that every required field is present and non-null
    pub fn validate_executor_config(&self, id: ExecutorId, config: &Value) -> Result<(), ConfigError> {
        let Some(metadata) = self.get(id) else {
            return Ok(());
        };
        let missing: Vec<String> = metadata
            .required_fields()
            .filter(|name| config.get(*name).map_or(true, Value::is_null))
            .map(String::from)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingFields {
                executor: id.to_string(),
                fields: missing,
            })
        }
    }

    /// Shallow-merge tenant overrides onto a base config. Any key outside the
    /// executor's overridable set rejects the whole override.
    pub fn apply_tenant_overrides(
        &self,
        id: ExecutorId,
        base: &Value,
        overrides: &Map<String, Value>,
    ) -> Result<Value, ConfigError> {
        let metadata = self.get(id);
        if let Some(field) = overrides
            .keys()
            .find(|key| !metadata.is_some_and(|m| m.is_overridable(key)))
        {
            return Err(ConfigError::NotOverridable {
                executor: id.to_string(),
                field: field.clone(),
            });
        }

        let mut merged = base.as_object().cloned().unwrap_or_default();
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(merged))
    }
}

// ============================================================================
// Built-in metadata
// ============================================================================

fn required(name: &'static str, field_type: FieldType, description: &'static str) -> ConfigField {
    ConfigField {
        name,
        field_type,
        required: true,
        description,
    }
}

fn optional(name: &'static str, field_type: FieldType, description: &'static str) -> ConfigField {
    ConfigField {
        name,
        field_type,
        required: false,
        description,
    }
}

fn router_schema() -> Vec<ConfigField> {
    vec![
        required(
            "branches",
            FieldType::Array,
            "Ordered branches; the first whose conditions all hold wins",
        ),
        optional("defaultPath", FieldType::String, "Next step when no branch matches"),
    ]
}

fn ai_settings_schema() -> [ConfigField; 3] {
    [
        optional("model", FieldType::String, "Model override"),
        optional("maxTokens", FieldType::Number, "Completion token limit"),
        optional("temperature", FieldType::Number, "Sampling temperature"),
    ]
}

fn describe(id: ExecutorId) -> ExecutorMetadata {
    use FieldType::*;

    let (display_name, description, config_schema, overridable_fields): (
        &'static str,
        &'static str,
        Vec<ConfigField>,
        Vec<&'static str>,
    ) = match id {
        ExecutorId::SendEmail => (
            "Send Email",
            "Send an email notification",
            vec![
                optional("to", String, "Recipient address; falls back to input `to` or `email`"),
                required("subject", String, "Subject template"),
                required("message", String, "Body template"),
                optional("notificationType", String, "Notification type tag"),
                optional("priority", String, "low, normal, high or urgent"),
            ],
            vec!["subject", "message", "priority"],
        ),
        ExecutorId::SendNotification => (
            "Send Notification",
            "Send an in-app notification",
            vec![
                optional("userId", String, "Recipient; falls back to input or current assignee"),
                required("title", String, "Title template"),
                required("message", String, "Body template"),
                optional("notificationType", String, "Notification type tag"),
                optional("priority", String, "low, normal, high or urgent"),
            ],
            vec!["title", "message", "priority"],
        ),
        ExecutorId::RequestApproval => (
            "Request Approval",
            "Ask a user with scope over the requester to approve",
            vec![
                optional("approverId", String, "Approver; falls back to input or current assignee"),
                optional("title", String, "Notification title"),
                optional("message", String, "Notification body template"),
                optional("priority", String, "Notification priority"),
            ],
            vec!["approverId", "title", "message", "priority"],
        ),
        ExecutorId::AutoApproval => (
            "Auto Approval",
            "Approve or reject by amount, role and business hours; \
             escalate when the amount is missing or not numeric",
            vec![
                optional("maxAmount", Number, "Amounts above this are rejected"),
                optional("amountField", String, "Input field holding the amount"),
                optional("allowedRoles", Array, "Requester roles that may be auto-approved"),
                optional("businessHours", Object, "{startHour, endHour, weekdaysOnly}"),
                optional("approvePath", String, "Next step on approve"),
                optional("rejectPath", String, "Next step on reject"),
                optional("escalatePath", String, "Next step on escalate"),
            ],
            vec!["maxAmount", "allowedRoles", "businessHours"],
        ),
        ExecutorId::ConnectorAction => (
            "Connector Action",
            "Call a tool on an external service with the requester's credentials",
            vec![
                required("service", String, "Connected service name"),
                required("tool", String, "Tool to invoke"),
                optional("arguments", Object, "Tool arguments; string values are templates"),
                optional("userId", String, "Credential owner; defaults to the requester"),
                optional("outputKey", String, "Key the tool result is stored under"),
            ],
            vec!["arguments"],
        ),
        ExecutorId::EvaluateCondition => (
            "Evaluate Condition",
            "Evaluate a `field OP literal` expression",
            vec![
                required("condition", String, "Expression, e.g. amount > 1000"),
                optional("truePath", String, "Next step when true"),
                optional("falsePath", String, "Next step when false"),
            ],
            vec![],
        ),
        ExecutorId::AiDecision => (
            "AI Decision",
            "Ask an AI model to choose between decision options",
            [
                vec![
                    required("prompt", String, "Prompt template"),
                    optional("agentId", String, "Agent the call is attributed to"),
                    optional("options", Array, "Allowed decisions"),
                    optional("defaultDecision", String, "Decision when the model is unavailable"),
                    optional("paths", Object, "Decision to next step"),
                ],
                ai_settings_schema().to_vec(),
            ]
            .concat(),
            vec!["prompt", "model", "maxTokens", "temperature", "defaultDecision"],
        ),
        ExecutorId::FormTrigger => (
            "Form Trigger",
            "Start a workflow from a form submission",
            vec![
                optional("formId", String, "Only accept submissions of this form"),
                optional("requiredFields", Array, "Fields that must be non-blank"),
            ],
            vec!["requiredFields"],
        ),
        ExecutorId::TaskEventTrigger => (
            "Task Event Trigger",
            "Start a workflow from a task event",
            vec![
                optional("eventTypes", Array, "Accepted event types; empty accepts all"),
                optional("filters", Object, "Dotted path to required value"),
            ],
            vec!["eventTypes", "filters"],
        ),
        ExecutorId::LeadRouter => (
            "Lead Router",
            "Route a lead to the first matching branch",
            router_schema(),
            vec!["defaultPath"],
        ),
        ExecutorId::DealRouter => (
            "Deal Router",
            "Route a deal to the first matching branch",
            router_schema(),
            vec!["defaultPath"],
        ),
        ExecutorId::CustomerRouter => (
            "Customer Router",
            "Route a customer to the first matching branch",
            router_schema(),
            vec!["defaultPath"],
        ),
        ExecutorId::CampaignLeadIntake => (
            "Campaign Lead Intake",
            "Place a campaign lead into a pipeline and notify the campaign team",
            vec![optional("campaignId", String, "Campaign; falls back to input campaignId")],
            vec![],
        ),
        ExecutorId::PipelineAssignment => (
            "Pipeline Assignment",
            "Assign a lead to a pipeline by ordered rules",
            vec![
                optional("rules", Array, "Ordered {pipelineId, productInterest, sourceChannel, minScore}"),
                optional("campaignId", String, "Campaign whose default pipeline is the fallback"),
                optional("defaultPipelineId", String, "Fallback when no rule matches"),
            ],
            vec!["defaultPipelineId"],
        ),
        ExecutorId::StageTransition => (
            "Stage Transition",
            "Move a deal to another stage of its pipeline",
            vec![
                required("targetStageId", String, "Destination stage"),
                optional("dealId", String, "Deal; falls back to input dealId"),
                optional("minDealValue", Number, "Gate: minimum deal value"),
                optional("maxDaysInStage", Number, "Gate: maximum days in the current stage"),
                optional("notifyTeam", Boolean, "Notify the department team"),
                optional("teamDepartmentId", String, "Department whose teams are notified"),
            ],
            vec!["minDealValue", "maxDaysInStage", "notifyTeam"],
        ),
        ExecutorId::PipelineTransition => (
            "Pipeline Transition",
            "Move a deal to another pipeline of the same funnel",
            vec![
                required("funnelId", String, "Funnel both pipelines belong to"),
                required("targetPipelineId", String, "Destination pipeline"),
                optional("dealId", String, "Deal; falls back to input dealId"),
                optional("resetToFirstStage", Boolean, "Enter the target at its first stage"),
                optional("notifyAssignee", Boolean, "Notify the deal assignee"),
            ],
            vec!["notifyAssignee"],
        ),
        ExecutorId::AiFunnelOrchestrator => (
            "AI Funnel Orchestrator",
            "Pick the best pipeline for a deal, auto-assigning above a confidence threshold",
            [
                vec![
                    required("funnelId", String, "Funnel whose pipelines are candidates"),
                    optional("dealId", String, "Deal; falls back to input dealId"),
                    optional("autoAssignThreshold", Number, "Confidence 0-100 needed to auto-assign"),
                    optional("fallbackPipelineId", String, "Pipeline used when the model fails"),
                    optional("agentId", String, "Agent the call is attributed to"),
                ],
                ai_settings_schema().to_vec(),
            ]
            .concat(),
            vec![
                "autoAssignThreshold",
                "fallbackPipelineId",
                "model",
                "maxTokens",
                "temperature",
            ],
        ),
        ExecutorId::FunnelExit => (
            "Funnel Exit",
            "Close a deal as won or lost and run exit hooks",
            vec![
                optional("outcome", String, "won or lost; falls back to input outcome"),
                optional("dealId", String, "Deal; falls back to input dealId"),
                optional("lostReason", String, "Reason recorded for lost deals"),
                optional("archive", Boolean, "Archive the deal"),
                optional("createCustomerRecord", Boolean, "Create a customer when won"),
                optional("triggerRetention", Boolean, "Start retention when lost"),
                optional("emitAnalytics", Boolean, "Emit an analytics event"),
            ],
            vec!["archive", "createCustomerRecord", "triggerRetention", "emitAnalytics"],
        ),
        ExecutorId::DealWebhookTrigger => (
            "Deal Webhook",
            "POST deal events to an external URL with retry",
            vec![
                required("url", String, "http(s) endpoint"),
                optional("headers", Object, "Extra request headers"),
                optional("onStageChange", Boolean, "Send on stage change"),
                optional("onPipelineChange", Boolean, "Send on pipeline change"),
                optional("onDealWon", Boolean, "Send when won"),
                optional("onDealLost", Boolean, "Send when lost"),
                optional("payload", Object, "Fields merged into the deal data"),
                optional("dealId", String, "Deal; falls back to input dealId"),
                optional("maxRetries", Number, "Retries after the first attempt"),
                optional("delayMs", Number, "Base backoff delay"),
            ],
            vec!["headers", "payload", "maxRetries", "delayMs"],
        ),
        ExecutorId::SwitchCase => (
            "Switch",
            "Branch on the exact value of a variable",
            vec![
                required("variable", String, "Input or context key"),
                required("cases", Array, "[{value, path}]"),
                optional("defaultPath", String, "Next step when no case matches"),
            ],
            vec!["defaultPath"],
        ),
        ExecutorId::WhileLoop => (
            "While Loop",
            "Repeat a body while a condition holds, up to a bound",
            vec![
                required("condition", Object, "{variable, operator, value}"),
                required("maxIterations", Number, "Upper bound on iterations"),
                required("loopBody", String, "First step of the body"),
                optional("exitPath", String, "Next step after the loop"),
            ],
            vec!["maxIterations"],
        ),
        ExecutorId::ParallelFork => (
            "Parallel Fork",
            "Start several branches at once",
            vec![
                required("branches", Array, "[{name, startNode}]"),
                optional("waitFor", String, "all or any"),
                optional("timeoutMs", Number, "Advisory branch timeout"),
            ],
            vec!["timeoutMs"],
        ),
        ExecutorId::JoinSync => (
            "Join",
            "Wait for forked branches before continuing",
            vec![
                optional("waitForAll", Boolean, "Wait for every branch (default true)"),
                optional("branches", Array, "Only join on these branch names"),
                optional("continuePath", String, "Next step once joined"),
            ],
            vec![],
        ),
    };

    ExecutorMetadata {
        id,
        display_name,
        description,
        category: id.category(),
        config_schema,
        overridable_fields,
    }
}
