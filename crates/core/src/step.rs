// Step definitions and executor identities
//
// A Step is one node of a workflow definition: an id, the executor that runs
// it, and the executor-specific config map. Executor identities form a closed
// enum so an unknown executor is a parse error at definition time instead of a
// lookup failure at run time.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Executor families, used for grouping in catalogs and UIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorCategory {
    Action,
    Decision,
    Trigger,
    Routing,
    Campaign,
    Pipeline,
    Funnel,
    ControlFlow,
}

impl ExecutorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorCategory::Action => "action",
            ExecutorCategory::Decision => "decision",
            ExecutorCategory::Trigger => "trigger",
            ExecutorCategory::Routing => "routing",
            ExecutorCategory::Campaign => "campaign",
            ExecutorCategory::Pipeline => "pipeline",
            ExecutorCategory::Funnel => "funnel",
            ExecutorCategory::ControlFlow => "control_flow",
        }
    }
}

impl fmt::Display for ExecutorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of every built-in executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorId {
    // Action
    SendEmail,
    SendNotification,
    RequestApproval,
    AutoApproval,
    ConnectorAction,
    // Decision
    EvaluateCondition,
    AiDecision,
    // Trigger
    FormTrigger,
    TaskEventTrigger,
    // Routing
    LeadRouter,
    DealRouter,
    CustomerRouter,
    // Campaign / Pipeline
    CampaignLeadIntake,
    PipelineAssignment,
    // Funnel
    StageTransition,
    PipelineTransition,
    AiFunnelOrchestrator,
    FunnelExit,
    DealWebhookTrigger,
    // Control flow
    SwitchCase,
    WhileLoop,
    ParallelFork,
    JoinSync,
}

impl ExecutorId {
    /// Every executor identity, in catalog order
    pub const ALL: [ExecutorId; 23] = [
        ExecutorId::SendEmail,
        ExecutorId::SendNotification,
        ExecutorId::RequestApproval,
        ExecutorId::AutoApproval,
        ExecutorId::ConnectorAction,
        ExecutorId::EvaluateCondition,
        ExecutorId::AiDecision,
        ExecutorId::FormTrigger,
        ExecutorId::TaskEventTrigger,
        ExecutorId::LeadRouter,
        ExecutorId::DealRouter,
        ExecutorId::CustomerRouter,
        ExecutorId::CampaignLeadIntake,
        ExecutorId::PipelineAssignment,
        ExecutorId::StageTransition,
        ExecutorId::PipelineTransition,
        ExecutorId::AiFunnelOrchestrator,
        ExecutorId::FunnelExit,
        ExecutorId::DealWebhookTrigger,
        ExecutorId::SwitchCase,
        ExecutorId::WhileLoop,
        ExecutorId::ParallelFork,
        ExecutorId::JoinSync,
    ];

    /// Wire identifier (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorId::SendEmail => "send_email",
            ExecutorId::SendNotification => "send_notification",
            ExecutorId::RequestApproval => "request_approval",
            ExecutorId::AutoApproval => "auto_approval",
            ExecutorId::ConnectorAction => "connector_action",
            ExecutorId::EvaluateCondition => "evaluate_condition",
            ExecutorId::AiDecision => "ai_decision",
            ExecutorId::FormTrigger => "form_trigger",
            ExecutorId::TaskEventTrigger => "task_event_trigger",
            ExecutorId::LeadRouter => "lead_router",
            ExecutorId::DealRouter => "deal_router",
            ExecutorId::CustomerRouter => "customer_router",
            ExecutorId::CampaignLeadIntake => "campaign_lead_intake",
            ExecutorId::PipelineAssignment => "pipeline_assignment",
            ExecutorId::StageTransition => "stage_transition",
            ExecutorId::PipelineTransition => "pipeline_transition",
            ExecutorId::AiFunnelOrchestrator => "ai_funnel_orchestrator",
            ExecutorId::FunnelExit => "funnel_exit",
            ExecutorId::DealWebhookTrigger => "deal_webhook_trigger",
            ExecutorId::SwitchCase => "switch_case",
            ExecutorId::WhileLoop => "while_loop",
            ExecutorId::ParallelFork => "parallel_fork",
            ExecutorId::JoinSync => "join_sync",
        }
    }

    /// Family this executor belongs to
    pub fn category(&self) -> ExecutorCategory {
        match self {
            ExecutorId::SendEmail
            | ExecutorId::SendNotification
            | ExecutorId::RequestApproval
            | ExecutorId::AutoApproval
            | ExecutorId::ConnectorAction => ExecutorCategory::Action,
            ExecutorId::EvaluateCondition | ExecutorId::AiDecision => ExecutorCategory::Decision,
            ExecutorId::FormTrigger | ExecutorId::TaskEventTrigger => ExecutorCategory::Trigger,
            ExecutorId::LeadRouter | ExecutorId::DealRouter | ExecutorId::CustomerRouter => {
                ExecutorCategory::Routing
            }
            ExecutorId::CampaignLeadIntake => ExecutorCategory::Campaign,
            ExecutorId::PipelineAssignment => ExecutorCategory::Pipeline,
            ExecutorId::StageTransition
            | ExecutorId::PipelineTransition
            | ExecutorId::AiFunnelOrchestrator
            | ExecutorId::FunnelExit
            | ExecutorId::DealWebhookTrigger => ExecutorCategory::Funnel,
            ExecutorId::SwitchCase
            | ExecutorId::WhileLoop
            | ExecutorId::ParallelFork
            | ExecutorId::JoinSync => ExecutorCategory::ControlFlow,
        }
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutorId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ExecutorId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown executor id: {}", s))
    }
}

/// One node of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Step identifier, unique within a workflow definition
    pub id: String,

    /// Executor bound to this step
    pub executor: ExecutorId,

    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Executor-specific configuration
    #[serde(default = "empty_config")]
    pub config: Value,
}

fn empty_config() -> Value {
    Value::Object(Map::new())
}

impl Step {
    /// Create a step with an empty config map
    pub fn new(id: impl Into<String>, executor: ExecutorId) -> Self {
        Self {
            id: id.into(),
            executor,
            name: None,
            config: empty_config(),
        }
    }

    /// Set the config map
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Deserialize the config map into the executor's typed config.
    ///
    /// A null config is treated as an empty map so executors whose fields are
    /// all optional accept steps defined without any config.
    pub fn typed_config<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let raw = if self.config.is_null() {
            empty_config()
        } else {
            self.config.clone()
        };

        serde_json::from_value(raw).map_err(|source| ConfigError::Parse {
            step_id: self.id.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_executor_id_round_trips_through_str() {
        for id in ExecutorId::ALL {
            assert_eq!(id.as_str().parse::<ExecutorId>().unwrap(), id);
            assert_eq!(
                serde_json::to_value(id).unwrap(),
                Value::String(id.as_str().to_string())
            );
        }
    }

    #[test]
    fn test_unknown_executor_id_fails_at_parse() {
        let result: std::result::Result<Step, _> =
            serde_json::from_value(json!({"id": "s1", "executor": "teleport"}));
        assert!(result.is_err());
        assert!("teleport".parse::<ExecutorId>().is_err());
    }

    #[test]
    fn test_categories() {
        assert_eq!(ExecutorId::JoinSync.category(), ExecutorCategory::ControlFlow);
        assert_eq!(ExecutorId::DealRouter.category(), ExecutorCategory::Routing);
        assert_eq!(ExecutorId::FunnelExit.category(), ExecutorCategory::Funnel);
    }

    #[test]
    fn test_typed_config_treats_null_as_empty() {
        #[derive(Deserialize)]
        struct Opt {
            #[serde(default)]
            flag: bool,
        }

        let step = Step::new("s1", ExecutorId::ParallelFork).with_config(Value::Null);
        let parsed: Opt = step.typed_config().unwrap();
        assert!(!parsed.flag);
    }

    #[test]
    fn test_typed_config_reports_step_id() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            url: String,
        }

        let step = Step::new("hook", ExecutorId::DealWebhookTrigger);
        let err = step.typed_config::<Needs>().unwrap_err();
        assert!(err.to_string().contains("'hook'"));
    }
}
