// Domain records returned by the Database capability
//
// These are snapshots owned by the host's persistence layer. The core only
// reads them and asks the host to apply changes through Database methods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Level of an organisational scope assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Tenant,
    LegalEntity,
    Store,
}

/// One scope a user is assigned to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAssignment {
    pub user_id: String,
    pub scope_type: ScopeType,
    /// Store or legal-entity id; None for tenant-wide assignments
    #[serde(default)]
    pub scope_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl UserAssignment {
    pub fn tenant(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            scope_type: ScopeType::Tenant,
            scope_id: None,
            role: None,
        }
    }

    pub fn store(user_id: impl Into<String>, store_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            scope_type: ScopeType::Store,
            scope_id: Some(store_id.into()),
            role: None,
        }
    }

    pub fn legal_entity(user_id: impl Into<String>, legal_entity_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            scope_type: ScopeType::LegalEntity,
            scope_id: Some(legal_entity_id.into()),
            role: None,
        }
    }

    /// True when this assignment targets `scope_type` with id `scope_id`
    pub fn covers(&self, scope_type: ScopeType, scope_id: &str) -> bool {
        self.scope_type == scope_type && self.scope_id.as_deref() == Some(scope_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub legal_entity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalEntity {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
    pub department_id: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

/// How a campaign routes incoming leads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    Automatic,
    Manual,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Automatic => "automatic",
            RoutingMode::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub store_id: Option<String>,
    pub routing_mode: RoutingMode,
    /// Sub-workflow to run in automatic mode
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub fallback_pipeline_id1: Option<String>,
    #[serde(default)]
    pub fallback_pipeline_id2: Option<String>,
    #[serde(default)]
    pub manual_pipeline_id1: Option<String>,
    #[serde(default)]
    pub manual_pipeline_id2: Option<String>,
    /// Pipeline used when no assignment rule matches
    #[serde(default)]
    pub default_pipeline_id: Option<String>,
    #[serde(default)]
    pub notify_user_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// Funnel this pipeline is a macro-stage of
    #[serde(default)]
    pub funnel_id: Option<String>,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// Stage with the lowest position
    pub fn first_stage(&self) -> Option<&Stage> {
        self.stages.iter().min_by_key(|s| s.position)
    }

    pub fn has_stage(&self, stage_id: &str) -> bool {
        self.stages.iter().any(|s| s.id == stage_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Open,
    Won,
    Lost,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Open => "open",
            DealStatus::Won => "won",
            DealStatus::Lost => "lost",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    #[serde(default)]
    pub value: f64,
    pub pipeline_id: String,
    pub stage_id: String,
    pub status: DealStatus,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub stage_entered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Host-specific attributes (lead score, source, custom fields)
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Deal {
    /// Whole days spent in the current stage as of `now`
    pub fn days_in_stage(&self, now: DateTime<Utc>) -> Option<i64> {
        self.stage_entered_at.map(|t| (now - t).num_days())
    }

    /// Whole days since the deal was created as of `now`
    pub fn days_in_funnel(&self, now: DateTime<Utc>) -> Option<i64> {
        self.created_at.map(|t| (now - t).num_days())
    }
}

/// Terminal state applied by a funnel exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealClosure {
    pub status: DealStatus,
    pub closed_at: DateTime<Utc>,
    #[serde(default)]
    pub lost_reason: Option<String>,
    #[serde(default)]
    pub archived: bool,
}
