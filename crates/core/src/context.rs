// Execution context passed to every executor call
//
// The context is created per workflow-instance invocation and is read-only
// for executors. Cross-step state that fork/join/while steps depend on lives
// in BranchLedger, which only the outer scheduler writes: its mutation
// helpers return a new ledger with a bumped version instead of editing in place.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Free-form step input (the `inputData` map)
pub type InputData = Map<String, Value>;

/// Who is running a step, on whose behalf, and within which organisational scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub tenant_id: String,
    pub requester_id: String,
    pub instance_id: String,
    pub template_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_assignee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_role: Option<String>,

    /// Host-supplied values carried between steps
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Branch and loop bookkeeping maintained by the outer scheduler
    #[serde(default)]
    pub ledger: BranchLedger,
}

impl ExecutionContext {
    pub fn new(
        tenant_id: impl Into<String>,
        requester_id: impl Into<String>,
        instance_id: impl Into<String>,
        template_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            requester_id: requester_id.into(),
            instance_id: instance_id.into(),
            template_id: template_id.into(),
            ..Default::default()
        }
    }

    pub fn with_assignee(mut self, user_id: impl Into<String>) -> Self {
        self.current_assignee_id = Some(user_id.into());
        self
    }

    pub fn with_store(mut self, store_id: impl Into<String>) -> Self {
        self.store_id = Some(store_id.into());
        self
    }

    pub fn with_legal_entity(mut self, legal_entity_id: impl Into<String>) -> Self {
        self.legal_entity_id = Some(legal_entity_id.into());
        self
    }

    pub fn with_department(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = Some(department_id.into());
        self
    }

    pub fn with_requester_email(mut self, email: impl Into<String>) -> Self {
        self.requester_email = Some(email.into());
        self
    }

    pub fn with_requester_role(mut self, role: impl Into<String>) -> Self {
        self.requester_role = Some(role.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_ledger(mut self, ledger: BranchLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Resolve a named value from the context: well-known fields first, then metadata.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        let field = match key {
            "tenantId" => Some(&self.tenant_id),
            "requesterId" => Some(&self.requester_id),
            "instanceId" => Some(&self.instance_id),
            "templateId" => Some(&self.template_id),
            "currentAssigneeId" => self.current_assignee_id.as_ref(),
            "storeId" => self.store_id.as_ref(),
            "legalEntityId" => self.legal_entity_id.as_ref(),
            "departmentId" => self.department_id.as_ref(),
            "requesterEmail" => self.requester_email.as_ref(),
            "requesterRole" => self.requester_role.as_ref(),
            _ => None,
        };

        field
            .map(|v| Value::String(v.clone()))
            .or_else(|| self.metadata.get(key).cloned())
    }
}

/// Explicit, versioned record of fork/join and loop progress.
///
/// Every mutation helper returns a new ledger with `version + 1`; executors
/// only ever receive it by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchLedger {
    pub version: u64,
    #[serde(default)]
    pub completed_branches: Vec<String>,
    #[serde(default)]
    pub total_branches: Option<usize>,
    /// Iterations already run, keyed by loop step id
    #[serde(default)]
    pub loop_iterations: BTreeMap<String, u32>,
}

impl BranchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how many branches a fork scheduled
    pub fn with_total_branches(&self, total: usize) -> Self {
        let mut next = self.clone();
        next.total_branches = Some(total);
        next.version += 1;
        next
    }

    /// Record that a branch finished. Completing the same branch twice is a no-op
    /// apart from the version bump.
    pub fn record_branch_completion(&self, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        let mut next = self.clone();
        if !next.completed_branches.contains(&branch) {
            next.completed_branches.push(branch);
        }
        next.version += 1;
        next
    }

    /// Record one more iteration of the loop step `step_id`
    pub fn record_iteration(&self, step_id: &str) -> Self {
        let mut next = self.clone();
        *next.loop_iterations.entry(step_id.to_string()).or_insert(0) += 1;
        next.version += 1;
        next
    }

    /// Iterations recorded so far for `step_id`
    pub fn iteration(&self, step_id: &str) -> u32 {
        self.loop_iterations.get(step_id).copied().unwrap_or(0)
    }

    pub fn is_completed(&self, branch: &str) -> bool {
        self.completed_branches.iter().any(|b| b == branch)
    }
}
