//! Organisational scope checks shared by every scope-gated executor.
//!
//! Resolution order for a user acting within a tenant:
//! 1. No assignments at all: denied.
//! 2. Any tenant-wide assignment: allowed without looking further.
//! 3. Target store: a direct store assignment allows; otherwise the store's
//!    owning legal entity is loaded and a legal-entity assignment on it allows.
//! 4. Target legal entity: a legal-entity assignment on it allows.
//! 5. No target scope: any assignment in the tenant allows.

use serde::{Deserialize, Serialize};

use crate::entities::ScopeType;
use crate::error::Result;
use crate::traits::Database;

/// Outcome of a scope check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeCheck {
    pub has_access: bool,
    /// Scope level that granted access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted_by: Option<ScopeType>,
    /// Human-readable denial reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ScopeCheck {
    fn allow(granted_by: ScopeType) -> Self {
        Self {
            has_access: true,
            granted_by: Some(granted_by),
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            has_access: false,
            granted_by: None,
            reason: Some(reason.into()),
        }
    }

    /// Denial reason, or a generic one when access was granted
    pub fn reason_or_default(&self) -> &str {
        self.reason.as_deref().unwrap_or("access granted")
    }
}

/// Check whether `user_id` may act on the given store / legal entity within `tenant_id`.
///
/// Database failures are returned as errors; callers decide whether that is a
/// hard failure.
pub async fn validate_user_scope(
    db: &dyn Database,
    user_id: &str,
    tenant_id: &str,
    store_id: Option<&str>,
    legal_entity_id: Option<&str>,
) -> Result<ScopeCheck> {
    let assignments = db.get_user_assignments(user_id, tenant_id).await?;

    if assignments.is_empty() {
        return Ok(ScopeCheck::deny(format!(
            "User {} has no scope assignments in tenant {}",
            user_id, tenant_id
        )));
    }

    if assignments
        .iter()
        .any(|a| a.scope_type == ScopeType::Tenant)
    {
        return Ok(ScopeCheck::allow(ScopeType::Tenant));
    }

    if let Some(store_id) = store_id {
        if assignments
            .iter()
            .any(|a| a.covers(ScopeType::Store, store_id))
        {
            return Ok(ScopeCheck::allow(ScopeType::Store));
        }

        // Indirect access through the legal entity that owns the store
        let has_entity_assignments = assignments
            .iter()
            .any(|a| a.scope_type == ScopeType::LegalEntity);
        if has_entity_assignments {
            let owner = db
                .get_store(tenant_id, store_id)
                .await?
                .and_then(|s| s.legal_entity_id);
            if let Some(owner) = owner {
                if assignments
                    .iter()
                    .any(|a| a.covers(ScopeType::LegalEntity, &owner))
                {
                    return Ok(ScopeCheck::allow(ScopeType::LegalEntity));
                }
            }
        }

        return Ok(ScopeCheck::deny(format!(
            "User {} does not have access to store {}",
            user_id, store_id
        )));
    }

    if let Some(legal_entity_id) = legal_entity_id {
        if db
            .get_legal_entity(tenant_id, legal_entity_id)
            .await?
            .is_none()
        {
            return Ok(ScopeCheck::deny(format!(
                "Legal entity {} does not exist in tenant {}",
                legal_entity_id, tenant_id
            )));
        }

        if assignments
            .iter()
            .any(|a| a.covers(ScopeType::LegalEntity, legal_entity_id))
        {
            return Ok(ScopeCheck::allow(ScopeType::LegalEntity));
        }

        return Ok(ScopeCheck::deny(format!(
            "User {} does not have access to legal entity {}",
            user_id, legal_entity_id
        )));
    }

    // No target scope: membership in the tenant is enough
    let granted_by = assignments[0].scope_type;
    Ok(ScopeCheck::allow(granted_by))
}
