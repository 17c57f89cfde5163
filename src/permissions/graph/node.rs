/*!
 * Role Nodes
 * Roles, their granted capabilities, and parent references
 */

use crate::core::errors::ConfigurationError;
use crate::core::types::{RoleId, TenantId};
use crate::permissions::types::CapabilitySet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A role in the inheritance graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionNode {
    pub role: RoleId,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub parents: BTreeSet<RoleId>,
    /// Restricts the role to one tenant; `None` applies everywhere
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantId>,
}

impl PermissionNode {
    pub fn new(role: impl Into<RoleId>, capabilities: CapabilitySet) -> Self {
        Self {
            role: role.into(),
            capabilities,
            parents: BTreeSet::new(),
            tenant: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<RoleId>) -> Self {
        self.parents.insert(parent.into());
        self
    }

    pub fn scoped_to(mut self, tenant: impl Into<TenantId>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn applies_to(&self, tenant: &TenantId) -> bool {
        self.tenant.as_ref().map_or(true, |scoped| scoped == tenant)
    }
}

/// Serialized role catalog, as loaded from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCatalog {
    #[serde(default)]
    pub roles: Vec<PermissionNode>,
}

impl RoleCatalog {
    /// Parse a JSON catalog; capability strings are validated while parsing
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::InvalidSetting {
            key: "role_catalog".to_string(),
            value: format!("line {} column {}", e.line(), e.column()),
            reason: e.to_string(),
        })
    }
}
