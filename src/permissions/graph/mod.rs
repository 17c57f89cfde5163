/*!
 * Permission Graph
 * Resolves a principal's effective capabilities through role inheritance
 *
 * ## Resolution
 * - Depth-first union over each assigned role and its parents
 * - A visited set short-circuits revisits, so resolution terminates even if a
 *   cycle slipped past construction
 * - Union, never override: no role removes a capability granted by another
 * - Roles scoped to another tenant contribute nothing, parents included
 * - Without inheritance only directly assigned roles contribute
 */

mod builder;
mod node;

pub use builder::{GraphBuild, GraphBuilder, GraphDiagnostic};
pub use node::{PermissionNode, RoleCatalog};

use crate::core::errors::ConfigurationError;
use crate::core::types::RoleId;
use crate::permissions::types::{CapabilitySet, CorporateContext, Principal};
use ahash::{HashMap, HashSet, HashSetExt};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Validated role inheritance graph
#[derive(Debug, Clone)]
pub struct PermissionGraph {
    nodes: HashMap<RoleId, PermissionNode>,
    /// Roles removed as part of a cyclic component
    excluded: HashSet<RoleId>,
    /// Content digest, part of every decision fingerprint
    digest: String,
}

impl PermissionGraph {
    /// Graph with no roles
    pub fn empty() -> Self {
        Self::from_validated(BTreeMap::new(), HashSet::new())
    }

    pub(crate) fn from_validated(
        nodes: BTreeMap<RoleId, PermissionNode>,
        excluded: HashSet<RoleId>,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        for (role, node) in &nodes {
            hasher.update(role.as_str().as_bytes());
            hasher.update(&[0]);
            for cap in node.capabilities.iter() {
                hasher.update(cap.to_string().as_bytes());
                hasher.update(&[1]);
            }
            for parent in &node.parents {
                hasher.update(parent.as_str().as_bytes());
                hasher.update(&[2]);
            }
            if let Some(tenant) = &node.tenant {
                hasher.update(tenant.as_str().as_bytes());
            }
            hasher.update(&[3]);
        }
        let digest = hasher.finalize().to_hex()[..16].to_string();

        Self {
            nodes: nodes.into_iter().collect(),
            excluded,
            digest,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, role: &RoleId) -> bool {
        self.nodes.contains_key(role)
    }

    pub fn is_excluded(&self, role: &RoleId) -> bool {
        self.excluded.contains(role)
    }

    pub fn node(&self, role: &RoleId) -> Option<&PermissionNode> {
        self.nodes.get(role)
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Effective capabilities, following parents when the tenant enables inheritance
    pub fn resolve(
        &self,
        principal: &Principal,
        context: &CorporateContext,
    ) -> Result<CapabilitySet, ConfigurationError> {
        self.resolve_with(principal, context, context.inheritance_enabled)
    }

    /// Effective capabilities from directly assigned roles only
    pub fn resolve_direct(
        &self,
        principal: &Principal,
        context: &CorporateContext,
    ) -> Result<CapabilitySet, ConfigurationError> {
        self.resolve_with(principal, context, false)
    }

    fn resolve_with(
        &self,
        principal: &Principal,
        context: &CorporateContext,
        inherit: bool,
    ) -> Result<CapabilitySet, ConfigurationError> {
        let mut capabilities = CapabilitySet::new();
        let mut visited = HashSet::new();

        for role in &principal.roles {
            if self.excluded.contains(role) {
                error!(principal = %principal.id, role = %role, "assigned role is part of an excluded cycle");
                continue;
            }
            let node = self
                .nodes
                .get(role)
                .ok_or_else(|| ConfigurationError::UnknownRole { role: role.clone() })?;

            if !node.applies_to(&context.tenant) {
                debug!(role = %role, tenant = %context.tenant, "role not scoped to tenant");
                continue;
            }

            if inherit {
                self.collect(node, context, &mut visited, &mut capabilities);
            } else {
                capabilities.extend(&node.capabilities);
            }
        }

        debug!(
            principal = %principal.id,
            tenant = %context.tenant,
            inherit,
            capabilities = capabilities.len(),
            "resolved effective capabilities"
        );
        Ok(capabilities)
    }

    fn collect(
        &self,
        start: &PermissionNode,
        context: &CorporateContext,
        visited: &mut HashSet<RoleId>,
        capabilities: &mut CapabilitySet,
    ) {
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.role.clone()) {
                continue;
            }
            if !node.applies_to(&context.tenant) {
                continue;
            }
            capabilities.extend(&node.capabilities);

            for parent in &node.parents {
                if visited.contains(parent) {
                    continue;
                }
                match self.nodes.get(parent) {
                    Some(parent_node) => stack.push(parent_node),
                    None => {
                        error!(role = %node.role, parent = %parent, "parent role missing from graph, excluded from union");
                    }
                }
            }
        }
    }
}

impl Default for PermissionGraph {
    fn default() -> Self {
        Self::empty()
    }
}
