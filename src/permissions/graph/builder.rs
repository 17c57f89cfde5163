/*!
 * Graph Construction
 * Validates a role catalog into an inheritance DAG
 *
 * Cycle detection is an explicit pass over the catalog (Tarjan's strongly
 * connected components, visited in role-id order so the reported component
 * is deterministic). Construction comes in two flavours:
 * - `build`: any dangling parent or cycle is a fatal configuration error
 * - `build_excluding_cycles`: offending roles are excluded and reported
 */

use super::node::{PermissionNode, RoleCatalog};
use super::PermissionGraph;
use crate::core::errors::ConfigurationError;
use crate::core::types::RoleId;
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, warn};

/// Problems found while building in lenient mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphDiagnostic {
    /// Roles forming a cycle, excluded from resolution
    CycleExcluded { roles: Vec<RoleId> },
    /// Parent edge pointing at an undefined role, dropped
    DanglingParent { role: RoleId, parent: RoleId },
    /// Role defined more than once; the last definition was kept
    DuplicateRole { role: RoleId },
}

/// Lenient build output
#[derive(Debug)]
pub struct GraphBuild {
    pub graph: PermissionGraph,
    pub diagnostics: Vec<GraphDiagnostic>,
}

/// Collects role definitions and validates them into a graph
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: BTreeMap<RoleId, PermissionNode>,
    duplicates: BTreeSet<RoleId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: RoleCatalog) -> Self {
        let mut builder = Self::new();
        for node in catalog.roles {
            builder.add(node);
        }
        builder
    }

    pub fn add(&mut self, node: PermissionNode) -> &mut Self {
        if let Some(previous) = self.nodes.insert(node.role.clone(), node) {
            self.duplicates.insert(previous.role);
        }
        self
    }

    pub fn with(mut self, node: PermissionNode) -> Self {
        self.add(node);
        self
    }

    /// Strict build: the first problem found is returned as an error
    pub fn build(self) -> Result<PermissionGraph, ConfigurationError> {
        if let Some(role) = self.duplicates.iter().next() {
            return Err(ConfigurationError::InvalidSetting {
                key: "role_catalog".to_string(),
                value: role.to_string(),
                reason: "role defined more than once".to_string(),
            });
        }

        for node in self.nodes.values() {
            if let Some(parent) = node.parents.iter().find(|p| !self.nodes.contains_key(*p)) {
                return Err(ConfigurationError::UnknownRole {
                    role: parent.clone(),
                });
            }
        }

        if let Some(cycle) = cyclic_components(&self.nodes).into_iter().next() {
            error!(roles = ?cycle, "role graph contains a cycle");
            return Err(ConfigurationError::CyclicRoleGraph { roles: cycle });
        }

        Ok(PermissionGraph::from_validated(self.nodes, HashSet::new()))
    }

    /// Lenient build: cyclic components are excluded, dangling edges dropped
    pub fn build_excluding_cycles(mut self) -> GraphBuild {
        let mut diagnostics: Vec<GraphDiagnostic> = self
            .duplicates
            .iter()
            .map(|role| GraphDiagnostic::DuplicateRole { role: role.clone() })
            .collect();

        let defined: BTreeSet<RoleId> = self.nodes.keys().cloned().collect();
        for node in self.nodes.values_mut() {
            let dangling: Vec<RoleId> = node
                .parents
                .iter()
                .filter(|p| !defined.contains(*p))
                .cloned()
                .collect();
            for parent in dangling {
                warn!(role = %node.role, parent = %parent, "dropping dangling parent edge");
                node.parents.remove(&parent);
                diagnostics.push(GraphDiagnostic::DanglingParent {
                    role: node.role.clone(),
                    parent,
                });
            }
        }

        let mut excluded = HashSet::new();
        for cycle in cyclic_components(&self.nodes) {
            error!(roles = ?cycle, "excluding cyclic roles from the permission graph");
            for role in &cycle {
                self.nodes.remove(role);
                excluded.insert(role.clone());
            }
            diagnostics.push(GraphDiagnostic::CycleExcluded { roles: cycle });
        }

        GraphBuild {
            graph: PermissionGraph::from_validated(self.nodes, excluded),
            diagnostics,
        }
    }
}

/// Strongly connected components that form cycles, each sorted, ordered by first member
fn cyclic_components(nodes: &BTreeMap<RoleId, PermissionNode>) -> Vec<Vec<RoleId>> {
    let mut tarjan = Tarjan::new(nodes);
    for role in nodes.keys() {
        if !tarjan.index.contains_key(role) {
            tarjan.connect(role);
        }
    }

    let mut cycles: Vec<Vec<RoleId>> = tarjan
        .components
        .into_iter()
        .filter(|component| {
            component.len() > 1
                || nodes
                    .get(&component[0])
                    .map_or(false, |node| node.parents.contains(&component[0]))
        })
        .map(|mut component| {
            component.sort();
            component
        })
        .collect();
    cycles.sort();
    cycles
}

/// Iterative Tarjan so deep catalogs cannot overflow the stack
struct Tarjan<'a> {
    nodes: &'a BTreeMap<RoleId, PermissionNode>,
    next_index: usize,
    index: HashMap<RoleId, usize>,
    lowlink: HashMap<RoleId, usize>,
    stack: Vec<RoleId>,
    on_stack: HashSet<RoleId>,
    components: Vec<Vec<RoleId>>,
}

impl<'a> Tarjan<'a> {
    fn new(nodes: &'a BTreeMap<RoleId, PermissionNode>) -> Self {
        Self {
            nodes,
            next_index: 0,
            index: HashMap::new(),
            lowlink: HashMap::new(),
            stack: Vec::new(),
            on_stack: HashSet::new(),
            components: Vec::new(),
        }
    }

    fn visit(&mut self, role: &RoleId) {
        self.index.insert(role.clone(), self.next_index);
        self.lowlink.insert(role.clone(), self.next_index);
        self.next_index += 1;
        self.stack.push(role.clone());
        self.on_stack.insert(role.clone());
    }

    fn connect(&mut self, root: &RoleId) {
        // Each frame: (role, parents not yet explored)
        let mut frames: Vec<(RoleId, Vec<RoleId>)> = Vec::new();
        self.visit(root);
        frames.push((root.clone(), self.parents_of(root)));

        while let Some((role, pending)) = frames.last_mut() {
            if let Some(parent) = pending.pop() {
                let role = role.clone();
                if !self.index.contains_key(&parent) {
                    self.visit(&parent);
                    let parents = self.parents_of(&parent);
                    frames.push((parent, parents));
                } else if self.on_stack.contains(&parent) {
                    let low = self.lowlink[&role].min(self.index[&parent]);
                    self.lowlink.insert(role, low);
                }
                continue;
            }

            let role = role.clone();
            frames.pop();

            if let Some((caller, _)) = frames.last() {
                let low = self.lowlink[caller].min(self.lowlink[&role]);
                self.lowlink.insert(caller.clone(), low);
            }

            if self.lowlink[&role] == self.index[&role] {
                let mut component = Vec::new();
                while let Some(member) = self.stack.pop() {
                    self.on_stack.remove(&member);
                    let done = member == role;
                    component.push(member);
                    if done {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }

    /// Parents in reverse order so popping visits them in role-id order
    fn parents_of(&self, role: &RoleId) -> Vec<RoleId> {
        self.nodes
            .get(role)
            .map(|node| {
                node.parents
                    .iter()
                    .rev()
                    .filter(|p| self.nodes.contains_key(*p))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
