//! Plugin dependency management
//!
//! Builds the plugin-to-plugin dependency graph, detects cycles and
//! produces a dependency-first load order.

use crate::plugin::types::{Dependency, Plugin, PluginError};
use crate::plugin::version::{parse_version, satisfies};
use semver::Version;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A node in the dependency graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyNode {
    pub name: String,
    /// Outgoing edges: dependency name -> version constraint
    pub dependencies: BTreeMap<String, Option<String>>,
    /// Reverse edges: plugins depending on this one
    pub dependents: BTreeSet<String>,
}

/// Directed plugin dependency graph
///
/// Iteration order between unrelated nodes is not part of the contract;
/// callers must only rely on dependencies preceding their dependents.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, DependencyNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from plugins, adding an edge for every declared dependency.
    ///
    /// Edges pointing at plugins outside the set are kept; they simply have
    /// no node and do not take part in ordering.
    pub fn from_plugins<'a, I>(plugins: I) -> Self
    where
        I: IntoIterator<Item = &'a dyn Plugin>,
    {
        let plugins: Vec<&dyn Plugin> = plugins.into_iter().collect();
        let mut graph = Self::new();
        for plugin in &plugins {
            graph.add_plugin(*plugin);
        }
        for plugin in &plugins {
            for dep in plugin.dependencies() {
                // node was created above
                let _ = graph.add_dependency(plugin.name(), &dep.name, dep.version.as_deref());
            }
        }
        graph
    }

    /// Creates an empty node for the plugin.
    pub fn add_plugin(&mut self, plugin: &dyn Plugin) {
        self.add_node(plugin.name());
    }

    /// Creates an empty node, picking up reverse edges already recorded.
    pub fn add_node(&mut self, name: &str) {
        if self.nodes.contains_key(name) {
            return;
        }

        let dependents: BTreeSet<String> = self
            .nodes
            .values()
            .filter(|n| n.dependencies.contains_key(name))
            .map(|n| n.name.clone())
            .collect();

        self.nodes.insert(
            name.to_string(),
            DependencyNode {
                name: name.to_string(),
                dependencies: BTreeMap::new(),
                dependents,
            },
        );
    }

    /// Records `plugin_name -> dep_name`. Fails if `plugin_name` has no node.
    pub fn add_dependency(
        &mut self,
        plugin_name: &str,
        dep_name: &str,
        version_constraint: Option<&str>,
    ) -> Result<(), PluginError> {
        let node = self
            .nodes
            .get_mut(plugin_name)
            .ok_or_else(|| PluginError::PluginNotFound(plugin_name.to_string()))?;
        node.dependencies
            .insert(dep_name.to_string(), version_constraint.map(str::to_string));

        if let Some(dep) = self.nodes.get_mut(dep_name) {
            dep.dependents.insert(plugin_name.to_string());
        }
        Ok(())
    }

    /// Removes a node and every reverse edge pointing at it.
    pub fn remove_node(&mut self, name: &str) -> Option<DependencyNode> {
        let node = self.nodes.remove(name)?;
        for dep in node.dependencies.keys() {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.dependents.remove(name);
            }
        }
        Some(node)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&DependencyNode> {
        self.nodes.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Names of plugins that depend directly on `name`.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.nodes
            .get(name)
            .map(|n| n.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All direct and indirect dependencies of a plugin.
    pub fn transitive_dependencies(&self, name: &str) -> Vec<String> {
        let mut all_deps = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![name.to_string()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                for dep in node.dependencies.keys() {
                    if !all_deps.contains(dep) && dep != name {
                        all_deps.push(dep.clone());
                    }
                    stack.push(dep.clone());
                }
            }
        }

        all_deps
    }

    /// Depth-first search with a recursion stack. Every back edge yields a
    /// cycle, returned as a closed path such as `[a, b, a]`.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<String> = Vec::new();

        for name in self.sorted_names() {
            if !visited.contains(&name) {
                self.cycle_dfs(&name, &mut visited, &mut stack, &mut cycles);
            }
        }

        cycles
    }

    fn cycle_dfs(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(name.to_string());
        stack.push(name.to_string());

        if let Some(node) = self.nodes.get(name) {
            for dep in node.dependencies.keys() {
                if !self.nodes.contains_key(dep) {
                    continue;
                }
                if let Some(pos) = stack.iter().position(|n| n == dep) {
                    let mut cycle: Vec<String> = stack[pos..].to_vec();
                    cycle.push(dep.clone());
                    cycles.push(cycle);
                } else if !visited.contains(dep) {
                    self.cycle_dfs(dep, visited, stack, cycles);
                }
            }
        }

        stack.pop();
    }

    /// Dependency-first topological order. Fails with `CyclicDependency` if
    /// the graph has any cycle.
    pub fn get_load_order(&self) -> Result<Vec<String>, PluginError> {
        if let Some(cycle) = self.find_cycles().into_iter().next() {
            return Err(PluginError::CyclicDependency(cycle));
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::new();
        for name in self.sorted_names() {
            self.post_order(&name, &mut visited, &mut order);
        }
        Ok(order)
    }

    fn post_order(&self, name: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(name.to_string()) {
            return;
        }
        if let Some(node) = self.nodes.get(name) {
            for dep in node.dependencies.keys() {
                if self.nodes.contains_key(dep) {
                    self.post_order(dep, visited, order);
                }
            }
        }
        order.push(name.to_string());
    }

    fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Checks declared dependencies against the versions currently available.
///
/// A missing or unsatisfied required dependency is an
/// `UnresolvedDependency` error; the same condition on an optional
/// dependency becomes a warning.
pub fn resolve_dependencies<F>(
    plugin: &str,
    dependencies: &[Dependency],
    lookup: F,
) -> Result<Vec<String>, PluginError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut warnings = Vec::new();

    for dep in dependencies {
        let constraint = dep.version.as_deref();
        let shown = constraint.unwrap_or("(any version)").to_string();

        let problem = match lookup(&dep.name) {
            None => Some("none registered satisfies this".to_string()),
            Some(found) => match parse_version(&found) {
                Err(_) => Some(format!("registered version '{}' is not a semantic version", found)),
                Ok(found_version) => match check_constraint(&found_version, constraint) {
                    Ok(true) => None,
                    Ok(false) => Some(format!(
                        "none registered satisfies this (found {})",
                        found_version
                    )),
                    Err(reason) => Some(reason),
                },
            },
        };

        if let Some(found) = problem {
            if dep.optional {
                warnings.push(format!(
                    "optional dependency {} {} unavailable: {}",
                    dep.name, shown, found
                ));
            } else {
                return Err(PluginError::UnresolvedDependency {
                    plugin: plugin.to_string(),
                    dependency: dep.name.clone(),
                    constraint: shown,
                    found,
                });
            }
        }
    }

    Ok(warnings)
}

fn check_constraint(version: &Version, constraint: Option<&str>) -> Result<bool, String> {
    satisfies(version, constraint)
        .map_err(|e| format!("invalid version constraint '{}': {}", constraint.unwrap_or(""), e))
}
