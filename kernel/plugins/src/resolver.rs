//! Dependency ordering for plugin installation.
//!
//! Depth-first traversal with a recursion stack: a node seen again while it
//! is still on the stack closes a cycle. Dependencies are emitted before
//! their dependents; independent roots keep the order they were given in.

use std::collections::{HashMap, HashSet};

use keel_core::{KernelError, KernelResult};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// What the resolver knows about the plugin set.
pub struct DependencyGraph<'a> {
    /// Declared dependencies of every plugin that can be installed or already is.
    pub dependencies: HashMap<&'a str, &'a [String]>,
    /// Plugins that are already installed; treated as resolved leaves.
    pub installed: HashSet<&'a str>,
}

impl<'a> DependencyGraph<'a> {
    /// Install order for `roots` and whatever they pull in, excluding installed plugins.
    pub fn install_order(&self, roots: &[&'a str]) -> KernelResult<Vec<String>> {
        let mut marks: HashMap<&'a str, Mark> =
            self.installed.iter().map(|name| (*name, Mark::Done)).collect();
        let mut stack = Vec::new();
        let mut order = Vec::new();
        for root in roots {
            self.visit(*root, &mut marks, &mut stack, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> KernelResult<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                return Err(KernelError::CircularDependency { cycle });
            }
            None => {}
        }

        marks.insert(name, Mark::Visiting);
        stack.push(name);
        for dependency in self.dependencies.get(name).copied().unwrap_or_default() {
            let Some((dep, _)) = self.dependencies.get_key_value(dependency.as_str()) else {
                if self.installed.contains(dependency.as_str()) {
                    continue;
                }
                return Err(KernelError::MissingDependency {
                    plugin: name.to_string(),
                    dependency: dependency.clone(),
                });
            };
            self.visit(*dep, marks, stack, order)?;
        }
        stack.pop();
        marks.insert(name, Mark::Done);
        order.push(name.to_string());
        Ok(())
    }
}

/// Every plugin in `graph` that transitively depends on `target`.
pub fn dependents_of(target: &str, graph: &HashMap<&str, &[String]>) -> HashSet<String> {
    let mut found: HashSet<String> = HashSet::new();
    let mut frontier = vec![target.to_string()];
    while let Some(current) = frontier.pop() {
        for (name, deps) in graph {
            if deps.iter().any(|d| *d == current) && found.insert(name.to_string()) {
                frontier.push(name.to_string());
            }
        }
    }
    found.remove(target);
    found
}
