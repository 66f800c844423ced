//! Start ordering from declared module dependencies

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::registry::{Registry, Selection};

/// Selected services in start order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOrder {
    services: Vec<String>,
}

impl StartOrder {
    /// Order a selection so every service comes after the selected
    /// services it depends on. Dependencies outside the selection are
    /// ignored; each module is startable on its own.
    pub fn build(registry: &Registry, selection: &Selection) -> Result<Self, OrderError> {
        // name -> selected dependencies
        let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

        for name in selection.iter() {
            let deps: BTreeSet<&str> = registry
                .module(name)
                .map(|m| {
                    m.depends_on
                        .iter()
                        .copied()
                        .filter(|dep| selection.contains(dep))
                        .collect()
                })
                .unwrap_or_default();
            pending.insert(name, deps);
        }

        // Kahn's algorithm; the ready set is ordered by name so the result
        // is deterministic
        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(name, _)| *name)
            .collect();
        let mut services = Vec::with_capacity(pending.len());
        let mut placed: HashSet<&str> = HashSet::new();

        while let Some(name) = ready.pop_first() {
            services.push(name.to_string());
            placed.insert(name);

            for (candidate, deps) in pending.iter_mut() {
                if placed.contains(candidate) || ready.contains(candidate) {
                    continue;
                }
                if deps.remove(name) && deps.is_empty() {
                    ready.insert(*candidate);
                }
            }
        }

        if services.len() != pending.len() {
            let cycle: Vec<String> = pending
                .keys()
                .filter(|name| !placed.contains(*name))
                .map(|name| name.to_string())
                .collect();
            return Err(OrderError::CyclicDependency(cycle));
        }

        Ok(Self { services })
    }

    /// Build directly from an already ordered list
    pub fn from_services(services: Vec<String>) -> Self {
        Self { services }
    }

    pub fn launch_order(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(String::as_str)
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Errors that can occur when ordering services
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Cyclic dependency detected involving modules: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(tokens: &[&str]) -> Vec<String> {
        let registry = Registry::builtin();
        let selection = registry.resolve(tokens).unwrap();
        StartOrder::build(&registry, &selection)
            .unwrap()
            .services()
            .to_vec()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|s| s == name).unwrap()
    }

    #[test]
    fn test_minimal_set_order() {
        let order = order(&["-m"]);
        assert_eq!(order, vec!["mavp2p", "mqtt", "fcm", "vio", "fusion"]);
    }

    #[test]
    fn test_dependencies_come_first() {
        let order = order(&["-a", "simulator"]);
        assert_eq!(order.len(), 11);
        assert!(position(&order, "mqtt") < position(&order, "fcm"));
        assert!(position(&order, "mavp2p") < position(&order, "fcm"));
        assert!(position(&order, "vio") < position(&order, "fusion"));
        assert!(position(&order, "mqtt") < position(&order, "thermal"));
    }

    #[test]
    fn test_unselected_dependencies_ignored() {
        assert_eq!(order(&["fusion", "thermal"]), vec!["fusion", "thermal"]);
    }

    #[test]
    fn test_launch_order_iterates_services() {
        let registry = Registry::builtin();
        let selection = registry.resolve(&["mqtt", "fcm"]).unwrap();
        let order = StartOrder::build(&registry, &selection).unwrap();

        let launch: Vec<_> = order.launch_order().collect();
        assert_eq!(launch, vec!["mqtt", "fcm"]);
        assert_eq!(order.len(), 2);
    }
}
