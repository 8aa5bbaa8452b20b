use std::collections::HashMap;
use std::sync::Arc;

use super::DynAction;
use crate::types::ActionDefinition;

/// Process-wide set of locally executable actions
///
/// Populated when the runtime is built and read-only afterwards. Actions
/// scoped to a single request go into a [`ScopedActions`] overlay instead.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn DynAction>>,
    order: Vec<String>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action, replacing any earlier one with the same name
    pub fn register(&mut self, action: Arc<dyn DynAction>) {
        let name = action.name().to_string();
        if self.actions.insert(name.clone(), action).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DynAction>> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Definitions in registration order
    pub fn definitions(&self) -> Vec<ActionDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.actions.get(name))
            .map(|action| action.definition())
            .collect()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.order)
            .finish()
    }
}

/// The process-wide registry plus actions that live for one request
///
/// Lookups check the request's own actions first. The shared registry is
/// never mutated.
#[derive(Clone)]
pub struct ScopedActions {
    base: Arc<ActionRegistry>,
    ephemeral: ActionRegistry,
}

impl ScopedActions {
    pub fn new(base: Arc<ActionRegistry>) -> Self {
        Self {
            base,
            ephemeral: ActionRegistry::new(),
        }
    }

    pub fn with_action(mut self, action: Arc<dyn DynAction>) -> Self {
        self.ephemeral.register(action);
        self
    }

    pub fn add(&mut self, action: Arc<dyn DynAction>) {
        self.ephemeral.register(action);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DynAction>> {
        self.ephemeral.get(name).or_else(|| self.base.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Definitions of every reachable action, request-scoped ones first
    pub fn definitions(&self) -> Vec<ActionDefinition> {
        let mut defs = self.ephemeral.definitions();
        defs.extend(
            self.base
                .definitions()
                .into_iter()
                .filter(|d| !self.ephemeral.contains(&d.name)),
        );
        defs
    }
}

impl std::fmt::Debug for ScopedActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedActions")
            .field("base", &self.base)
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionResult, FnAction};

    fn action(name: &str, reply: &'static str) -> Arc<dyn DynAction> {
        FnAction::new(name, "test", move |_| async move { Ok(ActionResult::text(reply)) }).boxed()
    }

    #[test]
    fn test_register_replaces_and_keeps_order() {
        let mut registry = ActionRegistry::new();
        registry.register(action("a", "1"));
        registry.register(action("b", "2"));
        registry.register(action("a", "3"));

        assert_eq!(registry.len(), 2);
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_scoped_overlay_shadows_without_mutating_base() {
        let mut base = ActionRegistry::new();
        base.register(action("lookup", "base"));
        let base = Arc::new(base);

        let scoped = ScopedActions::new(base.clone())
            .with_action(action("lookup", "request"))
            .with_action(action("extra", "x"));

        let result = scoped
            .get("lookup")
            .unwrap()
            .execute_raw(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result, ActionResult::text("request"));
        assert_eq!(scoped.definitions().len(), 2);

        assert_eq!(base.len(), 1);
        assert!(!base.contains("extra"));
    }
}
