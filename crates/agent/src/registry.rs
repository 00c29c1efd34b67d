use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use parley_core::ConversationId;

/// Conversations currently assigned to this agent.
///
/// Only the owner (the lifecycle handler) can mutate membership. Every other
/// component holds a [`RegistryReader`]. Reads and writes are serialized by
/// the notification loop.
#[derive(Debug, Default)]
pub struct ConversationRegistry {
    inner: Arc<RwLock<HashSet<ConversationId>>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).contains(id)
    }

    /// Returns `true` when the conversation was not already present.
    pub fn add(&mut self, id: ConversationId) -> bool {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).insert(id)
    }

    /// Returns `true` when the conversation was present.
    pub fn remove(&mut self, id: &ConversationId) -> bool {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reader(&self) -> RegistryReader {
        RegistryReader { inner: Arc::clone(&self.inner) }
    }
}

#[derive(Clone, Debug)]
pub struct RegistryReader {
    inner: Arc<RwLock<HashSet<ConversationId>>>,
}

impl RegistryReader {
    pub fn contains(&self, id: &ConversationId) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of the current membership.
    pub fn snapshot(&self) -> Vec<ConversationId> {
        let mut ids: Vec<ConversationId> =
            self.inner.read().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use parley_core::ConversationId;

    use super::ConversationRegistry;

    #[test]
    fn add_and_remove_report_membership_changes() {
        let mut registry = ConversationRegistry::new();
        let id = ConversationId::new("C1");

        assert!(registry.add(id.clone()));
        assert!(!registry.add(id.clone()));
        assert!(registry.contains(&id));

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn reader_observes_owner_mutations() {
        let mut registry = ConversationRegistry::new();
        let reader = registry.reader();

        registry.add(ConversationId::new("C2"));
        registry.add(ConversationId::new("C1"));

        assert_eq!(reader.len(), 2);
        assert_eq!(reader.snapshot(), vec![ConversationId::new("C1"), ConversationId::new("C2")]);

        registry.remove(&ConversationId::new("C2"));
        assert!(!reader.contains(&ConversationId::new("C2")));
    }
}
