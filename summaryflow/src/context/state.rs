//! The shared state store threaded through a pipeline run.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{StateKey, StateValue, SummaryPreferences};

/// Key-value store shared by every stage of one pipeline run.
///
/// Writes are last-write-wins. Each run owns its own store, so runs never
/// observe each other's writes.
#[derive(Debug, Default)]
pub struct SharedState {
    data: RwLock<BTreeMap<StateKey, StateValue>>,
}

impl SharedState {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the input text and preferences.
    #[must_use]
    pub fn seeded(input_text: impl Into<String>, preferences: &SummaryPreferences) -> Self {
        let state = Self::new();
        state.set(StateKey::InputText, StateValue::Text(input_text.into()));
        state.set(StateKey::Preferences, StateValue::Record(preferences.to_record()));
        state
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: StateKey) -> Option<StateValue> {
        self.data.read().get(&key).cloned()
    }

    /// Gets a value rendered as prompt text.
    #[must_use]
    pub fn get_text(&self, key: StateKey) -> Option<String> {
        self.data.read().get(&key).map(StateValue::as_prompt_text)
    }

    /// Sets a value, replacing any previous one.
    pub fn set(&self, key: StateKey, value: StateValue) {
        if value.kind() != key.kind() {
            tracing::debug!(
                key = %key,
                declared = %key.kind(),
                actual = %value.kind(),
                "Storing value whose kind differs from the declared kind"
            );
        }
        self.data.write().insert(key, value);
    }

    /// Checks if a key is present.
    #[must_use]
    pub fn contains(&self, key: StateKey) -> bool {
        self.data.read().contains_key(&key)
    }

    /// Returns the present keys in schema order.
    #[must_use]
    pub fn keys(&self) -> Vec<StateKey> {
        self.data.read().keys().copied().collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns a copy of all entries.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<StateKey, StateValue> {
        self.data.read().clone()
    }

    /// Reads the preferences record, falling back to defaults.
    #[must_use]
    pub fn preferences(&self) -> SummaryPreferences {
        match self.get(StateKey::Preferences) {
            Some(StateValue::Record(record)) => serde_json::from_value(record).unwrap_or_default(),
            _ => SummaryPreferences::default(),
        }
    }
}

impl Clone for SharedState {
    fn clone(&self) -> Self {
        Self {
            data: RwLock::new(self.data.read().clone()),
        }
    }
}
