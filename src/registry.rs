//! Variable bookkeeping for a session.
//!
//! Unsolved variables are kept with an occurrence count (the number of stored equations that
//! reference them). A variable lives in exactly one of the unsolved and solved stores: solving
//! moves it across. Names are case-insensitive; they are normalized with [`internal_name`].

use std::collections::HashMap;

/// Stable handle of a registry entry. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct VariableEntry {
    pub id: VariableId,
    /// Internal lowercase name with `_` escaped as `Gg`
    pub name: String,
    pub count: usize,
}

/// Internal spelling of a user identifier.
///
/// Letters are lowercased and `_` becomes `Gg`. An existing `Gg` pair is kept, so the function
/// is idempotent on internal names.
pub fn internal_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '_' => out.push_str("Gg"),
            'G' if chars.peek() == Some(&'g') => {
                chars.next();
                out.push_str("Gg");
            }
            c => out.push(c.to_ascii_lowercase()),
        }
    }
    out
}

#[derive(Debug, Default)]
pub struct VariableRegistry {
    slots: Vec<Option<VariableEntry>>,
    index: HashMap<String, VariableId>,
    solved: HashMap<String, f64>,
    solve_order: Vec<String>,
    original_case: HashMap<String, String>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` occurrences of `name`, creating the entry if needed. Returns its handle.
    pub fn add_count(&mut self, name: &str, n: usize) -> VariableId {
        let key = internal_name(name);
        if let Some(id) = self.index.get(&key) {
            if let Some(Some(entry)) = self.slots.get_mut(id.0) {
                entry.count += n;
            }
            return *id;
        }
        let id = VariableId(self.slots.len());
        self.slots.push(Some(VariableEntry {
            id,
            name: key.clone(),
            count: n,
        }));
        self.index.insert(key, id);
        id
    }

    /// Removes one occurrence; the entry disappears when its count reaches zero.
    /// Returns false if the variable is not registered.
    pub fn erase(&mut self, name: &str) -> bool {
        let key = internal_name(name);
        let Some(id) = self.index.get(&key).copied() else {
            return false;
        };
        let remove = match self.slots.get_mut(id.0) {
            Some(Some(entry)) => {
                entry.count = entry.count.saturating_sub(1);
                entry.count == 0
            }
            _ => false,
        };
        if remove {
            self.remove(&key, id);
        }
        true
    }

    /// Removes the entry regardless of its count.
    pub fn exterminate(&mut self, name: &str) -> bool {
        let key = internal_name(name);
        match self.index.get(&key).copied() {
            Some(id) => {
                self.remove(&key, id);
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, key: &str, id: VariableId) {
        self.index.remove(key);
        if let Some(slot) = self.slots.get_mut(id.0) {
            *slot = None;
        }
    }

    /// Occurrence count of an unsolved variable, 0 if unknown.
    pub fn count(&self, name: &str) -> usize {
        self.get(name).map_or(0, |e| e.count)
    }

    pub fn get(&self, name: &str) -> Option<&VariableEntry> {
        let id = self.index.get(&internal_name(name))?;
        self.slots.get(id.0)?.as_ref()
    }

    pub fn entry(&self, id: VariableId) -> Option<&VariableEntry> {
        self.slots.get(id.0)?.as_ref()
    }

    /// Unsolved entries in registration order.
    pub fn unsolved(&self) -> impl Iterator<Item = &VariableEntry> {
        self.slots.iter().flatten()
    }

    pub fn is_unsolved(&self, name: &str) -> bool {
        self.index.contains_key(&internal_name(name))
    }

    /// Moves `name` into the solved store with `value`.
    pub fn mark_solved(&mut self, name: &str, value: f64) {
        let key = internal_name(name);
        self.exterminate(&key);
        if self.solved.insert(key.clone(), value).is_none() {
            self.solve_order.push(key);
        }
    }

    pub fn solved_value(&self, name: &str) -> Option<f64> {
        self.solved.get(&internal_name(name)).copied()
    }

    pub fn solved(&self) -> &HashMap<String, f64> {
        &self.solved
    }

    /// Solved names in the order they were solved.
    pub fn solve_order(&self) -> &[String] {
        &self.solve_order
    }

    /// Remembers how the user spelled an identifier.
    pub fn record_original_case(&mut self, spelling: &str) {
        self.original_case
            .entry(internal_name(spelling))
            .or_insert_with(|| spelling.to_string());
    }

    /// User-facing name: the recorded spelling, or the internal name with `Gg` → `_`.
    pub fn display_name(&self, name: &str) -> String {
        let key = internal_name(name);
        match self.original_case.get(&key) {
            Some(original) => original.clone(),
            None => key.replace("Gg", "_"),
        }
    }

    /// Reinitializes every store. Handles restart from zero.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_name() {
        assert_eq!(internal_name("Flow_Rate"), "flowGgrate");
        assert_eq!(internal_name("flowGgrate"), "flowGgrate");
        assert_eq!(internal_name("XY"), "xy");
    }

    #[test]
    fn test_counts_are_case_insensitive() {
        let mut registry = VariableRegistry::new();
        let a = registry.add_count("T", 1);
        let b = registry.add_count("t", 2);
        assert_eq!(a, b);
        assert_eq!(registry.count("t"), 3);
        assert_eq!(registry.unsolved().count(), 1);
    }

    #[test]
    fn test_erase_removes_at_zero() {
        let mut registry = VariableRegistry::new();
        registry.add_count("x", 2);
        assert!(registry.erase("x"));
        assert_eq!(registry.count("x"), 1);
        assert!(registry.erase("X"));
        assert!(!registry.is_unsolved("x"));
        assert!(!registry.erase("x"));
    }

    #[test]
    fn test_handles_are_not_reused() {
        let mut registry = VariableRegistry::new();
        let x = registry.add_count("x", 1);
        registry.exterminate("x");
        let y = registry.add_count("y", 1);
        assert_ne!(x, y);
        assert!(registry.entry(x).is_none());
        assert_eq!(registry.entry(y).map(|e| e.name.as_str()), Some("y"));
    }

    #[test]
    fn test_mark_solved_moves_the_variable() {
        let mut registry = VariableRegistry::new();
        registry.add_count("x", 3);
        registry.mark_solved("x", 2.5);
        assert!(!registry.is_unsolved("x"));
        assert_eq!(registry.solved_value("X"), Some(2.5));
        assert_eq!(registry.solve_order(), ["x"]);
    }

    #[test]
    fn test_display_name() {
        let mut registry = VariableRegistry::new();
        registry.record_original_case("Flow_Rate");
        assert_eq!(registry.display_name("flowGgrate"), "Flow_Rate");
        assert_eq!(registry.display_name("inletGgtemp"), "inlet_temp");
    }
}
