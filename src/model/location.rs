use std::collections::{BTreeMap, BTreeSet};

use crate::model::container::{Container, ContainerId};

/// Free-form value attached to a `Location` via the `VIRTUAL_HOST` extras
/// segment (the tokens after the first `;`). Merge semantics per spec.md §3:
/// sets union, maps union (recursively), lists extend, scalars last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraValue {
    Scalar(String),
    List(Vec<String>),
    Set(BTreeSet<String>),
    Map(BTreeMap<String, ExtraValue>),
}

impl ExtraValue {
    fn merge(&mut self, incoming: ExtraValue) {
        match (self, incoming) {
            (ExtraValue::Set(existing), ExtraValue::Set(new)) => existing.extend(new),
            (ExtraValue::Map(existing), ExtraValue::Map(new)) => {
                for (k, v) in new {
                    existing
                        .entry(k)
                        .and_modify(|e| e.merge(v.clone()))
                        .or_insert(v);
                }
            }
            (ExtraValue::List(existing), ExtraValue::List(new)) => existing.extend(new),
            (slot, new) => *slot = new,
        }
    }
}

/// A path under a `Host`, with the set of containers serving it.
///
/// Empty (per spec.md §3) iff its container set is empty — callers check
/// `is_empty()` after a removal to decide whether to prune the location.
#[derive(Debug, Clone)]
pub struct Location {
    pub path: String,
    pub http: bool,
    pub websocket: bool,
    pub containers: BTreeSet<Container>,
    pub extras: BTreeMap<String, ExtraValue>,
}

impl Location {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            http: false,
            websocket: false,
            containers: BTreeSet::new(),
            extras: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, container: Container) {
        self.containers.replace(container);
    }

    /// Returns `true` iff `id` was present and removed.
    pub fn remove(&mut self, id: &ContainerId) -> bool {
        let before = self.containers.len();
        self.containers.retain(|c| &c.id != id);
        self.containers.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Deep-merge an incoming extras map into this location's extras,
    /// per spec.md §3 merge rules. Idempotent: applying the same extras
    /// twice yields the same result (set/map union and list-extend of an
    /// already-present element are no-ops; last-writer-wins scalars are
    /// stable under repetition of the same value).
    pub fn update_extras(&mut self, incoming: BTreeMap<String, ExtraValue>) {
        for (key, value) in incoming {
            self.extras
                .entry(key)
                .and_modify(|existing| existing.merge(value.clone()))
                .or_insert(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(id: &str) -> Container {
        Container::new(id.into(), "http".into(), "10.0.0.1".into(), 80, "/".into())
    }

    #[test]
    fn add_then_remove() {
        let mut loc = Location::new("/");
        loc.add(c("a"));
        assert!(!loc.is_empty());
        assert!(loc.remove(&"a".into()));
        assert!(loc.is_empty());
    }

    #[test]
    fn remove_missing_returns_false() {
        let mut loc = Location::new("/");
        assert!(!loc.remove(&"missing".into()));
    }

    #[test]
    fn extras_set_union() {
        let mut loc = Location::new("/");
        let mut first = BTreeMap::new();
        first.insert(
            "tags".to_string(),
            ExtraValue::Set(BTreeSet::from(["a".to_string()])),
        );
        loc.update_extras(first.clone());

        let mut second = BTreeMap::new();
        second.insert(
            "tags".to_string(),
            ExtraValue::Set(BTreeSet::from(["b".to_string()])),
        );
        loc.update_extras(second);

        assert_eq!(
            loc.extras.get("tags"),
            Some(&ExtraValue::Set(BTreeSet::from(["a".to_string(), "b".to_string()])))
        );
    }

    #[test]
    fn extras_merge_is_idempotent() {
        let mut loc = Location::new("/");
        let mut extras = BTreeMap::new();
        extras.insert(
            "tags".to_string(),
            ExtraValue::Set(BTreeSet::from(["a".to_string()])),
        );
        extras.insert("note".to_string(), ExtraValue::Scalar("x".to_string()));

        loc.update_extras(extras.clone());
        let after_first = loc.extras.clone();
        loc.update_extras(extras);
        assert_eq!(loc.extras, after_first);
    }

    #[test]
    fn extras_list_extends() {
        let mut loc = Location::new("/");
        let mut first = BTreeMap::new();
        first.insert(
            "order".to_string(),
            ExtraValue::List(vec!["1".to_string()]),
        );
        loc.update_extras(first);

        let mut second = BTreeMap::new();
        second.insert(
            "order".to_string(),
            ExtraValue::List(vec!["2".to_string()]),
        );
        loc.update_extras(second);

        assert_eq!(
            loc.extras.get("order"),
            Some(&ExtraValue::List(vec!["1".to_string(), "2".to_string()]))
        );
    }

    #[test]
    fn extras_scalar_last_writer_wins() {
        let mut loc = Location::new("/");
        let mut first = BTreeMap::new();
        first.insert("note".to_string(), ExtraValue::Scalar("old".to_string()));
        loc.update_extras(first);

        let mut second = BTreeMap::new();
        second.insert("note".to_string(), ExtraValue::Scalar("new".to_string()));
        loc.update_extras(second);

        assert_eq!(
            loc.extras.get("note"),
            Some(&ExtraValue::Scalar("new".to_string()))
        );
    }
}
