//! `watch_collection`: structural change tracking without deep
//! equality.
//!
//! The watched quantity is a monotonic change counter: the getter
//! reconciles the collection against a retained shallow snapshot and
//! bumps the counter per detected difference, so the ordinary
//! identity-comparison digest machinery drives the listener. The
//! listener receives the live collection and a shallow clone retained
//! from the previous fire.

use std::cell::RefCell;
use std::rc::Rc;

use ripple_types::{Value, ValueMap};

use crate::error::Error;
use crate::interpreter::{Accessor, IntoAccessor};

use super::{Scope, WatchHandle};

/// Retained shape of the previous observation.
enum Snapshot {
    Prim(Value),
    Arr(Vec<Value>),
    Obj(ValueMap),
}

struct CollectionState {
    new_value: Value,
    snapshot: Snapshot,
    very_old: Value,
    first_run: bool,
    change_count: u64,
}

impl Scope {
    /// Watch a collection for shallow structural changes: element
    /// count or per-index identity for array-likes, key set and
    /// per-key identity for plain objects, plain inequality for
    /// primitives.
    pub fn watch_collection<E, L>(&self, expr: E, listener: L) -> Result<WatchHandle, Error>
    where
        E: IntoAccessor,
        L: Fn(&Value, &Value, &Scope) + 'static,
    {
        let accessor = expr.into_accessor(self)?;
        let state = Rc::new(RefCell::new(CollectionState {
            new_value: Value::Undefined,
            snapshot: Snapshot::Prim(Value::Undefined),
            very_old: Value::Undefined,
            first_run: true,
            change_count: 0,
        }));

        let getter_state = state.clone();
        let getter = Accessor::from_try_fn(move |scope| {
            let value = accessor.call(scope, None)?;
            let mut s = getter_state.borrow_mut();
            s.new_value = value.clone();
            let old = std::mem::replace(&mut s.snapshot, Snapshot::Prim(Value::Undefined));
            let (snapshot, changes) = reconcile(&value, old);
            s.snapshot = snapshot;
            s.change_count += changes;
            Ok(Value::Num(s.change_count as f64))
        });

        let action_state = state.clone();
        let action = move |_new: &Value, _old: &Value, scope: &Scope| {
            let (value, very_old, first) = {
                let mut s = action_state.borrow_mut();
                let first = s.first_run;
                s.first_run = false;
                (s.new_value.clone(), s.very_old.clone(), first)
            };
            if first {
                listener(&value, &value, scope);
            } else {
                listener(&value, &very_old, scope);
            }
            action_state.borrow_mut().very_old = value.shallow_clone();
        };
        Ok(self.watch_accessor(getter, Rc::new(action), false))
    }
}

/// Compare the new observation against the snapshot, returning the
/// updated snapshot and how many differences were found.
fn reconcile(new: &Value, old: Snapshot) -> (Snapshot, u64) {
    let mut changes = 0;
    if is_array_like(new) {
        let items = array_items(new);
        let mut old_items = match old {
            Snapshot::Arr(items) => items,
            _ => {
                // Switched into array-like mode.
                changes += 1;
                Vec::new()
            }
        };
        if old_items.len() != items.len() {
            changes += 1;
            old_items.resize(items.len(), Value::Undefined);
        }
        for (index, item) in items.iter().enumerate() {
            if !old_items[index].watch_eq(item) {
                changes += 1;
                old_items[index] = item.clone();
            }
        }
        (Snapshot::Arr(old_items), changes)
    } else if let Value::Object(rc) = new {
        let entries: Vec<(String, Value)> = rc
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut old_map = match old {
            Snapshot::Obj(map) => map,
            _ => {
                changes += 1;
                ValueMap::new()
            }
        };
        for (key, value) in &entries {
            match old_map.get(key) {
                Some(old_value) => {
                    if !old_value.watch_eq(value) {
                        changes += 1;
                        old_map.insert(key.clone(), value.clone());
                    }
                }
                None => {
                    changes += 1;
                    old_map.insert(key.clone(), value.clone());
                }
            }
        }
        if old_map.len() > entries.len() {
            // Keys removed.
            changes += 1;
            old_map.retain(|key, _| entries.iter().any(|(k, _)| k == key));
        }
        (Snapshot::Obj(old_map), changes)
    } else {
        match old {
            Snapshot::Prim(old_value) if old_value.watch_eq(new) => {
                (Snapshot::Prim(old_value), 0)
            }
            _ => (Snapshot::Prim(new.clone()), 1),
        }
    }
}

/// Array-like: a real array, or an object with a non-negative integer
/// `length` that is empty or owns the index `length - 1`. A bare map
/// that happens to carry a `length` key does not qualify. Strings are
/// treated as primitives here.
fn is_array_like(v: &Value) -> bool {
    match v {
        Value::Array(_) => true,
        Value::Object(rc) => {
            let map = rc.borrow();
            match map.get("length") {
                Some(Value::Num(n)) => {
                    let n = *n;
                    n >= 0.0
                        && n.fract() == 0.0
                        && (n == 0.0 || map.contains_key(&format!("{}", n as u64 - 1)))
                }
                _ => false,
            }
        }
        _ => false,
    }
}

fn array_items(v: &Value) -> Vec<Value> {
    match v {
        Value::Array(rc) => rc.borrow().clone(),
        Value::Object(rc) => {
            let map = rc.borrow();
            let len = match map.get("length") {
                Some(Value::Num(n)) => *n as usize,
                _ => 0,
            };
            (0..len)
                .map(|i| map.get(&i.to_string()).cloned().unwrap_or_default())
                .collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_like_predicate() {
        assert!(is_array_like(&Value::array(vec![])));

        let mut map = ValueMap::new();
        map.insert("length".into(), Value::Num(2.0));
        map.insert("0".into(), Value::str("a"));
        map.insert("1".into(), Value::str("b"));
        assert!(is_array_like(&Value::object(map)));

        // `length` without ownership of the last index is a plain map.
        let mut bare = ValueMap::new();
        bare.insert("length".into(), Value::Num(2.0));
        assert!(!is_array_like(&Value::object(bare)));

        let mut empty = ValueMap::new();
        empty.insert("length".into(), Value::Num(0.0));
        assert!(is_array_like(&Value::object(empty)));

        assert!(!is_array_like(&Value::str("ab")));
        assert!(!is_array_like(&Value::Num(2.0)));
    }

    #[test]
    fn reconcile_counts_index_changes() {
        let first = Value::array(vec![Value::Num(1.0), Value::Num(2.0)]);
        let (snapshot, changes) = reconcile(&first, Snapshot::Prim(Value::Undefined));
        // Mode switch + length change + two index fills.
        assert_eq!(changes, 4);

        let second = Value::array(vec![Value::Num(1.0), Value::Num(9.0)]);
        let (snapshot, changes) = reconcile(&second, snapshot);
        assert_eq!(changes, 1);

        let (_, changes) = reconcile(&second, snapshot);
        assert_eq!(changes, 0);
    }

    #[test]
    fn reconcile_tracks_object_keys() {
        let mut map = ValueMap::new();
        map.insert("a".into(), Value::Num(1.0));
        let obj = Value::object(map.clone());
        let (snapshot, _) = reconcile(&obj, Snapshot::Prim(Value::Undefined));

        map.insert("b".into(), Value::Num(2.0));
        let obj = Value::object(map.clone());
        let (snapshot, changes) = reconcile(&obj, snapshot);
        assert_eq!(changes, 1);

        map.remove("a");
        map.remove("b");
        let obj = Value::object(map);
        let (_, changes) = reconcile(&obj, snapshot);
        assert_eq!(changes, 1);
    }
}
