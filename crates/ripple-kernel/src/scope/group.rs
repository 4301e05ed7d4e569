//! `watch_group`: N accessors, one listener, one deregister.
//!
//! Each accessor gets its own watcher; per-watch changes record into
//! shared new/old arrays, and the first change in a digest schedules a
//! single async action that invokes the group listener. The first
//! invocation passes the same array as new and old; later invocations
//! pass distinct arrays.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ripple_types::Value;

use crate::interpreter::Accessor;

use super::{Scope, WatchHandle};

/// Deregisters every member watch of a group (and disarms the
/// pending async fire of a zero-accessor group).
pub struct WatchGroupHandle {
    handles: Vec<WatchHandle>,
    armed: Option<Rc<Cell<bool>>>,
}

impl WatchGroupHandle {
    pub fn deregister(&self) {
        for handle in &self.handles {
            handle.deregister();
        }
        if let Some(armed) = &self.armed {
            armed.set(false);
        }
    }
}

struct GroupState {
    new_values: Vec<Value>,
    old_values: Vec<Value>,
    scheduled: bool,
    first: bool,
}

impl Scope {
    /// Watch N accessors with one listener, fired at most once per
    /// digest when any member changed. A zero-accessor group fires
    /// exactly once, asynchronously.
    pub fn watch_group<L>(&self, accessors: Vec<Accessor>, listener: L) -> WatchGroupHandle
    where
        L: Fn(&[Value], &[Value], &Scope) + 'static,
    {
        let listener = Rc::new(listener);

        if accessors.is_empty() {
            let armed = Rc::new(Cell::new(true));
            let flag = armed.clone();
            let fire = listener.clone();
            let task = Accessor::from_fn(move |scope| {
                if flag.get() {
                    fire(&[], &[], scope);
                }
                Value::Undefined
            });
            let _ = self.eval_async(task);
            return WatchGroupHandle {
                handles: Vec::new(),
                armed: Some(armed),
            };
        }

        let count = accessors.len();
        let state = Rc::new(RefCell::new(GroupState {
            new_values: vec![Value::Undefined; count],
            old_values: vec![Value::Undefined; count],
            scheduled: false,
            first: true,
        }));

        let mut handles = Vec::with_capacity(count);
        for (index, accessor) in accessors.into_iter().enumerate() {
            let member_state = state.clone();
            let member_listener = listener.clone();
            let sub = move |new: &Value, old: &Value, scope: &Scope| {
                {
                    let mut s = member_state.borrow_mut();
                    s.new_values[index] = new.clone();
                    s.old_values[index] = old.clone();
                    if s.scheduled {
                        return;
                    }
                    s.scheduled = true;
                }
                let action_state = member_state.clone();
                let action_listener = member_listener.clone();
                let action = Accessor::from_fn(move |scope: &Scope| {
                    let first = {
                        let mut s = action_state.borrow_mut();
                        s.scheduled = false;
                        let first = s.first;
                        s.first = false;
                        first
                    };
                    let (news, olds) = {
                        let s = action_state.borrow();
                        (s.new_values.clone(), s.old_values.clone())
                    };
                    if first {
                        action_listener(&news, &news, scope);
                    } else {
                        action_listener(&news, &olds, scope);
                    }
                    Value::Undefined
                });
                let _ = scope.eval_async(action);
            };
            handles.push(self.watch_accessor(accessor, Rc::new(sub), false));
        }
        WatchGroupHandle {
            handles,
            armed: None,
        }
    }
}
