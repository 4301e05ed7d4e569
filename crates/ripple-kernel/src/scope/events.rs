//! Scope events: `on`, `emit` (upward), `broadcast` (downward).
//!
//! Listener lists use tombstones: deregistering nulls the slot so a
//! dispatch that is mid-iteration does not skip its neighbour; the
//! holes are compacted by the next dispatch that encounters them.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ripple_types::Value;

use super::{Scope, ScopeInner};

pub(crate) type EventListenerRc = Rc<dyn Fn(&Event, &[Value])>;

/// The event object listeners receive.
///
/// `current_scope` is the scope whose listeners are being run; it is
/// cleared once dispatch finishes. `stop_propagation` halts the upward
/// walk of an emitted event after the current scope; broadcast events
/// ignore it.
pub struct Event {
    name: String,
    target: Scope,
    current: RefCell<Option<Scope>>,
    default_prevented: Cell<bool>,
    stopped: Cell<bool>,
    stoppable: bool,
}

impl Event {
    fn new(name: &str, target: Scope, stoppable: bool) -> Event {
        Event {
            name: name.to_string(),
            current: RefCell::new(Some(target.clone())),
            target,
            default_prevented: Cell::new(false),
            stopped: Cell::new(false),
            stoppable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope the event was emitted or broadcast from.
    pub fn target_scope(&self) -> Scope {
        self.target.clone()
    }

    /// The scope currently being dispatched to; `None` once dispatch
    /// has returned.
    pub fn current_scope(&self) -> Option<Scope> {
        self.current.borrow().clone()
    }

    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    /// Stop upward propagation after the current scope. Inert on
    /// broadcast events.
    pub fn stop_propagation(&self) {
        if self.stoppable {
            self.stopped.set(true);
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("default_prevented", &self.default_prevented.get())
            .finish_non_exhaustive()
    }
}

/// Deregistration handle for an event listener. Dropping it does NOT
/// deregister.
#[derive(Clone)]
pub struct ListenerHandle {
    scope: Weak<ScopeInner>,
    name: String,
    listener: Weak<dyn Fn(&Event, &[Value])>,
}

impl ListenerHandle {
    /// Null out the listener's slot. Dispatches already in flight see
    /// the tombstone instead of a shifted list.
    pub fn deregister(&self) {
        let Some(inner) = self.scope.upgrade() else {
            return;
        };
        let Some(listener) = self.listener.upgrade() else {
            return;
        };
        let mut listeners = inner.listeners.borrow_mut();
        if let Some(slots) = listeners.get_mut(&self.name) {
            for slot in slots.iter_mut() {
                let matches = slot
                    .as_ref()
                    .map(|rc| Rc::ptr_eq(rc, &listener))
                    .unwrap_or(false);
                if matches {
                    *slot = None;
                    return;
                }
            }
        }
    }
}

impl Scope {
    /// Listen for a named event on this scope.
    pub fn on<F>(&self, name: &str, listener: F) -> ListenerHandle
    where
        F: Fn(&Event, &[Value]) + 'static,
    {
        let rc: EventListenerRc = Rc::new(listener);
        let weak = Rc::downgrade(&rc);
        self.inner
            .listeners
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push(Some(rc));
        ListenerHandle {
            scope: Rc::downgrade(&self.inner),
            name: name.to_string(),
            listener: weak,
        }
    }

    /// Dispatch upward through this scope and its parents. Returns
    /// the event, with `default_prevented` reflecting the listeners.
    pub fn emit(&self, name: &str, args: Vec<Value>) -> Event {
        let event = Event::new(name, self.clone(), true);
        let mut current = Some(self.inner.clone());
        while let Some(inner) = current {
            let scope = Scope {
                inner: inner.clone(),
            };
            *event.current.borrow_mut() = Some(scope.clone());
            dispatch_local(&scope, &event, &args);
            if event.stopped.get() {
                break;
            }
            current = inner.parent.borrow().upgrade();
        }
        *event.current.borrow_mut() = None;
        event
    }

    /// Dispatch downward through the subtree, depth-first. Broadcast
    /// events carry no working `stop_propagation`.
    pub fn broadcast(&self, name: &str, args: Vec<Value>) -> Event {
        let event = Event::new(name, self.clone(), false);
        let mut stack: Vec<Rc<ScopeInner>> = vec![self.inner.clone()];
        while let Some(inner) = stack.pop() {
            let scope = Scope {
                inner: inner.clone(),
            };
            *event.current.borrow_mut() = Some(scope.clone());
            dispatch_local(&scope, &event, &args);
            let children = inner.children.borrow();
            for child in children.iter().rev() {
                stack.push(child.clone());
            }
        }
        *event.current.borrow_mut() = None;
        event
    }
}

/// Run one scope's listeners for an event. Tombstones encountered are
/// compacted in place. The listener count is bounded at entry, so a
/// listener registered during dispatch waits for the next event.
fn dispatch_local(scope: &Scope, event: &Event, args: &[Value]) {
    let mut bound = {
        let listeners = scope.inner.listeners.borrow();
        match listeners.get(event.name()) {
            Some(slots) => slots.len(),
            None => return,
        }
    };
    let mut index = 0;
    while index < bound {
        let listener = {
            let mut listeners = scope.inner.listeners.borrow_mut();
            let Some(slots) = listeners.get_mut(event.name()) else {
                return;
            };
            if index >= slots.len() {
                return;
            }
            match &slots[index] {
                None => {
                    slots.remove(index);
                    bound -= 1;
                    continue;
                }
                Some(rc) => rc.clone(),
            }
        };
        listener(event, args);
        index += 1;
    }
}
