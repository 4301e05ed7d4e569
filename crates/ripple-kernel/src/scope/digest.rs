//! The digest: a stabilising fixed-point sweep over the scope tree.
//!
//! One digest repeatedly (a) drains the async queue and (b) runs a
//! dirty-checking pass over the whole tree under root until a pass
//! finds nothing dirty and no async work remains, then drains the
//! post-digest queue.
//! A TTL bounds the number of dirty passes; exhausting it clears the
//! phase and raises `TtlExceeded` WITHOUT running post-digest tasks.
//!
//! The `last_dirty` marker on root short-circuits the common case: a
//! pass that cleanly reaches the most recently dirty watcher proves
//! every other watcher was already checked clean, so the walk aborts.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use super::{
    one_time_defined, remove_watcher, Last, Phase, Scope, ScopeError, WatchKind, Watcher,
};

impl Scope {
    /// Run the digest until it stabilises. The digest may be requested
    /// on any scope, but the sweep always advances across the whole
    /// tree under root, where phase, TTL, and the applyAsync timer
    /// also live.
    pub fn digest(&self) -> Result<(), ScopeError> {
        let root = self.root();
        root.begin_phase(Phase::Digest)?;
        root.inner.last_dirty.set(None);

        // A digest that starts before the applyAsync tick fires takes
        // over the flush, preserving ordering.
        if let Some(task_id) = root.inner.apply_async_id.take() {
            self.inner.ctx.scheduler.cancel(task_id);
            root.flush_apply_async();
        }

        let ttl = self.inner.ctx.ttl;
        let mut dirty_sweeps = 0usize;
        loop {
            self.drain_async_queue();
            let dirty = root.dirty_check_pass();
            if !dirty && self.inner.async_queue.borrow().is_empty() {
                break;
            }
            dirty_sweeps += 1;
            if dirty_sweeps > ttl {
                root.clear_phase();
                return Err(ScopeError::TtlExceeded { ttl });
            }
        }
        trace!(sweeps = dirty_sweeps, "digest stabilised");

        self.drain_post_digest();
        root.clear_phase();
        Ok(())
    }

    /// One dirty-checking pass over the tree, root-first, each scope's
    /// watchers iterated right-to-left over a snapshot taken on visit
    /// (so registrations during the pass are not visited by it).
    /// Returns whether anything was dirty. Called on the root.
    fn dirty_check_pass(&self) -> bool {
        let mut dirty = false;
        let mut stack: Vec<Rc<super::ScopeInner>> = vec![self.inner.clone()];
        'walk: while let Some(inner) = stack.pop() {
            if inner.destroyed.get() {
                continue;
            }
            let scope = Scope {
                inner: inner.clone(),
            };
            let snapshot: Vec<Rc<RefCell<Watcher>>> = inner.watchers.borrow().clone();
            for entry in snapshot.iter().rev() {
                if inner.destroyed.get() {
                    // A listener destroyed the scope mid-pass.
                    continue 'walk;
                }
                let (id, get, value_eq, kind) = {
                    let w = entry.borrow();
                    if !w.alive {
                        continue;
                    }
                    (w.id, w.get.clone(), w.value_eq, w.kind)
                };
                let new = match get.call(&scope, None) {
                    Ok(value) => value,
                    Err(e) => {
                        scope.report(e.into());
                        continue;
                    }
                };
                let (changed, old_for_listener) = {
                    let w = entry.borrow();
                    match &w.last {
                        // First evaluation: dirty, and the listener
                        // sees old == new rather than the sentinel.
                        Last::Uninit => (true, new.clone()),
                        Last::Seen(last) => {
                            let unchanged = if value_eq {
                                last.deep_eq(&new)
                            } else {
                                last.watch_eq(&new)
                            };
                            (!unchanged, last.clone())
                        }
                    }
                };
                if changed {
                    {
                        let mut w = entry.borrow_mut();
                        w.last = Last::Seen(if value_eq { new.deep_clone() } else { new.clone() });
                    }
                    self.inner.last_dirty.set(Some(id));
                    dirty = true;
                    let listener = entry.borrow().listener.clone();
                    listener(&new, &old_for_listener, &scope);
                    match kind {
                        WatchKind::Normal => {}
                        WatchKind::Constant => remove_watcher(&inner, id),
                        WatchKind::OneTime { literal } => {
                            self.schedule_one_time_unwatch(&inner, id, literal, &new)
                        }
                    }
                } else if self.inner.last_dirty.get() == Some(id) {
                    // Clean sweep reached the last dirty watcher:
                    // everything else is already proven clean.
                    break 'walk;
                }
            }
            let children = inner.children.borrow();
            for child in children.iter().rev() {
                stack.push(child.clone());
            }
        }
        dirty
    }

    /// A one-time watch that just saw a defined value deregisters in
    /// post-digest, where the value is re-checked so a later sweep
    /// turning it undefined again keeps the watch alive.
    fn schedule_one_time_unwatch(
        &self,
        inner: &Rc<super::ScopeInner>,
        id: u64,
        literal: bool,
        value: &ripple_types::Value,
    ) {
        if !one_time_defined(value, literal) {
            return;
        }
        let weak = Rc::downgrade(inner);
        self.post_digest(move || {
            let Some(strong) = weak.upgrade() else { return };
            let still_defined = strong
                .watchers
                .borrow()
                .iter()
                .find(|w| w.borrow().id == id)
                .map(|w| match &w.borrow().last {
                    Last::Seen(v) => one_time_defined(v, literal),
                    Last::Uninit => false,
                });
            if still_defined == Some(true) {
                remove_watcher(&strong, id);
            }
        });
    }

    /// FIFO drain of queued async tasks, each evaluated on its
    /// originating scope; destroyed scopes drop their tasks. Every
    /// drained task invalidates the short-circuit marker.
    fn drain_async_queue(&self) {
        loop {
            let task = self.inner.async_queue.borrow_mut().pop_front();
            let Some(task) = task else { break };
            self.root_rc().last_dirty.set(None);
            if let Some(inner) = task.scope.upgrade() {
                if inner.destroyed.get() {
                    continue;
                }
                let scope = Scope { inner };
                if let Err(e) = task.accessor.call(&scope, None) {
                    scope.report(e.into());
                }
            }
        }
    }

    fn drain_post_digest(&self) {
        loop {
            let task = self.inner.post_digest_queue.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }
}
