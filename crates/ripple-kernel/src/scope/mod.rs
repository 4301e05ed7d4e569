//! The scope tree: evaluation contexts carrying watchers, queues and
//! data.
//!
//! A `Scope` is a cheap handle (`Rc` inner) onto a node of the tree.
//! Parent→child links are strong; child→parent and child→root links
//! are weak, so dropping a root releases its subtree. Data lookup
//! delegates along a separate chain: a non-isolated child resolves
//! property misses through the scope it was created from, while writes
//! always land in the owning scope's map (copy-on-write shadowing).
//! Isolated children break the data chain but keep sharing the async
//! queues, which are aliased `Rc` handles cloned from the tree parent,
//! so enqueues from anywhere in the tree converge on root's drain.

mod collection;
mod digest;
mod events;
mod group;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ripple_types::{Value, ValueMap};

use crate::error::Error;
use crate::filters::FilterRegistry;
use crate::interpreter::{Accessor, IntoAccessor};
use crate::scheduler::{TaskId, TickScheduler};
use crate::sink::{SinkHandle, TracingSink};

pub use events::{Event, ListenerHandle};
pub use group::WatchGroupHandle;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// The re-entrancy lock over digest and apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Apply,
    Digest,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Apply => write!(f, "apply"),
            Phase::Digest => write!(f, "digest"),
        }
    }
}

/// Errors raised by the digest engine itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScopeError {
    /// A digest or apply was requested while another was running.
    #[error("cannot begin {attempted} while {active} is already in progress")]
    PhaseConflict { attempted: Phase, active: Phase },
    /// The digest did not stabilise within the TTL.
    #[error("{ttl} digest iterations reached without stabilising; watchers may be mutually firing")]
    TtlExceeded { ttl: usize },
}

/// Configuration for a root scope.
pub struct RootConfig {
    /// Maximum dirty digest sweeps before giving up. Default 10.
    pub ttl: usize,
    /// Where caught user errors go. Default: the tracing sink.
    pub sink: SinkHandle,
    /// Whether the builtin filters are preregistered. Default true.
    pub builtin_filters: bool,
}

impl Default for RootConfig {
    fn default() -> Self {
        RootConfig {
            ttl: 10,
            sink: Rc::new(TracingSink),
            builtin_filters: true,
        }
    }
}

/// Engine-wide shared state, owned by the root and aliased by every
/// scope in the tree.
pub(crate) struct EngineCtx {
    pub(crate) filters: FilterRegistry,
    pub(crate) sink: SinkHandle,
    pub(crate) scheduler: TickScheduler,
    pub(crate) cache: RefCell<HashMap<String, Accessor>>,
    pub(crate) ttl: usize,
}

pub(crate) type WatchListener = Rc<dyn Fn(&Value, &Value, &Scope)>;

/// How the digest treats a watcher after it fires.
#[derive(Clone, Copy)]
pub(crate) enum WatchKind {
    Normal,
    /// Constant accessor: deregister after the first listener call.
    Constant,
    /// `::` accessor: deregister in post-digest once the value is
    /// defined (all elements defined, for literals).
    OneTime { literal: bool },
}

pub(crate) enum Last {
    Uninit,
    Seen(Value),
}

pub(crate) struct Watcher {
    pub(crate) id: u64,
    pub(crate) get: Accessor,
    pub(crate) listener: WatchListener,
    pub(crate) value_eq: bool,
    pub(crate) kind: WatchKind,
    pub(crate) last: Last,
    pub(crate) alive: bool,
}

/// A task queued by `eval_async` / `apply_async`: an accessor plus the
/// scope it should run on. Destroyed scopes turn their tasks into
/// no-ops.
pub(crate) struct AsyncTask {
    pub(crate) scope: Weak<ScopeInner>,
    pub(crate) accessor: Accessor,
}

type PostDigestTask = Box<dyn FnOnce()>;

pub(crate) struct ScopeInner {
    pub(crate) id: u64,
    pub(crate) ctx: Rc<EngineCtx>,
    /// Tree parent; cleared on destroy.
    pub(crate) parent: RefCell<Weak<ScopeInner>>,
    /// Data-delegation parent; dead for roots and isolated scopes.
    pub(crate) data_parent: Weak<ScopeInner>,
    pub(crate) root: Weak<ScopeInner>,
    pub(crate) children: RefCell<Vec<Rc<ScopeInner>>>,
    pub(crate) props: Rc<RefCell<ValueMap>>,
    pub(crate) watchers: RefCell<Vec<Rc<RefCell<Watcher>>>>,
    pub(crate) listeners: RefCell<HashMap<String, Vec<Option<events::EventListenerRc>>>>,
    pub(crate) destroyed: Cell<bool>,
    // Root-resident state; unused on non-root scopes.
    pub(crate) phase: Cell<Phase>,
    pub(crate) last_dirty: Cell<Option<u64>>,
    pub(crate) apply_async_id: Cell<Option<TaskId>>,
    // Queues, aliased across the whole tree.
    pub(crate) async_queue: Rc<RefCell<VecDeque<AsyncTask>>>,
    pub(crate) post_digest_queue: Rc<RefCell<VecDeque<PostDigestTask>>>,
    pub(crate) apply_async_queue: Rc<RefCell<VecDeque<AsyncTask>>>,
}

/// A node in the scope tree. Cloning clones the handle.
#[derive(Clone)]
pub struct Scope {
    pub(crate) inner: Rc<ScopeInner>,
}

impl PartialEq for Scope {
    fn eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}

/// Deregistration handle for a watch. Dropping it does NOT deregister.
#[derive(Clone)]
pub struct WatchHandle {
    scope: Weak<ScopeInner>,
    id: u64,
}

impl WatchHandle {
    /// Remove the watch. Safe to call more than once.
    pub fn deregister(&self) {
        if let Some(inner) = self.scope.upgrade() {
            remove_watcher(&inner, self.id);
        }
    }

    pub(crate) fn dead() -> WatchHandle {
        WatchHandle {
            scope: Weak::new(),
            id: 0,
        }
    }
}

pub(crate) fn remove_watcher(inner: &Rc<ScopeInner>, id: u64) {
    let mut watchers = inner.watchers.borrow_mut();
    if let Some(pos) = watchers.iter().position(|w| w.borrow().id == id) {
        watchers[pos].borrow_mut().alive = false;
        watchers.remove(pos);
        drop(watchers);
        // Removal invalidates the short-circuit marker.
        if let Some(root) = inner.root.upgrade() {
            root.last_dirty.set(None);
        }
    }
}

impl Scope {
    /// Create a root scope with default configuration.
    pub fn new_root() -> Scope {
        Scope::with_config(RootConfig::default())
    }

    /// Create a root scope with explicit configuration.
    pub fn with_config(config: RootConfig) -> Scope {
        let filters = if config.builtin_filters {
            FilterRegistry::with_builtins()
        } else {
            FilterRegistry::new()
        };
        let ctx = Rc::new(EngineCtx {
            filters,
            sink: config.sink,
            scheduler: TickScheduler::new(),
            cache: RefCell::new(HashMap::new()),
            ttl: config.ttl,
        });
        let inner = Rc::new_cyclic(|weak_self: &Weak<ScopeInner>| ScopeInner {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            ctx,
            parent: RefCell::new(Weak::new()),
            data_parent: Weak::new(),
            root: weak_self.clone(),
            children: RefCell::new(Vec::new()),
            props: Rc::new(RefCell::new(ValueMap::new())),
            watchers: RefCell::new(Vec::new()),
            listeners: RefCell::new(HashMap::new()),
            destroyed: Cell::new(false),
            phase: Cell::new(Phase::Idle),
            last_dirty: Cell::new(None),
            apply_async_id: Cell::new(None),
            async_queue: Rc::new(RefCell::new(VecDeque::new())),
            post_digest_queue: Rc::new(RefCell::new(VecDeque::new())),
            apply_async_queue: Rc::new(RefCell::new(VecDeque::new())),
        });
        Scope { inner }
    }

    /// Create a child scope. A non-isolated child sees this scope's
    /// properties through delegation; an isolated child starts with an
    /// independent namespace. Both share the tree's queues.
    pub fn new_child(&self, isolated: bool) -> Scope {
        self.new_child_of(isolated, self)
    }

    /// Create a child attached to `parent` in the tree while
    /// delegating data lookups to this scope (the reference's
    /// transcluded-scope arrangement).
    pub fn new_child_of(&self, isolated: bool, parent: &Scope) -> Scope {
        let inner = Rc::new(ScopeInner {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            ctx: parent.inner.ctx.clone(),
            parent: RefCell::new(Rc::downgrade(&parent.inner)),
            data_parent: if isolated {
                Weak::new()
            } else {
                Rc::downgrade(&self.inner)
            },
            root: parent.inner.root.clone(),
            children: RefCell::new(Vec::new()),
            props: Rc::new(RefCell::new(ValueMap::new())),
            watchers: RefCell::new(Vec::new()),
            listeners: RefCell::new(HashMap::new()),
            destroyed: Cell::new(false),
            phase: Cell::new(Phase::Idle),
            last_dirty: Cell::new(None),
            apply_async_id: Cell::new(None),
            async_queue: parent.inner.async_queue.clone(),
            post_digest_queue: parent.inner.post_digest_queue.clone(),
            apply_async_queue: parent.inner.apply_async_queue.clone(),
        });
        parent.inner.children.borrow_mut().push(inner.clone());
        Scope { inner }
    }

    // ═══════════════════════════════════════════════════════════════
    // Tree navigation
    // ═══════════════════════════════════════════════════════════════

    pub(crate) fn root_rc(&self) -> Rc<ScopeInner> {
        self.inner
            .root
            .upgrade()
            .unwrap_or_else(|| self.inner.clone())
    }

    /// The tree root.
    pub fn root(&self) -> Scope {
        Scope {
            inner: self.root_rc(),
        }
    }

    /// The tree parent, if attached.
    pub fn parent(&self) -> Option<Scope> {
        self.inner
            .parent
            .borrow()
            .upgrade()
            .map(|inner| Scope { inner })
    }

    pub fn is_root(&self) -> bool {
        Rc::ptr_eq(&self.inner, &self.root_rc())
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    pub(crate) fn ctx(&self) -> &Rc<EngineCtx> {
        &self.inner.ctx
    }

    /// The filter registry shared by the whole tree.
    pub fn filters(&self) -> FilterRegistry {
        self.inner.ctx.filters.clone()
    }

    /// The deferred-task queue the tree schedules ticks on. Embedders
    /// pump it with `flush()` when their event loop is idle.
    pub fn scheduler(&self) -> TickScheduler {
        self.inner.ctx.scheduler.clone()
    }

    pub(crate) fn report(&self, error: Error) {
        self.inner.ctx.sink.report(&error);
    }

    // ═══════════════════════════════════════════════════════════════
    // Data access
    // ═══════════════════════════════════════════════════════════════

    /// Read a property, delegating along the data chain. Missing
    /// properties are `Undefined`.
    pub fn get(&self, name: &str) -> Value {
        self.lookup_value(name).unwrap_or_default()
    }

    /// Write a property into this scope's own map, shadowing any
    /// delegated value.
    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.inner
            .props
            .borrow_mut()
            .insert(name.to_string(), value.into());
    }

    /// Remove an own property. Delegated values are untouched.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.inner.props.borrow_mut().remove(name)
    }

    pub(crate) fn lookup_value(&self, name: &str) -> Option<Value> {
        let mut current = Some(self.inner.clone());
        while let Some(inner) = current {
            if let Some(value) = inner.props.borrow().get(name) {
                return Some(value.clone());
            }
            current = inner.data_parent.upgrade();
        }
        None
    }

    /// Resolve a name to its value and the property map owning it
    /// (as an object value) — the receiver for bare function calls.
    pub(crate) fn lookup_owner(&self, name: &str) -> Option<(Value, Value)> {
        let mut current = Some(self.inner.clone());
        while let Some(inner) = current {
            let owned = inner.props.borrow().get(name).cloned();
            if let Some(value) = owned {
                return Some((value, Value::Object(inner.props.clone())));
            }
            current = inner.data_parent.upgrade();
        }
        None
    }

    /// This scope's own property map as an object value — what `this`
    /// evaluates to.
    pub(crate) fn props_value(&self) -> Value {
        Value::Object(self.inner.props.clone())
    }

    // ═══════════════════════════════════════════════════════════════
    // Expressions
    // ═══════════════════════════════════════════════════════════════

    /// The parse facade: compile (through the per-root cache) or pass
    /// an accessor through.
    pub fn accessor<E: IntoAccessor>(&self, expr: E) -> Result<Accessor, Error> {
        expr.into_accessor(self)
    }

    pub(crate) fn cached_accessor(&self, src: &str) -> Result<Accessor, Error> {
        if let Some(accessor) = self.inner.ctx.cache.borrow().get(src) {
            return Ok(accessor.clone());
        }
        let accessor = Accessor::compile(src, &self.inner.ctx.filters)?;
        self.inner
            .ctx
            .cache
            .borrow_mut()
            .insert(src.to_string(), accessor.clone());
        Ok(accessor)
    }

    /// Evaluate an expression against this scope.
    pub fn eval<E: IntoAccessor>(&self, expr: E) -> Result<Value, Error> {
        let accessor = expr.into_accessor(self)?;
        Ok(accessor.call(self, None)?)
    }

    /// Evaluate with a locals object shadowing identifier resolution.
    pub fn eval_with<E: IntoAccessor>(&self, expr: E, locals: &Value) -> Result<Value, Error> {
        let accessor = expr.into_accessor(self)?;
        Ok(accessor.call(self, Some(locals))?)
    }

    /// Evaluate inside the apply phase, then digest from root.
    /// Expression errors are routed to the sink (the digest still
    /// runs); phase and TTL errors propagate.
    pub fn apply<E: IntoAccessor>(&self, expr: E) -> Result<Value, Error> {
        let accessor = expr.into_accessor(self)?;
        let root = self.root();
        root.begin_phase(Phase::Apply)?;
        let value = match accessor.call(self, None) {
            Ok(value) => value,
            Err(e) => {
                self.report(e.into());
                Value::Undefined
            }
        };
        root.clear_phase();
        root.digest()?;
        Ok(value)
    }

    /// Queue an expression for evaluation on this scope during the
    /// current digest, or a freshly scheduled one if the engine is
    /// idle.
    pub fn eval_async<E: IntoAccessor>(&self, expr: E) -> Result<(), Error> {
        let accessor = expr.into_accessor(self)?;
        let root_rc = self.root_rc();
        if root_rc.phase.get() == Phase::Idle && self.inner.async_queue.borrow().is_empty() {
            let weak_root = Rc::downgrade(&root_rc);
            self.inner.ctx.scheduler.defer(Box::new(move || {
                if let Some(inner) = weak_root.upgrade() {
                    let root = Scope { inner };
                    if !root.inner.async_queue.borrow().is_empty() {
                        if let Err(e) = root.digest() {
                            root.report(e.into());
                        }
                    }
                }
            }));
        }
        self.inner.async_queue.borrow_mut().push_back(AsyncTask {
            scope: Rc::downgrade(&self.inner),
            accessor,
        });
        Ok(())
    }

    /// Queue an expression to be applied later; calls coalesce into a
    /// single root digest on the scheduled tick, or into a digest that
    /// starts before the tick fires.
    pub fn apply_async<E: IntoAccessor>(&self, expr: E) -> Result<(), Error> {
        let accessor = expr.into_accessor(self)?;
        let root_rc = self.root_rc();
        root_rc
            .apply_async_queue
            .borrow_mut()
            .push_back(AsyncTask {
                scope: Rc::downgrade(&self.inner),
                accessor,
            });
        if root_rc.apply_async_id.get().is_none() {
            let weak_root = Rc::downgrade(&root_rc);
            let id = self.inner.ctx.scheduler.defer(Box::new(move || {
                if let Some(inner) = weak_root.upgrade() {
                    let root = Scope { inner };
                    let flusher = root.clone();
                    let result = root.apply(Accessor::from_fn(move |_| {
                        flusher.flush_apply_async();
                        Value::Undefined
                    }));
                    if let Err(e) = result {
                        root.report(e);
                    }
                }
            }));
            root_rc.apply_async_id.set(Some(id));
        }
        Ok(())
    }

    /// Drain the applyAsync queue, reporting per-task errors. Clears
    /// the pending-timer marker.
    pub(crate) fn flush_apply_async(&self) {
        loop {
            let task = self.inner.apply_async_queue.borrow_mut().pop_front();
            let Some(task) = task else { break };
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
        self.root_rc().apply_async_id.set(None);
    }

    /// Run a callback after the current (or next) digest converges.
    pub fn post_digest(&self, f: impl FnOnce() + 'static) {
        self.inner.post_digest_queue.borrow_mut().push_back(Box::new(f));
    }

    // ═══════════════════════════════════════════════════════════════
    // Watch registration
    // ═══════════════════════════════════════════════════════════════

    /// Register a watcher. The listener fires with `(new, old, scope)`
    /// whenever the digest observes a change; on the first fire, `old`
    /// equals `new`. With `value_eq`, comparison is structural and the
    /// retained value is a deep clone.
    ///
    /// Constant expressions self-deregister after the first fire;
    /// `::` expressions deregister post-digest once defined.
    pub fn watch<E, L>(&self, expr: E, listener: L, value_eq: bool) -> Result<WatchHandle, Error>
    where
        E: IntoAccessor,
        L: Fn(&Value, &Value, &Scope) + 'static,
    {
        let accessor = expr.into_accessor(self)?;
        Ok(self.watch_accessor(accessor, Rc::new(listener), value_eq))
    }

    pub(crate) fn watch_accessor(
        &self,
        accessor: Accessor,
        listener: WatchListener,
        value_eq: bool,
    ) -> WatchHandle {
        if self.inner.destroyed.get() {
            return WatchHandle::dead();
        }
        let kind = if accessor.is_constant() {
            WatchKind::Constant
        } else if accessor.is_one_time() {
            WatchKind::OneTime {
                literal: accessor.is_literal(),
            }
        } else {
            WatchKind::Normal
        };
        // Identity watches over expressions with extractable inputs
        // recompute only when an input changes, so expressions that
        // build fresh containers each evaluation still converge.
        let get = if value_eq {
            accessor
        } else {
            crate::interpreter::input_tracked(&accessor).unwrap_or(accessor)
        };
        let id = NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed);
        let watcher = Watcher {
            id,
            get,
            listener,
            value_eq,
            kind,
            last: Last::Uninit,
            alive: true,
        };
        // Prepend: a pass iterates right-to-left over its snapshot, so
        // watchers added during the pass are not visited by it.
        self.inner
            .watchers
            .borrow_mut()
            .insert(0, Rc::new(RefCell::new(watcher)));
        self.root_rc().last_dirty.set(None);
        WatchHandle {
            scope: Rc::downgrade(&self.inner),
            id,
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Phase bookkeeping (root-resident)
    // ═══════════════════════════════════════════════════════════════

    pub(crate) fn begin_phase(&self, phase: Phase) -> Result<(), ScopeError> {
        let active = self.inner.phase.get();
        if active != Phase::Idle {
            return Err(ScopeError::PhaseConflict {
                attempted: phase,
                active,
            });
        }
        self.inner.phase.set(phase);
        Ok(())
    }

    pub(crate) fn clear_phase(&self) {
        self.inner.phase.set(Phase::Idle);
    }

    /// The root's current phase.
    pub fn phase(&self) -> Phase {
        self.root_rc().phase.get()
    }

    // ═══════════════════════════════════════════════════════════════
    // Teardown
    // ═══════════════════════════════════════════════════════════════

    /// Broadcast `$destroy` through the subtree, detach from the
    /// parent, and drop watchers and listeners. Destroying the root
    /// only broadcasts. Pending async tasks targeting this scope
    /// become no-ops.
    pub fn destroy(&self) {
        if self.inner.destroyed.get() {
            return;
        }
        self.broadcast("$destroy", vec![]);
        self.inner.destroyed.set(true);
        if self.is_root() {
            return;
        }
        if let Some(parent) = self.inner.parent.borrow().upgrade() {
            parent
                .children
                .borrow_mut()
                .retain(|child| !Rc::ptr_eq(child, &self.inner));
        }
        *self.inner.parent.borrow_mut() = Weak::new();
        self.inner.watchers.borrow_mut().clear();
        self.inner.listeners.borrow_mut().clear();
        self.inner.children.borrow_mut().clear();
    }
}

/// The "defined" rule for one-time watches: literals need every
/// element defined, anything else just needs to not be undefined.
pub(crate) fn one_time_defined(value: &Value, literal: bool) -> bool {
    if !literal {
        return value.is_defined();
    }
    match value {
        Value::Array(rc) => rc.borrow().iter().all(|v| v.is_defined()),
        Value::Object(rc) => rc.borrow().values().all(|v| v.is_defined()),
        other => other.is_defined(),
    }
}
