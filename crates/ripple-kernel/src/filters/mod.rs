//! Filter system: named value transformers invokable through the
//! expression language's pipe operator.
//!
//! ```text
//! FilterRegistry
//! ├── Builtins (filter, uppercase, lowercase, limitTo, json)
//! └── Embedder filters (registered via factories)
//! ```
//!
//! A filter is `(input, ...args) → value`. The `stateful` flag marks
//! filters whose output depends on out-of-band state; the compiler
//! refuses to classify any expression containing one as constant.

mod builtin;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ripple_types::Value;

use crate::interpreter::EvalError;

pub(crate) use builtin::register_builtins;

/// Invalid registry calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    /// Filter names must be non-empty identifiers.
    #[error("invalid filter name {0:?}")]
    InvalidName(String),
}

type FilterFn = dyn Fn(&[Value]) -> Result<Value, EvalError>;

/// A registered filter. `args[0]` is the piped input.
#[derive(Clone)]
pub struct Filter {
    f: Rc<FilterFn>,
    stateful: bool,
}

impl Filter {
    pub fn new<F>(f: F) -> Filter
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + 'static,
    {
        Filter {
            f: Rc::new(f),
            stateful: false,
        }
    }

    /// Mark the filter's output as dependent on out-of-band state,
    /// disabling constant folding of expressions that use it.
    pub fn stateful(mut self) -> Filter {
        self.stateful = true;
        self
    }

    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        (self.f)(args)
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("stateful", &self.stateful)
            .finish_non_exhaustive()
    }
}

/// Name → filter lookup, shared by the compiler (constancy
/// classification) and the evaluator (call-time resolution).
#[derive(Clone, Default)]
pub struct FilterRegistry {
    inner: Rc<RefCell<HashMap<String, Filter>>>,
}

impl FilterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the builtin filters.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        register_builtins(&registry);
        registry
    }

    /// Invoke `factory` once and store its filter under `name`,
    /// replacing any previous registration.
    pub fn register<F>(&self, name: &str, factory: F) -> Result<Filter, RegistryError>
    where
        F: FnOnce() -> Filter,
    {
        ensure_valid_name(name)?;
        let filter = factory();
        self.inner
            .borrow_mut()
            .insert(name.to_string(), filter.clone());
        Ok(filter)
    }

    /// Register a batch of factories; returns the produced filters in
    /// order. Names are validated before any factory runs.
    pub fn register_many(
        &self,
        entries: Vec<(String, Box<dyn FnOnce() -> Filter>)>,
    ) -> Result<Vec<Filter>, RegistryError> {
        for (name, _) in &entries {
            ensure_valid_name(name)?;
        }
        let mut produced = Vec::with_capacity(entries.len());
        for (name, factory) in entries {
            let filter = factory();
            self.inner.borrow_mut().insert(name, filter.clone());
            produced.push(filter);
        }
        Ok(produced)
    }

    /// Look a filter up by name.
    pub fn get(&self, name: &str) -> Option<Filter> {
        self.inner.borrow().get(name).cloned()
    }

    /// Empty the registry (test isolation).
    pub fn clear(&self) {
        self.inner.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

fn ensure_valid_name(name: &str) -> Result<(), RegistryError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}
