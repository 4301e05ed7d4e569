//! Test support for the ripple workspace.
//!
//! Provides the collecting error sink the digest tests assert against,
//! and a shared call counter for listener-invocation accounting.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ripple_kernel::{Error, ErrorSink, RootConfig, Scope};

/// An error sink that stores every reported error's rendering.
#[derive(Default)]
pub struct CollectingSink {
    errors: RefCell<Vec<String>>,
}

impl CollectingSink {
    pub fn new() -> Rc<CollectingSink> {
        Rc::new(CollectingSink::default())
    }

    /// Number of errors reported so far.
    pub fn count(&self) -> usize {
        self.errors.borrow().len()
    }

    /// True if any reported error rendering contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.errors.borrow().iter().any(|e| e.contains(needle))
    }

    /// Drain and return all reported errors.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.errors.borrow_mut())
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, error: &Error) {
        self.errors.borrow_mut().push(error.to_string());
    }
}

/// A root scope wired to a collecting sink, returned together.
pub fn scope_with_sink() -> (Scope, Rc<CollectingSink>) {
    let sink = CollectingSink::new();
    let scope = Scope::with_config(RootConfig {
        sink: sink.clone(),
        ..RootConfig::default()
    });
    (scope, sink)
}

/// Cloneable call counter for listener bookkeeping in tests.
#[derive(Clone, Default)]
pub struct CallCounter {
    count: Rc<Cell<usize>>,
}

impl CallCounter {
    pub fn new() -> CallCounter {
        CallCounter::default()
    }

    pub fn bump(&self) {
        self.count.set(self.count.get() + 1);
    }

    pub fn get(&self) -> usize {
        self.count.get()
    }
}
