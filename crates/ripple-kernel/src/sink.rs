//! The error sink: where caught user errors go.
//!
//! Watch accessors, async expression tasks, and applyAsync flushes can
//! fail without stopping the digest. Those failures are reported here
//! rather than propagated. The default sink logs through `tracing`;
//! embedders (and tests) can substitute their own.

use std::rc::Rc;

use crate::error::Error;

/// Receives errors caught inside the digest and event dispatch.
pub trait ErrorSink {
    fn report(&self, error: &Error);
}

/// Default sink: logs at error level via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, error: &Error) {
        tracing::error!(%error, "error caught in watch or deferred task");
    }
}

/// Shared handle to a sink.
pub type SinkHandle = Rc<dyn ErrorSink>;
