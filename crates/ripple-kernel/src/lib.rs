//! ripple-kernel: the reactive core of a data-binding framework.
//!
//! This crate provides:
//!
//! - **Lexer**: expression text → spanned tokens, using logos
//! - **Parser**: tokens → AST, hand-written recursive descent
//! - **Interpreter**: AST → sandboxed accessor over `(scope, locals)`
//! - **Filters**: name → transformer registry behind the pipe operator
//! - **Scope**: the observation tree — watchers, dirty-checking
//!   digest, async queues, events
//! - **Scheduler**: the cooperative next-tick queue
//! - **Sink**: where caught user errors are reported
//!
//! ```
//! use ripple_kernel::{Scope, Value};
//!
//! let scope = Scope::new_root();
//! scope.set("name", "Keal");
//! scope
//!     .watch(
//!         "name | uppercase",
//!         |new, _old, scope| scope.set("shout", new.clone()),
//!         false,
//!     )
//!     .unwrap();
//! scope.digest().unwrap();
//! assert_eq!(scope.get("shout"), Value::str("KEAL"));
//! ```

pub mod ast;
pub mod error;
pub mod filters;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod scheduler;
pub mod scope;
pub mod sink;

pub use error::{Error, Result};
pub use filters::{Filter, FilterRegistry, RegistryError};
pub use interpreter::{Accessor, EvalError, IntoAccessor, SecurityViolation, FORBIDDEN_MEMBERS};
pub use lexer::{LexError, LexErrorKind};
pub use parser::ParseError;
pub use scheduler::{TaskId, TickScheduler};
pub use scope::{
    Event, ListenerHandle, Phase, RootConfig, Scope, ScopeError, WatchGroupHandle, WatchHandle,
};
pub use sink::{ErrorSink, SinkHandle, TracingSink};

// The value vocabulary, re-exported for embedders.
pub use ripple_types::{ConvertError, FuncVal, HostError, Value, ValueMap};
