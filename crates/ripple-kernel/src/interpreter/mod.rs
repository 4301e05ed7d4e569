//! Expression compilation: string → sandboxed accessor.
//!
//! An [`Accessor`] is the callable form every watch, eval and async
//! task runs: either a compiled AST evaluated by the tree-walking
//! interpreter, a host closure, or the no-op accessor producing
//! `Undefined`. Compiled accessors carry three classification flags:
//!
//! - `constant`: evaluates identically regardless of scope — watches
//!   over constant accessors self-deregister after the first fire;
//! - `one_time`: source began with `::` — the watch deregisters in a
//!   post-digest step once the value is defined;
//! - `literal`: the whole expression is a literal (array/object
//!   included) — changes the one-time "defined" rule to all-elements-
//!   defined.
//!
//! Compilation is cached per root scope, keyed by source text
//! (including the `::` prefix).

pub mod coerce;
mod eval;
mod sandbox;

use std::cell::RefCell;
use std::rc::Rc;

use ripple_types::Value;

use crate::ast::Ast;
use crate::error::Error;
use crate::filters::FilterRegistry;
use crate::parser;
use crate::scope::Scope;

pub use eval::EvalError;
pub(crate) use eval::{get_member, ExprEval};
pub use sandbox::{SecurityViolation, FORBIDDEN_MEMBERS};

type HostAccessor = dyn Fn(&Scope) -> Result<Value, EvalError>;

enum AccessorKind {
    Compiled(Rc<Ast>),
    Host(Rc<HostAccessor>),
    Noop,
}

struct AccessorInner {
    kind: AccessorKind,
    constant: bool,
    one_time: bool,
    literal: bool,
    /// Watchable sub-expressions, when the expression's value can only
    /// change through them (see [`input_tracked`]).
    inputs: Option<Rc<Vec<Ast>>>,
    source: Option<String>,
}

/// A callable `(scope, locals?) → value` with classification flags
/// and an optional assign capability.
#[derive(Clone)]
pub struct Accessor {
    inner: Rc<AccessorInner>,
}

impl Accessor {
    /// Compile an expression against a filter registry (consulted for
    /// `stateful` flags during constancy classification).
    pub fn compile(src: &str, filters: &FilterRegistry) -> Result<Accessor, Error> {
        let trimmed = src.trim_start();
        let (one_time, body) = match trimmed.strip_prefix("::") {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let ast = parser::parse(body)?;
        let constant = is_constant(&ast, filters);
        let literal = is_literal(&ast);
        let inputs = program_inputs(&ast, filters).map(Rc::new);
        Ok(Accessor {
            inner: Rc::new(AccessorInner {
                kind: AccessorKind::Compiled(Rc::new(ast)),
                constant,
                one_time,
                literal,
                inputs,
                source: Some(src.to_string()),
            }),
        })
    }

    /// Wrap a host closure as an accessor.
    pub fn from_fn<F>(f: F) -> Accessor
    where
        F: Fn(&Scope) -> Value + 'static,
    {
        Accessor::from_try_fn(move |scope| Ok(f(scope)))
    }

    pub(crate) fn from_try_fn<F>(f: F) -> Accessor
    where
        F: Fn(&Scope) -> Result<Value, EvalError> + 'static,
    {
        Accessor {
            inner: Rc::new(AccessorInner {
                kind: AccessorKind::Host(Rc::new(f)),
                constant: false,
                one_time: false,
                literal: false,
                inputs: None,
                source: None,
            }),
        }
    }

    /// The accessor that always produces `Undefined`.
    pub fn noop() -> Accessor {
        Accessor {
            inner: Rc::new(AccessorInner {
                kind: AccessorKind::Noop,
                constant: false,
                one_time: false,
                literal: false,
                inputs: None,
                source: None,
            }),
        }
    }

    /// Evaluate against a scope, with optional locals shadowing
    /// identifier resolution.
    pub fn call(&self, scope: &Scope, locals: Option<&Value>) -> Result<Value, EvalError> {
        match &self.inner.kind {
            AccessorKind::Compiled(ast) => {
                let filters = scope.filters();
                ExprEval {
                    scope,
                    locals,
                    filters: &filters,
                }
                .eval(ast)
            }
            AccessorKind::Host(f) => f(scope),
            AccessorKind::Noop => Ok(Value::Undefined),
        }
    }

    /// Write through the expression's assignment path, creating
    /// missing intermediate containers on the scope. Only compiled
    /// single-expression accessors with an assignable target support
    /// this.
    pub fn assign(&self, scope: &Scope, value: Value) -> Result<Value, EvalError> {
        let ast = match &self.inner.kind {
            AccessorKind::Compiled(ast) => ast,
            _ => {
                return Err(EvalError::CannotAssign {
                    target: "<accessor>".to_string(),
                    kind: "host function",
                })
            }
        };
        let target = match &**ast {
            Ast::Program { body } if body.len() == 1 && body[0].is_assignable() => &body[0],
            _ => {
                return Err(EvalError::CannotAssign {
                    target: self.inner.source.clone().unwrap_or_default(),
                    kind: "non-assignable expression",
                })
            }
        };
        let filters = scope.filters();
        ExprEval {
            scope,
            locals: None,
            filters: &filters,
        }
        .assign(target, value.clone())?;
        Ok(value)
    }

    pub fn is_constant(&self) -> bool {
        self.inner.constant
    }

    pub fn is_one_time(&self) -> bool {
        self.inner.one_time
    }

    pub fn is_literal(&self) -> bool {
        self.inner.literal
    }

    pub(crate) fn inputs(&self) -> Option<Rc<Vec<Ast>>> {
        self.inner.inputs.clone()
    }

    /// Source text, when compiled from a string.
    pub fn source(&self) -> Option<&str> {
        self.inner.source.as_deref()
    }
}

impl std::fmt::Debug for Accessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.inner.kind {
            AccessorKind::Compiled(_) => "compiled",
            AccessorKind::Host(_) => "host",
            AccessorKind::Noop => "noop",
        };
        f.debug_struct("Accessor")
            .field("kind", &kind)
            .field("source", &self.inner.source)
            .finish()
    }
}

/// Anything `watch`/`eval`/`apply` accept as an expression: source
/// text (compiled through the root's cache), a prebuilt accessor, or
/// `()` for the no-op accessor. Host closures enter through
/// [`Accessor::from_fn`].
pub trait IntoAccessor {
    fn into_accessor(self, scope: &Scope) -> Result<Accessor, Error>;
}

impl IntoAccessor for Accessor {
    fn into_accessor(self, _scope: &Scope) -> Result<Accessor, Error> {
        Ok(self)
    }
}

impl IntoAccessor for &str {
    fn into_accessor(self, scope: &Scope) -> Result<Accessor, Error> {
        scope.cached_accessor(self)
    }
}

impl IntoAccessor for &String {
    fn into_accessor(self, scope: &Scope) -> Result<Accessor, Error> {
        scope.cached_accessor(self)
    }
}

impl IntoAccessor for String {
    fn into_accessor(self, scope: &Scope) -> Result<Accessor, Error> {
        scope.cached_accessor(&self)
    }
}

impl IntoAccessor for () {
    fn into_accessor(self, _scope: &Scope) -> Result<Accessor, Error> {
        Ok(Accessor::noop())
    }
}

/// A node is constant when every reachable leaf is a literal and every
/// reachable filter is stateless. Unknown filters count as stateful —
/// they resolve at call time and may be registered stateful later.
fn is_constant(ast: &Ast, filters: &FilterRegistry) -> bool {
    match ast {
        Ast::Program { body } => body.iter().all(|e| is_constant(e, filters)),
        Ast::Literal { .. } => true,
        Ast::ArrayLit { elements } => elements.iter().all(|e| is_constant(e, filters)),
        Ast::ObjectLit { properties } => {
            properties.iter().all(|p| is_constant(&p.value, filters))
        }
        Ast::Unary { operand, .. } => is_constant(operand, filters),
        Ast::Binary { left, right, .. } | Ast::Logical { left, right, .. } => {
            is_constant(left, filters) && is_constant(right, filters)
        }
        Ast::Conditional {
            test,
            then,
            otherwise,
        } => {
            is_constant(test, filters)
                && is_constant(then, filters)
                && is_constant(otherwise, filters)
        }
        Ast::Call {
            callee,
            args,
            filter: true,
        } => {
            let stateless = match &**callee {
                Ast::Identifier { name } => filters
                    .get(name)
                    .map(|f| !f.is_stateful())
                    .unwrap_or(false),
                _ => false,
            };
            stateless && args.iter().all(|a| is_constant(a, filters))
        }
        Ast::Identifier { .. }
        | Ast::This
        | Ast::Member { .. }
        | Ast::Assign { .. }
        | Ast::Call { filter: false, .. } => false,
    }
}

/// What drives a node's value: the node itself (re-evaluate every
/// pass) or a set of watchable inputs it computes from purely.
enum ToWatch {
    SelfNode,
    Inputs(Vec<Ast>),
}

fn to_watch(ast: &Ast, filters: &FilterRegistry) -> ToWatch {
    match ast {
        Ast::Literal { .. } => ToWatch::Inputs(Vec::new()),
        Ast::Unary { operand, .. } => ToWatch::Inputs(inputs_of(operand, filters)),
        Ast::Binary { left, right, .. } => {
            let mut inputs = inputs_of(left, filters);
            inputs.extend(inputs_of(right, filters));
            ToWatch::Inputs(inputs)
        }
        Ast::ArrayLit { elements } => ToWatch::Inputs(
            elements
                .iter()
                .flat_map(|e| inputs_of(e, filters))
                .collect(),
        ),
        Ast::ObjectLit { properties } => ToWatch::Inputs(
            properties
                .iter()
                .flat_map(|p| inputs_of(&p.value, filters))
                .collect(),
        ),
        Ast::Call {
            callee,
            args,
            filter: true,
        } => {
            let stateless = match &**callee {
                Ast::Identifier { name } => filters
                    .get(name)
                    .map(|f| !f.is_stateful())
                    .unwrap_or(false),
                _ => false,
            };
            if stateless {
                ToWatch::Inputs(args.iter().flat_map(|a| inputs_of(a, filters)).collect())
            } else {
                ToWatch::SelfNode
            }
        }
        // Short-circuiting, side-effecting and opaque nodes must be
        // re-evaluated every pass.
        Ast::Identifier { .. }
        | Ast::This
        | Ast::Member { .. }
        | Ast::Call { filter: false, .. }
        | Ast::Logical { .. }
        | Ast::Conditional { .. }
        | Ast::Assign { .. }
        | Ast::Program { .. } => ToWatch::SelfNode,
    }
}

fn inputs_of(ast: &Ast, filters: &FilterRegistry) -> Vec<Ast> {
    match to_watch(ast, filters) {
        ToWatch::SelfNode => vec![ast.clone()],
        ToWatch::Inputs(inputs) => inputs,
    }
}

/// Inputs of a whole program: a single-expression program whose value
/// is a pure function of watchable sub-expressions. `None` means the
/// expression itself is the thing to watch.
fn program_inputs(ast: &Ast, filters: &FilterRegistry) -> Option<Vec<Ast>> {
    match ast {
        Ast::Program { body } if body.len() == 1 => match to_watch(&body[0], filters) {
            ToWatch::SelfNode => None,
            ToWatch::Inputs(inputs) if inputs.is_empty() => None,
            ToWatch::Inputs(inputs) => Some(inputs),
        },
        _ => None,
    }
}

struct InputState {
    last: Vec<Value>,
    result: Value,
    primed: bool,
}

/// Wrap an accessor so the digest compares its INPUTS and recomputes
/// the full expression only when one changed, returning the cached
/// result otherwise. This is what lets identity watches over
/// expressions that build fresh containers each evaluation (`[a, b]`,
/// `list | filter:'x'`) converge: the container identity stays stable
/// until an input actually changes.
pub(crate) fn input_tracked(accessor: &Accessor) -> Option<Accessor> {
    if accessor.is_constant() {
        return None;
    }
    let inputs = accessor.inputs()?;
    let base = accessor.clone();
    let state = RefCell::new(InputState {
        last: Vec::new(),
        result: Value::Undefined,
        primed: false,
    });
    Some(Accessor::from_try_fn(move |scope| {
        let filters = scope.filters();
        let eval = ExprEval {
            scope,
            locals: None,
            filters: &filters,
        };
        let mut dirty = !state.borrow().primed;
        let mut new_values = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let value = eval.eval(input)?;
            if !dirty {
                let st = state.borrow();
                dirty = match st.last.get(index) {
                    Some(old) => !old.watch_eq(&value),
                    None => true,
                };
            }
            new_values.push(value);
        }
        if dirty {
            let result = base.call(scope, None)?;
            let mut st = state.borrow_mut();
            st.last = new_values;
            st.result = result;
            st.primed = true;
        }
        let out = state.borrow().result.clone();
        Ok(out)
    }))
}

/// A program is literal when empty or a single array/object/scalar
/// literal.
fn is_literal(ast: &Ast) -> bool {
    match ast {
        Ast::Program { body } => match body.as_slice() {
            [] => true,
            [only] => matches!(
                only,
                Ast::Literal { .. } | Ast::ArrayLit { .. } | Ast::ObjectLit { .. }
            ),
            _ => false,
        },
        _ => false,
    }
}
