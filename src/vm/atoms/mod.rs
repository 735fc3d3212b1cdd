//! The atom table.
//!
//! Atoms are the VM's instruction set: named operators with an input schema,
//! a fuel cost, and an async effect over the run context. The registry is
//! overridable — `AgentVM::with_atoms` overlays user atoms on the defaults —
//! and inspectable, which is what the tool-descriptor export walks.

use crate::vm::context::RuntimeContext;
use crate::vm::node::Node;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub mod collections;
pub mod flow;
pub mod io;
pub mod llm;
pub mod procs;
pub mod store;
pub mod strings;
pub mod testing;
pub mod vars;

/// Default cost for flow-control atoms.
pub const FLOW_COST: f64 = 0.1;
/// Default cost for ordinary computation atoms.
pub const UNIT_COST: f64 = 1.0;
/// Default cost for IO-bound capability atoms.
pub const IO_COST: f64 = 5.0;

/// One operator in the VM's instruction set.
///
/// `exec` mutates the context; a returned `Err` is a monadic error the
/// scheduler writes into `ctx.error` for the usual short-circuit flow.
#[async_trait]
pub trait Atom: Send + Sync {
    fn op(&self) -> &str;

    fn docs(&self) -> &str {
        ""
    }

    /// JSON-schema-ish description of the node fields, used for tool export.
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    /// Fuel charged on entry. May inspect the node (e.g. prompt length).
    fn cost(&self, node: &Node) -> f64 {
        let _ = node;
        UNIT_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value>;
}

/// Registry mapping op names to atoms. User entries shadow defaults.
#[derive(Default)]
pub struct AtomRegistry {
    atoms: HashMap<String, Arc<dyn Atom>>,
}

impl AtomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        register_default_atoms(&mut registry);
        registry
    }

    pub fn register(&mut self, atom: Arc<dyn Atom>) {
        self.atoms.insert(atom.op().to_string(), atom);
    }

    pub fn get(&self, op: &str) -> Option<Arc<dyn Atom>> {
        self.atoms.get(op).cloned()
    }

    pub fn has(&self, op: &str) -> bool {
        self.atoms.contains_key(op)
    }

    pub fn ops(&self) -> Vec<String> {
        let mut ops: Vec<String> = self.atoms.keys().cloned().collect();
        ops.sort();
        ops
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn Atom>)> {
        self.atoms.iter()
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

/// Register the built-in atom library.
pub fn register_default_atoms(registry: &mut AtomRegistry) {
    flow::register(registry);
    vars::register(registry);
    collections::register(registry);
    strings::register(registry);
    io::register(registry);
    store::register(registry);
    llm::register(registry);
    procs::register(registry);
    testing::register(registry);
}

/// A user atom defined from a closure instead of a trait impl. Async or
/// suspending atoms implement [`Atom`] directly; this is the quick path for
/// pure computations.
pub struct DefinedAtom {
    op: String,
    docs: String,
    input_schema: Value,
    output_schema: Value,
    cost: f64,
    exec: Arc<dyn Fn(&Node, &mut RuntimeContext) -> Result<(), Value> + Send + Sync>,
}

impl DefinedAtom {
    pub fn output_schema(&self) -> &Value {
        &self.output_schema
    }
}

#[async_trait]
impl Atom for DefinedAtom {
    fn op(&self) -> &str {
        &self.op
    }

    fn docs(&self) -> &str {
        &self.docs
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    fn cost(&self, _node: &Node) -> f64 {
        self.cost
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        (self.exec)(node, ctx)
    }
}

/// Define an atom from its op name, schemas, effect closure and docs.
/// Register the result via [`AgentVM::with_atoms`](crate::vm::AgentVM).
pub fn define_atom(
    op: impl Into<String>,
    input_schema: Value,
    output_schema: Value,
    exec: impl Fn(&Node, &mut RuntimeContext) -> Result<(), Value> + Send + Sync + 'static,
    docs: impl Into<String>,
) -> Arc<dyn Atom> {
    Arc::new(DefinedAtom {
        op: op.into(),
        docs: docs.into(),
        input_schema,
        output_schema,
        cost: UNIT_COST,
        exec: Arc::new(exec),
    })
}

/// Bind an atom's produced value to its designated result variable, if any.
pub(crate) fn bind_result(
    node: &Node,
    ctx: &mut RuntimeContext,
    value: Value,
) -> Result<(), Value> {
    if let Some(name) = node.result_name() {
        if node.result_const() {
            ctx.set_const(name, value)?;
        } else {
            ctx.set_var(name, value)?;
        }
    }
    Ok(())
}
