//! The agent VM.
//!
//! A single-threaded cooperative scheduler over atom ASTs: one run is one
//! logical task, executing nodes in document order with deterministic fuel
//! accounting, monadic error propagation, a wall-clock timeout race, and
//! capability dispatch. Independent runs never share state; the procedure
//! store is the only process-wide structure.

pub mod atoms;
pub mod capabilities;
pub mod context;
pub mod error;
pub mod expr;
pub mod fuel;
pub mod node;
pub mod procedures;
pub mod tools;

use crate::vm::atoms::AtomRegistry;
use crate::vm::capabilities::{Capabilities, MemoryStore};
use crate::vm::context::{CancelSignal, RuntimeContext, Trace, TraceEntry};
use crate::vm::error::{is_error, timeout_error, unknown_atom_error};
use crate::vm::fuel::{CostOverride, CostTable, FuelMeter};
use crate::vm::node::Node;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Wall-clock budget derived from fuel when no explicit timeout is given.
pub const FUEL_TO_MS: f64 = 10.0;
pub const DEFAULT_FUEL: f64 = 1000.0;

#[derive(Default)]
pub struct RunOptions {
    pub fuel: Option<f64>,
    pub timeout_ms: Option<u64>,
    pub capabilities: Capabilities,
    /// External cancellation; OR-ed with the internal timeout signal.
    pub signal: Option<CancelSignal>,
    pub trace: bool,
    pub cost_overrides: HashMap<String, CostOverride>,
}

/// The single host-facing runtime surface.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The run's output, or the monadic error when one escaped.
    pub result: Value,
    pub error: Option<Value>,
    pub fuel_used: f64,
    pub trace: Option<Vec<TraceEntry>>,
}

impl RunResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One scheduler step: short-circuit checks, abort check, fuel charge, atom
/// dispatch, optional trace record. Flow atoms re-enter this for children.
pub fn execute_node<'a>(
    node: &'a Node,
    ctx: &'a mut RuntimeContext,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        if ctx.error.is_some() && !matches!(node.op(), "try" | "catch" | "return") {
            return;
        }
        if ctx.flow_interrupted() {
            return;
        }
        if ctx.signal.is_aborted() {
            ctx.error = Some(timeout_error());
            return;
        }
        let Some(atom) = ctx.atoms.get(node.op()) else {
            ctx.error = Some(unknown_atom_error(node.op()));
            return;
        };
        let fuel_before = ctx.fuel.remaining();
        let cost = ctx.costs.cost_for(node.op(), node, atom.cost(node));
        if let Err(e) = ctx.fuel.charge(cost) {
            ctx.error = Some(e);
            return;
        }
        if let Err(e) = atom.exec(node, ctx).await {
            tracing::debug!(op = node.op(), error = %e["message"], "atom returned error");
            ctx.error = Some(e);
        }
        if let Some(trace) = &ctx.trace {
            let result = node
                .result_name()
                .and_then(|name| ctx.lookup(name).cloned());
            trace.lock().unwrap().push(TraceEntry {
                op: node.op().to_string(),
                fuel_before,
                result,
            });
        }
    })
}

/// The VM: an atom table plus `run`.
pub struct AgentVM {
    atoms: Arc<AtomRegistry>,
}

impl Default for AgentVM {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentVM {
    pub fn new() -> Self {
        AgentVM {
            atoms: Arc::new(AtomRegistry::with_defaults()),
        }
    }

    /// A VM with user atoms overlaid on the defaults.
    pub fn with_atoms(custom: Vec<Arc<dyn atoms::Atom>>) -> Self {
        let mut registry = AtomRegistry::with_defaults();
        for atom in custom {
            registry.register(atom);
        }
        AgentVM {
            atoms: Arc::new(registry),
        }
    }

    pub fn atoms(&self) -> &AtomRegistry {
        &self.atoms
    }

    /// OpenAI-style tool descriptors for the atom table.
    pub fn get_tools(&self, filter: Option<&[&str]>) -> Vec<Value> {
        tools::tool_descriptors(&self.atoms, filter)
    }

    /// Execute an atom AST (or a `proc_` token) with the given arguments.
    pub async fn run(&self, program: Value, args: Value, opts: RunOptions) -> RunResult {
        let fuel = FuelMeter::new(opts.fuel.unwrap_or(DEFAULT_FUEL));

        let program = match &program {
            Value::String(token) => match procedures::get_procedure(token) {
                Ok(ast) => ast,
                Err(e) => return failed(e, &fuel),
            },
            _ => program,
        };
        let root = match Node::try_from(program) {
            Ok(node) => node,
            Err(e) => return failed(e, &fuel),
        };

        let timeout_ms = opts
            .timeout_ms
            .unwrap_or_else(|| (fuel.initial() * FUEL_TO_MS) as u64);
        let internal = CancelSignal::new();
        let signal = match &opts.signal {
            Some(external) => internal.merged(external),
            None => internal.clone(),
        };

        let mut capabilities = opts.capabilities.clone();
        if capabilities.store.is_none() {
            capabilities.store = Some(Arc::new(MemoryStore::new()));
        }

        let trace: Option<Trace> = if opts.trace {
            Some(Arc::new(Mutex::new(Vec::new())))
        } else {
            None
        };
        let mut ctx = RuntimeContext::new(
            fuel.clone(),
            Arc::new(CostTable::new(opts.cost_overrides.clone())),
            args,
            capabilities,
            Arc::clone(&self.atoms),
            signal,
            trace.clone(),
        );

        tracing::debug!(
            fuel = fuel.initial(),
            timeout_ms,
            "vm.run starting"
        );
        let timed_out = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            execute_node(&root, &mut ctx),
        )
        .await
        .is_err();
        if timed_out {
            internal.abort();
            ctx.error = Some(timeout_error());
        }

        let mut error = ctx.error.take();
        let output = ctx.output.take().unwrap_or(Value::Null);
        if error.is_none() && is_error(&output) {
            error = Some(output.clone());
        }
        let result = error.clone().unwrap_or(output);
        let trace = trace.map(|t| t.lock().unwrap().clone());
        RunResult {
            result,
            error,
            fuel_used: fuel.used(),
            trace,
        }
    }
}

fn failed(e: Value, fuel: &FuelMeter) -> RunResult {
    RunResult {
        result: e.clone(),
        error: Some(e),
        fuel_used: fuel.used(),
        trace: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seq(children: Vec<Value>) -> Value {
        json!({ "op": "seq", "children": children })
    }

    #[tokio::test]
    async fn runs_a_simple_sequence() {
        let vm = AgentVM::new();
        let ast = seq(vec![
            json!({"op": "varSet", "name": "x", "value": {"$expr": "literal", "value": 5}}),
            json!({"op": "return", "value": {"$expr": "binary", "op": "*",
                "left": {"$expr": "ident", "name": "x"},
                "right": {"$expr": "literal", "value": 2}}}),
        ]);
        let result = vm.run(ast, json!({}), RunOptions::default()).await;
        assert!(result.error.is_none());
        assert_eq!(result.result, json!(10));
        assert!(result.fuel_used > 0.0);
    }

    #[tokio::test]
    async fn unknown_atom_is_an_error() {
        let vm = AgentVM::new();
        let ast = seq(vec![json!({"op": "definitelyNotAnAtom"})]);
        let result = vm.run(ast, json!({}), RunOptions::default()).await;
        let err = result.error.unwrap();
        assert!(err["message"].as_str().unwrap().contains("Unknown atom"));
    }

    #[tokio::test]
    async fn args_flow_through_vars_import() {
        let vm = AgentVM::new();
        let ast = seq(vec![
            json!({"op": "varsImport", "names": ["a", "b"], "defaults": {}}),
            json!({"op": "return", "value": {"$expr": "binary", "op": "+",
                "left": {"$expr": "ident", "name": "a"},
                "right": {"$expr": "ident", "name": "b"}}}),
        ]);
        let result = vm.run(ast, json!({"a": 2, "b": 3}), RunOptions::default()).await;
        assert_eq!(result.result, json!(5));
    }

    #[tokio::test]
    async fn trace_records_ops() {
        let vm = AgentVM::new();
        let ast = seq(vec![
            json!({"op": "varSet", "name": "x", "value": {"$expr": "literal", "value": 1}}),
            json!({"op": "return", "value": {"$expr": "ident", "name": "x"}}),
        ]);
        let opts = RunOptions {
            trace: true,
            ..Default::default()
        };
        let result = vm.run(ast, json!({}), opts).await;
        let trace = result.trace.unwrap();
        let ops: Vec<&str> = trace.iter().map(|t| t.op.as_str()).collect();
        assert_eq!(ops, vec!["seq", "varSet", "return"]);
        assert!(trace[0].fuel_before >= trace[1].fuel_before);
    }

    #[tokio::test]
    async fn default_store_is_installed() {
        let vm = AgentVM::new();
        let ast = seq(vec![
            json!({"op": "storeSet", "key": {"$expr": "literal", "value": "k"},
                   "value": {"$expr": "literal", "value": 41}}),
            json!({"op": "storeGet", "key": {"$expr": "literal", "value": "k"}, "result": "v"}),
            json!({"op": "return", "value": {"$expr": "binary", "op": "+",
                "left": {"$expr": "ident", "name": "v"},
                "right": {"$expr": "literal", "value": 1}}}),
        ]);
        let result = vm.run(ast, json!({}), RunOptions::default()).await;
        assert_eq!(result.result, json!(42));
    }
}
