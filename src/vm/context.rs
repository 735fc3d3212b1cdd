//! Run contexts, scopes, and cancellation.
//!
//! One `RuntimeContext` exists per call. Child scopes (loop bodies, lambda
//! bodies, try/catch arms) share the fuel meter, capabilities, atom table,
//! signal and trace with the parent, but own their state map and output;
//! writes in a child never leak back except through a designated result
//! promotion performed by the parent atom.

use crate::vm::capabilities::Capabilities;
use crate::vm::error::monadic_error;
use crate::vm::fuel::{CostTable, FuelMeter};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Cooperative cancellation: an abort flag (possibly shared with the host)
/// plus an optional deadline, checked at every atom boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    flags: Vec<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl CancelSignal {
    pub fn new() -> Self {
        CancelSignal {
            flags: vec![Arc::new(AtomicBool::new(false))],
            deadline: None,
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        CancelSignal {
            flags: vec![Arc::new(AtomicBool::new(false))],
            deadline: Some(deadline),
        }
    }

    /// Combine with an external signal; either side can abort the run.
    pub fn merged(&self, other: &CancelSignal) -> CancelSignal {
        let mut flags = self.flags.clone();
        flags.extend(other.flags.iter().cloned());
        let deadline = match (self.deadline, other.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        CancelSignal { flags, deadline }
    }

    pub fn abort(&self) {
        if let Some(flag) = self.flags.first() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_aborted(&self) -> bool {
        if self.flags.iter().any(|f| f.load(Ordering::SeqCst)) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// One executed atom, recorded when tracing is on.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub op: String,
    pub fuel_before: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

pub type Trace = Arc<Mutex<Vec<TraceEntry>>>;

pub struct RuntimeContext {
    pub fuel: FuelMeter,
    pub costs: Arc<CostTable>,
    pub args: Value,
    pub state: HashMap<String, Value>,
    pub consts: HashSet<String>,
    pub capabilities: Capabilities,
    pub atoms: Arc<crate::vm::atoms::AtomRegistry>,
    pub output: Option<Value>,
    pub error: Option<Value>,
    /// Set by `return`; stops the enclosing sequence.
    pub returned: bool,
    /// Loop control flags consumed by `while` / `map`.
    pub broke: bool,
    pub continued: bool,
    pub signal: CancelSignal,
    pub trace: Option<Trace>,
}

impl RuntimeContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fuel: FuelMeter,
        costs: Arc<CostTable>,
        args: Value,
        capabilities: Capabilities,
        atoms: Arc<crate::vm::atoms::AtomRegistry>,
        signal: CancelSignal,
        trace: Option<Trace>,
    ) -> Self {
        RuntimeContext {
            fuel,
            costs,
            args,
            state: HashMap::new(),
            consts: HashSet::new(),
            capabilities,
            atoms,
            output: None,
            error: None,
            returned: false,
            broke: false,
            continued: false,
            signal,
            trace,
        }
    }

    /// A child scope: shared fuel/capabilities/atoms/signal/trace, copied
    /// state and consts, fresh output and control flags.
    pub fn child_scope(&self) -> RuntimeContext {
        RuntimeContext {
            fuel: self.fuel.clone(),
            costs: Arc::clone(&self.costs),
            args: self.args.clone(),
            state: self.state.clone(),
            consts: self.consts.clone(),
            capabilities: self.capabilities.clone(),
            atoms: Arc::clone(&self.atoms),
            output: None,
            error: None,
            returned: false,
            broke: false,
            continued: false,
            signal: self.signal.clone(),
            trace: self.trace.clone(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.state.get(name)
    }

    /// Write a variable; rebinding a const is a monadic error.
    pub fn set_var(&mut self, name: &str, value: Value) -> Result<(), Value> {
        if self.consts.contains(name) {
            return Err(monadic_error(
                format!("Cannot reassign const variable '{}'", name),
                Some("varSet"),
            ));
        }
        self.state.insert(name.to_string(), value);
        Ok(())
    }

    /// Bind a const; re-declaring one is a monadic error.
    pub fn set_const(&mut self, name: &str, value: Value) -> Result<(), Value> {
        if self.consts.contains(name) {
            return Err(monadic_error(
                format!("Cannot reassign const variable '{}'", name),
                Some("constSet"),
            ));
        }
        self.consts.insert(name.to_string());
        self.state.insert(name.to_string(), value);
        Ok(())
    }

    /// Should the current sequence stop handing out work?
    pub fn flow_interrupted(&self) -> bool {
        self.returned || self.broke || self.continued
    }

    #[cfg(test)]
    pub fn for_testing() -> RuntimeContext {
        RuntimeContext::new(
            FuelMeter::new(1000.0),
            Arc::new(CostTable::default()),
            Value::Null,
            Capabilities::default(),
            Arc::new(crate::vm::atoms::AtomRegistry::with_defaults()),
            CancelSignal::new(),
            None,
        )
    }
}
