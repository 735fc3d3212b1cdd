//! Fuel metering.
//!
//! One `FuelMeter` exists per run and is shared by every scope: the meter is
//! a cheap clone around a single counter, charged atomically at each atom
//! boundary. Exhaustion clamps the counter to zero so `fuel_used` reports
//! the full budget.

use crate::vm::error::fuel_error;
use crate::vm::node::Node;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
pub struct FuelMeter {
    initial: f64,
    remaining: Arc<Mutex<f64>>,
}

impl FuelMeter {
    pub fn new(initial: f64) -> Self {
        FuelMeter {
            initial,
            remaining: Arc::new(Mutex::new(initial)),
        }
    }

    /// Charge `cost` units. When the charge would push the meter negative the
    /// meter zeroes out and a fuel error is returned.
    pub fn charge(&self, cost: f64) -> Result<(), Value> {
        let mut remaining = self.remaining.lock().unwrap();
        if *remaining - cost < 0.0 {
            *remaining = 0.0;
            return Err(fuel_error());
        }
        *remaining -= cost;
        Ok(())
    }

    pub fn remaining(&self) -> f64 {
        *self.remaining.lock().unwrap()
    }

    pub fn used(&self) -> f64 {
        self.initial - self.remaining()
    }

    pub fn initial(&self) -> f64 {
        self.initial
    }
}

/// Per-op cost override: a fixed number or a function of the node.
#[derive(Clone)]
pub enum CostOverride {
    Fixed(f64),
    Fn(Arc<dyn Fn(&Node) -> f64 + Send + Sync>),
}

impl std::fmt::Debug for CostOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CostOverride::Fixed(n) => write!(f, "Fixed({})", n),
            CostOverride::Fn(_) => write!(f, "Fn(..)"),
        }
    }
}

/// Cost table consulted at every atom boundary: user overrides first, then
/// the atom's own cost.
#[derive(Clone, Debug, Default)]
pub struct CostTable {
    overrides: HashMap<String, CostOverride>,
}

impl CostTable {
    pub fn new(overrides: HashMap<String, CostOverride>) -> Self {
        CostTable { overrides }
    }

    pub fn set(&mut self, op: impl Into<String>, cost: CostOverride) {
        self.overrides.insert(op.into(), cost);
    }

    pub fn cost_for(&self, op: &str, node: &Node, atom_cost: f64) -> f64 {
        match self.overrides.get(op) {
            Some(CostOverride::Fixed(n)) => *n,
            Some(CostOverride::Fn(f)) => f(node),
            None => atom_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn charge_and_used() {
        let meter = FuelMeter::new(10.0);
        meter.charge(3.0).unwrap();
        assert_eq!(meter.remaining(), 7.0);
        assert_eq!(meter.used(), 3.0);
    }

    #[test]
    fn exact_cost_drains_to_zero() {
        let meter = FuelMeter::new(1.0);
        meter.charge(1.0).unwrap();
        assert_eq!(meter.remaining(), 0.0);
        // Zero fuel before the next atom is an error.
        assert!(meter.charge(0.1).is_err());
    }

    #[test]
    fn exhaustion_reports_full_budget() {
        let meter = FuelMeter::new(5.0);
        meter.charge(4.0).unwrap();
        let err = meter.charge(2.0).unwrap_err();
        assert!(err["message"].as_str().unwrap().contains("Fuel"));
        assert_eq!(meter.used(), 5.0);
    }

    #[test]
    fn clones_share_the_counter() {
        let a = FuelMeter::new(10.0);
        let b = a.clone();
        b.charge(4.0).unwrap();
        assert_eq!(a.remaining(), 6.0);
    }

    #[test]
    fn cost_overrides() {
        let mut table = CostTable::default();
        table.set("httpFetch", CostOverride::Fixed(2.5));
        table.set(
            "llmPredict",
            CostOverride::Fn(Arc::new(|node: &Node| {
                node.get("prompt")
                    .and_then(|p| p.as_str())
                    .map(|s| s.len() as f64)
                    .unwrap_or(1.0)
            })),
        );
        let fetch = Node::try_from(json!({"op": "httpFetch"})).unwrap();
        let llm = Node::try_from(json!({"op": "llmPredict", "prompt": "abcd"})).unwrap();
        assert_eq!(table.cost_for("httpFetch", &fetch, 5.0), 2.5);
        assert_eq!(table.cost_for("llmPredict", &llm, 5.0), 4.0);
        assert_eq!(table.cost_for("seq", &fetch, 0.1), 0.1);
    }
}
