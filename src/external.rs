//! Host entity states consumed by the engine
//!
//! The engine reads a few values it does not own: external energy meters,
//! room thermometers and the PV power sensor. A host adapter provides them
//! through [`StateSource`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Numeric state of a host entity
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub value: f64,
    /// `unit_of_measurement`, if the entity has one
    pub unit: Option<String>,
}

impl SensorReading {
    pub fn new(value: f64, unit: Option<&str>) -> Self {
        Self {
            value,
            unit: unit.map(str::to_string),
        }
    }
}

#[async_trait::async_trait]
pub trait StateSource: Send + Sync {
    /// Current numeric state; `None` when unknown, unavailable or non-numeric
    async fn numeric_state(&self, entity_id: &str) -> Option<SensorReading>;
}

/// In-memory state table, shared between clones
#[derive(Debug, Clone, Default)]
pub struct StaticStateSource {
    states: Arc<RwLock<HashMap<String, SensorReading>>>,
}

impl StaticStateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, entity_id: &str, value: f64, unit: Option<&str>) {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        states.insert(entity_id.to_string(), SensorReading::new(value, unit));
    }

    /// Make an entity unavailable
    pub fn remove(&self, entity_id: &str) {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        states.remove(entity_id);
    }

    pub fn get(&self, entity_id: &str) -> Option<SensorReading> {
        let states = self.states.read().unwrap_or_else(|e| e.into_inner());
        states.get(entity_id).cloned()
    }
}

#[async_trait::async_trait]
impl StateSource for StaticStateSource {
    async fn numeric_state(&self, entity_id: &str) -> Option<SensorReading> {
        self.get(entity_id).filter(|r| r.value.is_finite())
    }
}
