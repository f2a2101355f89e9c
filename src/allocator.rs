//! Per-hardware-type instance id allocation.

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::hardware::HardwareType;
use crate::store::Store;

/// Hands out `<type>_<n>` ids from a durable counter per hardware type.
///
/// The read and the increment happen in a single store transaction, so two
/// concurrent allocations can never observe the same counter value. Numbers are
/// never handed out twice, even after the instance is deleted.
pub struct IdAllocator {
    store: Arc<Store>,
}

impl IdAllocator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn allocate(&self, hardware_type: HardwareType) -> Result<String> {
        let key = hardware_type.as_str();
        let next = self
            .store
            .with_state_mut(|state| {
                let counter = state.id_counters.entry(key.to_string()).or_insert(0);
                *counter += 1;
                Ok(*counter)
            })
            .map_err(|e| AppError::allocation(key, e.to_string()))?;

        Ok(format!("{}_{}", key, next))
    }
}
