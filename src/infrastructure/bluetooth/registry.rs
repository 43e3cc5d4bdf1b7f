//! Device Registry
//!
//! The set of boards that currently have a live connection.

use crate::domain::address::BoardAddress;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Membership set of connected boards. Mutated only by the connection
/// manager; everything else reads through [`RegistryView`].
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    connected: HashSet<BoardAddress>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self, address: BoardAddress) -> bool {
        self.connected.contains(&address)
    }

    pub fn mark_connected(&mut self, address: BoardAddress) {
        self.connected.insert(address);
    }

    /// Returns false if the address was not registered
    pub fn mark_disconnected(&mut self, address: BoardAddress) -> bool {
        self.connected.remove(&address)
    }

    pub fn addresses(&self) -> Vec<BoardAddress> {
        let mut addresses: Vec<_> = self.connected.iter().copied().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.connected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
    }
}

pub(crate) type SharedRegistry = Arc<RwLock<DeviceRegistry>>;

/// Read-only access to the registry
#[derive(Debug, Clone)]
pub struct RegistryView {
    inner: SharedRegistry,
}

impl RegistryView {
    pub(crate) fn new(inner: SharedRegistry) -> Self {
        Self { inner }
    }

    pub fn is_connected(&self, address: BoardAddress) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_connected(address)
    }

    pub fn addresses(&self) -> Vec<BoardAddress> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .addresses()
    }
}
