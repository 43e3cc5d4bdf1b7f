//! Domain types: addresses, sensor data, module configuration and settings.

pub mod address;
pub mod models;
pub mod settings;
