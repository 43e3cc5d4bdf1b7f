//! Bluetooth Module
//!
//! Connection lifecycle, module configuration and streaming sessions for
//! MetaWear boards on top of an injected BLE transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      BoardService                        │
//! │  (Main coordinator - public API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────────┐
//! │  Scanner  │  │ Connection │  │  Streaming   │
//! │           │  │  Manager   │  │   Session    │
//! │ - BLE     │  │ - Registry │  │ - Route      │
//! │ discovery │  │ - Loss     │  │   binding    │
//! │           │  │   watch    │  │ - Start/stop │
//! └───────────┘  └─────┬──────┘  └──────┬───────┘
//!                      │                │
//!                      ▼                ▼
//!               ┌─────────────────────────────┐
//!               │     Module Configurator     │
//!               └──────────────┬──────────────┘
//!                              ▼
//!               ┌─────────────────────────────┐
//!               │   BleTransport (injected)   │
//!               └─────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`transport`] - Transport trait and handle types
//! - [`protocol`] - Module parameters, route selection and packet decoding
//! - [`registry`] - Set of connected boards
//! - [`connection`] - Connect, disconnect and unexpected-loss handling
//! - [`configurator`] - Parameter writes and settle delays
//! - [`session`] - Streaming session state machine
//! - [`scanner`] - Board discovery
//! - [`service`] - Main service coordinator

pub mod configurator;
pub mod connection;
pub mod protocol;
pub mod registry;
pub mod scanner;
pub mod service;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

// Re-export main service for convenience
pub use service::BoardService;
