//! Host-side control of MetaWear sensor boards over BLE.
//!
//! Connects boards, configures the accelerometer or sensor fusion module,
//! streams samples to a caller-supplied callback and tears everything down
//! again, with the BLE stack injected through [`BleTransport`].

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::address::BoardAddress;
pub use domain::models::{BoardEvent, ModuleConfig, SensorSample};
pub use error::{BoardError, TransportError};
pub use infrastructure::bluetooth::connection::{BoardConnection, ConnectionManager};
pub use infrastructure::bluetooth::session::{ModuleSession, StreamingSession};
pub use infrastructure::bluetooth::transport::BleTransport;
pub use infrastructure::bluetooth::BoardService;
