//! BLE Scanner Module
//!
//! Collects board addresses reported by transport discovery.

use crate::domain::address::BoardAddress;
use crate::domain::models::BoardEvent;
use crate::infrastructure::bluetooth::connection::lock;
use crate::infrastructure::bluetooth::transport::BleTransport;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// BLE Scanner for discovering MetaWear boards
pub struct BoardScanner {
    transport: Arc<dyn BleTransport>,
    event_sender: mpsc::UnboundedSender<BoardEvent>,
    /// Each board listed once, in discovery order
    results: Arc<Mutex<Vec<BoardAddress>>>,
    task: Option<JoinHandle<()>>,
}

impl BoardScanner {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        event_sender: mpsc::UnboundedSender<BoardEvent>,
    ) -> Self {
        Self {
            transport,
            event_sender,
            results: Arc::new(Mutex::new(Vec::new())),
            task: None,
        }
    }

    /// Start scanning. Must be called within a tokio runtime.
    pub fn start(&mut self) {
        self.stop();
        info!("Scanning for MetaWear boards...");

        let mut discovered = self.transport.discover();
        let results = self.results.clone();
        let sender = self.event_sender.clone();

        self.task = Some(tokio::spawn(async move {
            while let Some(address) = discovered.recv().await {
                let is_new = {
                    let mut results = lock(&results);
                    if results.contains(&address) {
                        false
                    } else {
                        results.push(address);
                        true
                    }
                };
                if is_new {
                    info!("Found new device with MAC address {}.", address);
                    let _ = sender.send(BoardEvent::BoardFound(address));
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            info!("Stopped scanning.");
            task.abort();
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Boards found so far
    pub fn results(&self) -> Vec<BoardAddress> {
        lock(&self.results).clone()
    }
}

impl Drop for BoardScanner {
    fn drop(&mut self) {
        self.stop();
    }
}
