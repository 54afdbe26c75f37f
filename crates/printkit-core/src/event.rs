//! Event system for controller notifications
//!
//! Provides:
//! - Event types for controller, temperature, and progress changes
//! - Event dispatcher for publishing events to subscribers
//!
//! Events are published synchronously in the processing step that caused
//! them. Within one step the order is: state change, then domain-specific
//! change (temperature, progress), then the diagnostic echo of the raw line.

use crate::data::{ControllerState, Temperature};
use tokio::sync::broadcast;

/// Controller event types
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// Controller state changed
    StateChanged(ControllerState),
    /// Temperature report was parsed from the device
    TemperatureChanged(Temperature),
    /// A raw line was received from the device (diagnostics)
    MessageReceived(String),
    /// Print job progress changed (0–100)
    PrintProgressChanged(f32),
    /// The set of available serial ports changed
    PortsChanged(Vec<String>),
    /// An error occurred
    Error(String),
}

impl std::fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerEvent::StateChanged(state) => write!(f, "State: {}", state),
            ControllerEvent::TemperatureChanged(temp) => write!(f, "Temperature: {}", temp),
            ControllerEvent::MessageReceived(msg) => write!(f, "Message: {}", msg),
            ControllerEvent::PrintProgressChanged(pct) => write!(f, "Progress: {:.1}%", pct),
            ControllerEvent::PortsChanged(ports) => write!(f, "Ports: {}", ports.join(", ")),
            ControllerEvent::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for controller events.
    tx: broadcast::Sender<ControllerEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 100)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of subscribers the event reached. Publishing with
    /// no subscribers is not an error from the controller's point of view;
    /// callers that do not care drop the result.
    pub fn publish(
        &self,
        event: ControllerEvent,
    ) -> Result<usize, broadcast::error::SendError<ControllerEvent>> {
        self.tx.send(event)
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
