//! In-process input relay.
//!
//! Attributed controller inputs are broadcast to any number of subscribers
//! (the translator driver, UI "last input" indicators) without coupling them
//! to the transport.

use couchlink_wire::ControllerInput;
use tokio::sync::broadcast;

/// Events a subscriber may fall behind by before it starts missing them.
const INPUT_BUS_CAPACITY: usize = 256;

/// Broadcast fan-out of attributed inputs. Clones share one channel.
#[derive(Debug, Clone)]
pub struct InputBus {
    sender: broadcast::Sender<ControllerInput>,
}

impl Default for InputBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InputBus {
    /// A bus with no subscribers.
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(INPUT_BUS_CAPACITY).0,
        }
    }

    /// Receive every event published from now on. A receiver that lags
    /// more than the bus capacity gets `RecvError::Lagged` and resumes with
    /// the oldest retained event.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerInput> {
        self.sender.subscribe()
    }

    /// Fire-and-forget. Returns how many subscribers will see the event.
    pub fn publish(&self, event: ControllerInput) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Live receivers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
