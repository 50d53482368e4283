use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Events emitted by the order/payment core. Consumers run off the request
/// path; a slow or absent consumer must never fail a checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
    },
    OrderPaid {
        order_id: Uuid,
        payment_intent_id: String,
    },
    OrderPaymentFailed {
        order_id: Uuid,
    },
    InventoryReserved {
        variant_id: Uuid,
        quantity: i32,
        order_id: Uuid,
    },
    CustomerRegistered {
        customer_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a connected sender/receiver pair with a bounded buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Background consumer. Currently logs each event; notification and analytics
/// fan-out hang off this loop.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
            } => {
                info!(%order_id, %order_number, "order created");
            }
            Event::OrderPaid {
                order_id,
                payment_intent_id,
            } => {
                info!(%order_id, %payment_intent_id, "order paid");
            }
            Event::OrderPaymentFailed { order_id } => {
                info!(%order_id, "order payment failed");
            }
            Event::InventoryReserved {
                variant_id,
                quantity,
                order_id,
            } => {
                debug!(%variant_id, quantity, %order_id, "inventory reserved");
            }
            Event::CustomerRegistered { customer_id } => {
                info!(%customer_id, "customer registered");
            }
        }
    }
    debug!("event channel closed; consumer exiting");
}
