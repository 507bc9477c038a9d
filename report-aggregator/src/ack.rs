//! Best-effort acknowledgement back to the publisher (§4.5 step 4) —
//! identical shape to `journal-consumer::ack`, duplicated rather than
//! shared because each consumer owns its own subscriber identity.

use reqwest::Client;

#[derive(Clone)]
pub struct Acknowledger {
    client: Client,
    cart_engine_url: String,
    subscriber_id: String,
}

impl Acknowledger {
    pub fn new(cart_engine_url: impl Into<String>, subscriber_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            cart_engine_url: cart_engine_url.into(),
            subscriber_id: subscriber_id.into(),
        }
    }

    /// Spawns the callback and returns immediately; failures are logged,
    /// never surfaced — the republish scheduler (§4.5) is what guarantees
    /// eventual delivery, not this callback.
    pub fn spawn_ack(&self, event_id: String, success: bool) {
        let client = self.client.clone();
        let url = format!("{}/events/{event_id}/ack", self.cart_engine_url);
        let subscriber_id = self.subscriber_id.clone();
        tokio::spawn(async move {
            let body = serde_json::json!({ "subscriberId": subscriber_id, "success": success });
            let outcome = client.post(&url).json(&body).send().await.and_then(|r| r.error_for_status());
            if let Err(err) = outcome {
                tracing::warn!(event_id, error = %err, "ack callback failed");
            }
        });
    }
}
