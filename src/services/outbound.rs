/*!
 * Outbound Notification Worker
 *
 * Post-commit delivery of LINE push messages. Handlers enqueue rendered
 * messages after their transaction commits; a background task drains the
 * queue and talks to the LINE Messaging API. A failed send is logged and
 * retried once, and never affects the request that produced it.
 */

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const LINE_PUSH_URL: &str = "https://api.line.me/v2/bot/message/push";

/// A rendered push message ready for delivery
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// The clinic's LINE channel access token
    pub channel_access_token: String,
    /// LINE user id of the recipient
    pub to: String,
    pub text: String,
}

/// Cloneable handle used by handlers to enqueue messages
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl OutboundSender {
    /// Enqueue messages for delivery. Errors only when the worker is
    /// gone, which is logged and swallowed: notification loss must not
    /// fail the caller.
    pub fn enqueue(&self, messages: Vec<OutboundMessage>) {
        for message in messages {
            if self.tx.send(message).is_err() {
                error!("Outbound worker is not running; dropping notification");
            }
        }
    }
}

/// LINE Messaging API push client
#[derive(Debug, Clone)]
pub struct LinePushClient {
    http: reqwest::Client,
}

impl LinePushClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Push one text message
    pub async fn push(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        let response = self
            .http
            .post(LINE_PUSH_URL)
            .bearer_auth(&message.channel_access_token)
            .json(&json!({
                "to": message.to,
                "messages": [{"type": "text", "text": message.text}],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LINE push failed with {}: {}", status, body);
        }
        Ok(())
    }
}

impl Default for LinePushClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the outbound worker and return the enqueue handle.
///
/// This should be called from main.rs before the router is built.
pub fn spawn_outbound_worker(client: LinePushClient) -> OutboundSender {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();

    tokio::spawn(async move {
        info!("Outbound notification worker started");
        while let Some(message) = rx.recv().await {
            match client.push(&message).await {
                Ok(()) => debug!("Pushed notification to {}", message.to),
                Err(first_err) => {
                    // One retry; after that the failure is only logged.
                    match client.push(&message).await {
                        Ok(()) => debug!("Pushed notification to {} on retry", message.to),
                        Err(retry_err) => error!(
                            "Failed to push notification to {}: {} (retry: {})",
                            message.to, first_err, retry_err
                        ),
                    }
                }
            }
        }
        info!("Outbound notification worker stopped");
    });

    OutboundSender { tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_after_worker_drop_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel::<OutboundMessage>();
        drop(rx);
        let sender = OutboundSender { tx };
        sender.enqueue(vec![OutboundMessage {
            channel_access_token: "token".to_string(),
            to: "U1".to_string(),
            text: "hello".to_string(),
        }]);
    }

    #[tokio::test]
    async fn test_worker_drains_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let sender = OutboundSender { tx };
        sender.enqueue(vec![
            OutboundMessage {
                channel_access_token: "token".to_string(),
                to: "U1".to_string(),
                text: "a".to_string(),
            },
            OutboundMessage {
                channel_access_token: "token".to_string(),
                to: "U2".to_string(),
                text: "b".to_string(),
            },
        ]);
        assert_eq!(rx.recv().await.unwrap().to, "U1");
        assert_eq!(rx.recv().await.unwrap().to, "U2");
    }
}
