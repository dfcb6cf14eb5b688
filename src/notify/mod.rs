//! Fire-and-forget event notifications
//!
//! Each event is POSTed to the backend `/notifications` endpoint from a
//! detached task. Failures are logged and never reach the caller.

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::portfolio::BackendClient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    SwapCompleted,
    TokenReceived,
    MessageReceived,
}

/// Wire body for `POST /notifications`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    SwapCompleted {
        input_amount: String,
        input_symbol: String,
        output_amount: String,
        output_symbol: String,
    },
    TokenReceived {
        amount: String,
        symbol: String,
        recipient: String,
    },
    MessageReceived {
        sender: String,
        preview: String,
    },
}

impl Notification {
    pub fn payload(&self) -> NotificationPayload {
        match self {
            Notification::SwapCompleted {
                input_amount,
                input_symbol,
                output_amount,
                output_symbol,
            } => NotificationPayload {
                kind: NotificationType::SwapCompleted,
                title: "Swap completed".to_string(),
                body: format!(
                    "Swapped {} {} for {} {}",
                    input_amount, input_symbol, output_amount, output_symbol
                ),
            },
            Notification::TokenReceived {
                amount,
                symbol,
                recipient,
            } => NotificationPayload {
                kind: NotificationType::TokenReceived,
                title: format!("{} received", symbol),
                body: format!("{} received {} {}", recipient, amount, symbol),
            },
            Notification::MessageReceived { sender, preview } => NotificationPayload {
                kind: NotificationType::MessageReceived,
                title: format!("New message from {}", sender),
                body: preview.clone(),
            },
        }
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    backend: BackendClient,
    access_token: String,
}

impl NotificationDispatcher {
    pub fn new(backend: BackendClient, access_token: impl Into<String>) -> Self {
        Self {
            backend,
            access_token: access_token.into(),
        }
    }

    /// Spawn the POST and return immediately. Awaiting the handle is optional.
    #[instrument(skip(self, notification))]
    pub fn dispatch(&self, notification: Notification) -> JoinHandle<()> {
        let payload = notification.payload();
        let backend = self.backend.clone();
        let access_token = self.access_token.clone();

        tokio::spawn(async move {
            let result = backend
                .http()
                .post(backend.endpoint("notifications"))
                .bearer_auth(&access_token)
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(response) => debug!(
                    kind = ?payload.kind,
                    status = response.status().as_u16(),
                    "Notification dispatched"
                ),
                Err(e) => warn!(kind = ?payload.kind, error = %e, "Failed to dispatch notification"),
            }
        })
    }

    pub fn notify_swap_completed(
        &self,
        input_amount: &str,
        input_symbol: &str,
        output_amount: &str,
        output_symbol: &str,
    ) -> JoinHandle<()> {
        self.dispatch(Notification::SwapCompleted {
            input_amount: input_amount.to_string(),
            input_symbol: input_symbol.to_string(),
            output_amount: output_amount.to_string(),
            output_symbol: output_symbol.to_string(),
        })
    }

    pub fn notify_token_received(&self, amount: &str, symbol: &str, recipient: &str) -> JoinHandle<()> {
        self.dispatch(Notification::TokenReceived {
            amount: amount.to_string(),
            symbol: symbol.to_string(),
            recipient: recipient.to_string(),
        })
    }

    pub fn notify_message_received(&self, sender: &str, preview: &str) -> JoinHandle<()> {
        self.dispatch(Notification::MessageReceived {
            sender: sender.to_string(),
            preview: preview.to_string(),
        })
    }
}
