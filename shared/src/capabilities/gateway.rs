use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
}

/// User-facing prompts and transient status toasts.
#[async_trait::async_trait]
pub trait ConfirmationGateway: Send + Sync {
    /// Suspends the triggering interaction until the user answers.
    async fn confirm(&self, title: &str, body: &str) -> bool;

    /// Fire-and-forget; must not block.
    fn notify(&self, kind: NotificationKind, message: &str);
}

/// Gateway for headless hosts: confirms everything and forwards
/// notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

#[async_trait::async_trait]
impl ConfirmationGateway for AutoConfirm {
    async fn confirm(&self, title: &str, _body: &str) -> bool {
        tracing::debug!(title, "Auto-confirming prompt");
        true
    }

    fn notify(&self, kind: NotificationKind, message: &str) {
        match kind {
            NotificationKind::Success => tracing::info!(text = message, "Notification"),
            NotificationKind::Error => tracing::warn!(text = message, "Notification"),
        }
    }
}
