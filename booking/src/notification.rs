//! Notification and document collaborator.
//!
//! Rendering a ticket artifact and sending notices are fire-and-forget: the
//! reducer emits them as effects after a transition has committed, and a
//! failure after retries lands in the dead letter queue without touching the
//! ticket.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

use crate::types::{BookingReference, Ticket, UserId};

/// Boxed notifier future
pub type NotifyFuture<T> = Pin<Box<dyn Future<Output = Result<T, NotifyError>> + Send>>;

/// Notifier failures
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// Delivery or rendering service unreachable
    #[error("notification service unavailable: {0}")]
    Unavailable(String),
}

/// Notice templates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Payment captured, ticket confirmed
    BookingConfirmation,
    /// Ticket cancelled
    Cancellation,
    /// Refund issued
    Refund,
    /// Party admitted
    CheckIn,
}

impl NotificationKind {
    /// Template name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BookingConfirmation => "booking_confirmation",
            Self::Cancellation => "cancellation",
            Self::Refund => "refund",
            Self::CheckIn => "check_in",
        }
    }
}

/// Rendered ticket document
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TicketArtifact {
    /// Ticket
    pub reference: BookingReference,
    /// Document handle
    pub document_id: String,
    /// Payload encoded in the QR code
    pub verification_payload: String,
}

/// A sent notice, as recorded by [`LoggingNotifier`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentNotice {
    /// Template
    pub kind: NotificationKind,
    /// Ticket
    pub reference: BookingReference,
    /// Recipient
    pub user_id: UserId,
}

/// Renders ticket documents and sends notices
pub trait TicketNotifier: Send + Sync {
    /// Render the ticket (PDF/QR) for delivery
    ///
    /// # Errors
    ///
    /// [`NotifyError::Unavailable`] when the document service fails
    fn issue_ticket_artifact(&self, ticket: &Ticket) -> NotifyFuture<TicketArtifact>;

    /// Send a notice about `ticket`
    ///
    /// # Errors
    ///
    /// [`NotifyError::Unavailable`] when delivery fails
    fn notify(&self, kind: NotificationKind, ticket: &Ticket) -> NotifyFuture<()>;
}

/// Notifier that logs and records instead of delivering.
///
/// Clones share the record.
#[derive(Clone, Debug, Default)]
pub struct LoggingNotifier {
    failing: Arc<AtomicBool>,
    artifacts: Arc<Mutex<Vec<TicketArtifact>>>,
    notices: Arc<Mutex<Vec<SentNotice>>>,
}

impl LoggingNotifier {
    /// New notifier
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Artifacts rendered so far
    #[must_use]
    pub fn artifacts(&self) -> Vec<TicketArtifact> {
        self.artifacts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Notices sent so far
    #[must_use]
    pub fn notices(&self) -> Vec<SentNotice> {
        self.notices
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn check(&self) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(NotifyError::Unavailable("delivery disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

impl TicketNotifier for LoggingNotifier {
    fn issue_ticket_artifact(&self, ticket: &Ticket) -> NotifyFuture<TicketArtifact> {
        let outcome = self.check().map(|()| TicketArtifact {
            reference: ticket.reference.clone(),
            document_id: format!("doc_{}", ticket.id),
            verification_payload: ticket.verification_payload.clone(),
        });
        let artifacts = Arc::clone(&self.artifacts);

        Box::pin(async move {
            let artifact = outcome?;
            tracing::info!(reference = %artifact.reference, document_id = %artifact.document_id, "Ticket artifact issued");
            artifacts
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(artifact.clone());
            Ok(artifact)
        })
    }

    fn notify(&self, kind: NotificationKind, ticket: &Ticket) -> NotifyFuture<()> {
        let outcome = self.check().map(|()| SentNotice {
            kind,
            reference: ticket.reference.clone(),
            user_id: ticket.user_id.clone(),
        });
        let notices = Arc::clone(&self.notices);

        Box::pin(async move {
            let notice = outcome?;
            tracing::info!(
                kind = notice.kind.as_str(),
                reference = %notice.reference,
                user_id = %notice.user_id,
                "Notification sent"
            );
            notices
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(notice);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ledger::tests::ticket;

    #[tokio::test]
    async fn records_artifacts_and_notices() {
        let notifier = LoggingNotifier::new();
        let ticket = ticket("A", "u1", 1);

        notifier.issue_ticket_artifact(&ticket).await.unwrap();
        notifier.notify(NotificationKind::Cancellation, &ticket).await.unwrap();

        assert_eq!(notifier.artifacts()[0].reference, ticket.reference);
        assert_eq!(notifier.notices()[0].kind, NotificationKind::Cancellation);
    }

    #[tokio::test]
    async fn failing_notifier_records_nothing() {
        let notifier = LoggingNotifier::new();
        notifier.set_failing(true);

        let result = notifier.notify(NotificationKind::Refund, &ticket("A", "u1", 1)).await;
        assert!(result.is_err());
        assert!(notifier.notices().is_empty());
    }
}
