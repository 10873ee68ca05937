//! Domain errors of the booking engine.
//!
//! Every rejected command surfaces exactly one of these kinds. None of them
//! leaves a partial capacity commit behind.

use serde::Serialize;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::ledger::LedgerError;
use crate::persistence::RepositoryError;
use crate::pricing::PricingError;
use crate::types::{BookingReference, TicketStatus};

/// Result alias for engine operations
pub type BookingResult<T> = Result<T, BookingError>;

/// Error kinds surfaced to callers
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingError {
    /// Malformed request (visitor list, dates, ratings). Never retried.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// Not enough room in the slot at commit time
    #[error("not enough availability: requested {requested}, available {available}")]
    CapacityExceeded {
        /// Visitors requested
        requested: u32,
        /// Places left
        available: u32,
    },

    /// Lifecycle guard rejected the command; no state changed
    #[error("cannot {action} ticket {reference} in status {from}: {reason}")]
    InvalidTransition {
        /// Ticket
        reference: BookingReference,
        /// Status at the time of the attempt
        from: TicketStatus,
        /// Attempted operation
        action: &'static str,
        /// Guard that failed
        reason: String,
    },

    /// Payment callback did not match the expected order
    #[error("payment mismatch for {reference}: {reason}")]
    PaymentMismatch {
        /// Ticket
        reference: BookingReference,
        /// What did not match
        reason: String,
    },

    /// Unknown ticket or site
    #[error("{entity} {id} not found")]
    NotFound {
        /// `ticket` or `site`
        entity: &'static str,
        /// Identifier looked up
        id: String,
    },

    /// A collaborator the operation depends on could not be reached
    #[error("{service} unavailable: {message}")]
    DownstreamUnavailable {
        /// Collaborator name
        service: &'static str,
        /// Failure detail
        message: String,
    },

    /// Broken engine invariant or runtime failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// Stable machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InputValidation(_) => "input_validation",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::PaymentMismatch { .. } => "payment_mismatch",
            Self::NotFound { .. } => "not_found",
            Self::DownstreamUnavailable { .. } => "downstream_unavailable",
            Self::Internal(_) => "internal",
        }
    }

    /// Shorthand for [`BookingError::InputValidation`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InputValidation(message.into())
    }

    /// Shorthand for a missing ticket
    pub fn ticket_not_found(reference: &BookingReference) -> Self {
        Self::NotFound {
            entity: "ticket",
            id: reference.to_string(),
        }
    }

    /// Shorthand for [`BookingError::InvalidTransition`]
    pub fn transition(
        reference: &BookingReference,
        from: TicketStatus,
        action: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            reference: reference.clone(),
            from,
            action,
            reason: reason.into(),
        }
    }
}

impl From<PricingError> for BookingError {
    fn from(error: PricingError) -> Self {
        Self::InputValidation(error.to_string())
    }
}

impl From<LedgerError> for BookingError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::UnknownTicket(reference) => Self::ticket_not_found(&reference),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<CatalogError> for BookingError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::NotFound(site_id) => Self::NotFound {
                entity: "site",
                id: site_id.to_string(),
            },
            CatalogError::Unavailable(message) => Self::DownstreamUnavailable {
                service: "catalog",
                message,
            },
            CatalogError::Seed(message) => Self::Internal(message),
        }
    }
}

impl From<RepositoryError> for BookingError {
    fn from(error: RepositoryError) -> Self {
        Self::DownstreamUnavailable {
            service: "repository",
            message: error.to_string(),
        }
    }
}

impl From<booking_runtime::StoreError> for BookingError {
    fn from(error: booking_runtime::StoreError) -> Self {
        Self::Internal(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_message_names_guard() {
        let error = BookingError::transition(
            &BookingReference::from("TAJ-20250314-AAAAAA"),
            TicketStatus::CheckedIn,
            "cancel",
            "ticket already checked in",
        );
        assert_eq!(
            error.to_string(),
            "cannot cancel ticket TAJ-20250314-AAAAAA in status checked_in: ticket already checked in"
        );
        assert_eq!(error.code(), "invalid_transition");
    }

    #[test]
    fn pricing_errors_are_input_errors() {
        let error: BookingError = PricingError::NoVisitors.into();
        assert!(matches!(error, BookingError::InputValidation(_)));
    }

    #[test]
    fn unknown_ledger_ticket_is_not_found() {
        let error: BookingError = LedgerError::UnknownTicket(BookingReference::from("X")).into();
        assert_eq!(error.code(), "not_found");
    }
}
