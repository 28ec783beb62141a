//! Notification collaborators
//!
//! Delivery itself (templating, provider APIs) lives elsewhere; the engine
//! only needs a way to send rendered content on a channel and a hook to
//! alert operators about payouts that need a human.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::failsafe::{Transient, dependencies, is_transient_error};
use crate::payment::Money;
use crate::store::{DriverId, TripId};

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// SMS
    Sms,
    /// Email
    Email,
    /// `WhatsApp`
    Whatsapp,
}

impl Channel {
    /// Name of the circuit breaker guarding this channel
    #[must_use]
    pub fn dependency(self) -> &'static str {
        match self {
            Self::Sms => dependencies::SMS,
            Self::Email => dependencies::EMAIL,
            Self::Whatsapp => dependencies::WHATSAPP,
        }
    }
}

/// Rendered notification ready to send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// Channel
    pub channel: Channel,
    /// Phone number or address
    pub recipient: String,
    /// Rendered body
    pub content: String,
}

impl NotificationRequest {
    /// Build a request
    #[must_use]
    pub fn new(channel: Channel, recipient: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel,
            recipient: recipient.into(),
            content: content.into(),
        }
    }
}

/// Provider acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Provider message id
    pub message_id: String,
}

/// Notification provider errors
#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    /// Provider unreachable or failing
    #[error("Notification provider error: {0}")]
    Provider(String),
    /// Provider refused the message (bad recipient, blocked content)
    #[error("Notification rejected: {0}")]
    Rejected(String),
}

impl Transient for NotifyError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Provider(message) => is_transient_error(None, message),
            Self::Rejected(_) => false,
        }
    }
}

/// Sends rendered notifications
#[async_trait]
pub trait NotificationDispatch: Send + Sync {
    /// Send one notification
    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, NotifyError>;
}

/// Details of a payout that could not be made
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutFailure {
    /// Trip concerned
    pub trip_id: TripId,
    /// Driver owed the money
    pub driver_id: DriverId,
    /// Amount that was not paid
    pub amount: Money,
    /// Idempotency key used with the gateway
    pub transfer_id: String,
}

/// Operator alerting hook
#[async_trait]
pub trait AdminNotifier: Send + Sync {
    /// Report a payout the gateway refused
    async fn notify_payout_failure(
        &self,
        failure: &PayoutFailure,
        reason: &str,
    ) -> Result<(), NotifyError>;
}

/// [`AdminNotifier`] that writes an error log line
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAdminNotifier;

#[async_trait]
impl AdminNotifier for LoggingAdminNotifier {
    async fn notify_payout_failure(
        &self,
        failure: &PayoutFailure,
        reason: &str,
    ) -> Result<(), NotifyError> {
        error!(
            trip_id = %failure.trip_id,
            driver_id = %failure.driver_id,
            amount = %failure.amount,
            transfer_id = %failure.transfer_id,
            reason,
            "Driver payout failed, manual reconciliation required"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_map_to_their_own_breakers() {
        assert_eq!(Channel::Sms.dependency(), "sms");
        assert_eq!(Channel::Email.dependency(), "email");
        assert_eq!(Channel::Whatsapp.dependency(), "whatsapp");
    }

    #[test]
    fn rejected_notifications_are_permanent() {
        assert!(NotifyError::Provider("ETIMEDOUT".into()).is_transient());
        assert!(!NotifyError::Rejected("invalid number".into()).is_transient());
    }

    #[tokio::test]
    async fn logging_notifier_never_fails() {
        let failure = PayoutFailure {
            trip_id: "t1".into(),
            driver_id: "d1".into(),
            amount: Money::from_major(50),
            transfer_id: "advance_t1".into(),
        };
        assert!(
            LoggingAdminNotifier
                .notify_payout_failure(&failure, "beneficiary inactive")
                .await
                .is_ok()
        );
    }
}
