//! Retry-with-fallback delivery policy
//!
//! Wraps the [`Dispatcher`]: a delivery request is attempted on its primary
//! channel with exponential backoff up to a bound, then once on the fallback
//! channel. The policy never raises — callers always get a report, because a
//! failed notification must not abort the business operation that triggered
//! it (a booking is still created even if the owner could not be reached).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::channel::{ChannelKind, Dispatcher, Message, Recipient};

/// Configuration for a delivery request
///
/// # Example
///
/// ```
/// use peerdrive_workflow::notify::DeliveryPolicy;
/// use std::time::Duration;
///
/// let policy = DeliveryPolicy::default()
///     .with_max_retries(5)
///     .with_base_delay(Duration::from_millis(250));
///
/// // First retry after ~250ms
/// // Second retry after ~500ms
/// // Third retry after ~1s, capped at max_delay
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryPolicy {
    /// Total attempts on the primary channel (including the first)
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Cap on the backoff delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl DeliveryPolicy {
    /// Set the primary-channel attempt bound
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Set the base backoff delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff cap
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait before the given attempt (1-based)
    ///
    /// The first attempt is immediate; attempt `n` waits
    /// `base * 2^(n-2)` capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exp = (attempt - 2).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

/// Outcome of a single attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failed { error: String },
}

/// One recorded send attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    /// Channel used
    pub channel: ChannelKind,

    /// 1-based, monotonic across both channels within a request
    pub attempt_number: u32,

    pub outcome: AttemptOutcome,

    pub at: DateTime<Utc>,
}

impl NotificationAttempt {
    fn record(channel: ChannelKind, attempt_number: u32, result: &Result<(), super::ChannelError>) -> Self {
        Self {
            channel,
            attempt_number,
            outcome: match result {
                Ok(()) => AttemptOutcome::Success,
                Err(e) => AttemptOutcome::Failed {
                    error: e.message.clone(),
                },
            },
            at: Utc::now(),
        }
    }

    /// Whether the attempt succeeded
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// Final status of a delivery request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Some attempt succeeded, on the named channel
    Delivered { channel: ChannelKind },

    /// Every attempt on both channels failed
    Exhausted,
}

/// What the policy hands back: final status plus the full attempt history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub status: DeliveryStatus,
    pub attempts: Vec<NotificationAttempt>,
}

impl DeliveryReport {
    /// Whether the message reached the recipient
    pub fn delivered(&self) -> bool {
        matches!(self.status, DeliveryStatus::Delivered { .. })
    }
}

/// A message to deliver with a primary channel and optional fallback
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub primary: ChannelKind,
    pub fallback: Option<ChannelKind>,
    pub recipient: Recipient,
    pub message: Message,
}

/// Executes delivery requests under a [`DeliveryPolicy`]
pub struct FallbackDelivery {
    dispatcher: Arc<Dispatcher>,
    policy: DeliveryPolicy,
}

impl FallbackDelivery {
    /// Create a delivery executor
    pub fn new(dispatcher: Arc<Dispatcher>, policy: DeliveryPolicy) -> Self {
        Self { dispatcher, policy }
    }

    /// Deliver one request
    ///
    /// Infallible by contract: the report's `Exhausted` status is the only
    /// failure surface.
    #[instrument(skip(self, request), fields(primary = %request.primary, subject_id = %request.recipient.subject_id))]
    pub async fn deliver(&self, request: &DeliveryRequest) -> DeliveryReport {
        let mut attempts = Vec::new();
        let mut attempt_number = 0u32;

        for _ in 0..self.policy.max_retries {
            attempt_number += 1;

            let delay = self.policy.delay_for_attempt(attempt_number);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let result = self
                .dispatcher
                .dispatch(request.primary, &request.recipient, &request.message)
                .await;
            attempts.push(NotificationAttempt::record(
                request.primary,
                attempt_number,
                &result,
            ));

            match result {
                Ok(()) => {
                    debug!(attempt = attempt_number, "delivered on primary channel");
                    return DeliveryReport {
                        status: DeliveryStatus::Delivered {
                            channel: request.primary,
                        },
                        attempts,
                    };
                }
                Err(e) if !e.retryable => {
                    debug!(attempt = attempt_number, error = %e, "primary channel failed permanently");
                    break;
                }
                Err(e) => {
                    debug!(attempt = attempt_number, error = %e, "primary channel attempt failed");
                }
            }
        }

        // Fallback is a single attempt: its exhaustion is terminal for the
        // request, so retrying it in-policy would only delay the report.
        if let Some(fallback) = request.fallback {
            attempt_number += 1;

            let result = self
                .dispatcher
                .dispatch(fallback, &request.recipient, &request.message)
                .await;
            attempts.push(NotificationAttempt::record(fallback, attempt_number, &result));

            if result.is_ok() {
                debug!(channel = %fallback, "delivered on fallback channel");
                return DeliveryReport {
                    status: DeliveryStatus::Delivered { channel: fallback },
                    attempts,
                };
            }
        }

        warn!(
            attempts = attempts.len(),
            subject_id = %request.recipient.subject_id,
            "delivery exhausted on all channels"
        );

        DeliveryReport {
            status: DeliveryStatus::Exhausted,
            attempts,
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChannelError, NotificationChannel};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct FixedChannel {
        kind: ChannelKind,
        fail: bool,
        calls: AtomicU32,
    }

    impl FixedChannel {
        fn new(kind: ChannelKind, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl NotificationChannel for FixedChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(&self, _: &Recipient, _: &Message) -> Result<(), ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ChannelError::retryable("provider 500"))
            } else {
                Ok(())
            }
        }
    }

    fn test_policy() -> DeliveryPolicy {
        DeliveryPolicy::default()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
    }

    fn request(primary: ChannelKind, fallback: Option<ChannelKind>) -> DeliveryRequest {
        DeliveryRequest {
            primary,
            fallback,
            recipient: Recipient::new(Uuid::now_v7()).with_email("owner@example.com"),
            message: Message::new("Booking request", "A renter requested your car."),
        }
    }

    #[test]
    fn test_backoff_shape() {
        let policy = DeliveryPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));

        // Capped at max_delay
        assert_eq!(policy.delay_for_attempt(12), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_first_attempt_delivers() {
        let email = FixedChannel::new(ChannelKind::Email, false);
        let dispatcher = Arc::new(Dispatcher::new().register(email.clone()));
        let delivery = FallbackDelivery::new(dispatcher, test_policy());

        let report = delivery.deliver(&request(ChannelKind::Email, None)).await;

        assert_eq!(
            report.status,
            DeliveryStatus::Delivered {
                channel: ChannelKind::Email
            }
        );
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(email.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_completeness() {
        // Primary always fails, fallback always succeeds: 3 primary attempts
        // then exactly one fallback attempt.
        let sms = FixedChannel::new(ChannelKind::Sms, true);
        let email = FixedChannel::new(ChannelKind::Email, false);
        let dispatcher = Arc::new(Dispatcher::new().register(sms.clone()).register(email.clone()));
        let delivery = FallbackDelivery::new(dispatcher, test_policy());

        let report = delivery
            .deliver(&request(ChannelKind::Sms, Some(ChannelKind::Email)))
            .await;

        assert_eq!(
            report.status,
            DeliveryStatus::Delivered {
                channel: ChannelKind::Email
            }
        );
        assert_eq!(report.attempts.len(), 4);
        assert_eq!(sms.calls.load(Ordering::SeqCst), 3);
        assert_eq!(email.calls.load(Ordering::SeqCst), 1);

        // Attempt numbers are monotonic across both channels
        let numbers: Vec<u32> = report.attempts.iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert!(report.attempts[3].succeeded());
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let sms = FixedChannel::new(ChannelKind::Sms, true);
        let email = FixedChannel::new(ChannelKind::Email, true);
        let dispatcher = Arc::new(Dispatcher::new().register(sms).register(email));
        let delivery = FallbackDelivery::new(dispatcher, test_policy());

        let report = delivery
            .deliver(&request(ChannelKind::Sms, Some(ChannelKind::Email)))
            .await;

        assert_eq!(report.status, DeliveryStatus::Exhausted);
        assert_eq!(report.attempts.len(), 4); // max_retries + 1
        assert!(!report.delivered());
    }

    #[tokio::test]
    async fn test_exhaustion_without_fallback() {
        let sms = FixedChannel::new(ChannelKind::Sms, true);
        let dispatcher = Arc::new(Dispatcher::new().register(sms));
        let delivery = FallbackDelivery::new(dispatcher, test_policy());

        let report = delivery.deliver(&request(ChannelKind::Sms, None)).await;

        assert_eq!(report.status, DeliveryStatus::Exhausted);
        assert_eq!(report.attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_primary_falls_back_early() {
        // An unregistered primary is a permanent failure: one recorded
        // attempt, then straight to the fallback.
        let email = FixedChannel::new(ChannelKind::Email, false);
        let dispatcher = Arc::new(Dispatcher::new().register(email));
        let delivery = FallbackDelivery::new(dispatcher, test_policy());

        let report = delivery
            .deliver(&request(ChannelKind::Push, Some(ChannelKind::Email)))
            .await;

        assert_eq!(
            report.status,
            DeliveryStatus::Delivered {
                channel: ChannelKind::Email
            }
        );
        assert_eq!(report.attempts.len(), 2);
    }

    #[test]
    fn test_policy_serialization() {
        let policy = test_policy().with_max_retries(5);

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: DeliveryPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(policy, parsed);
    }
}
