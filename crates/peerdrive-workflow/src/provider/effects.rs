//! Production effect runner over the provider set

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::{ExternalVerifier, PhoneVerifier, ProviderError, RecipientDirectory};
use crate::gateway::CallbackToken;
use crate::notify::{DeliveryRequest, FallbackDelivery, Message};
use crate::workflow::{
    EffectError, EffectRunner, NoticeKind, StepEffect, StepInput, WorkflowExecution,
};

/// Interprets step effects against the injected providers
///
/// Verifier and phone failures fail the step (the execution stays put and is
/// retried); notification exhaustion is absorbed, because reaching the
/// subject is secondary to the business operation that triggered it.
pub struct ProviderEffects {
    delivery: Arc<FallbackDelivery>,
    verifier: Arc<dyn ExternalVerifier>,
    phone: Arc<dyn PhoneVerifier>,
    directory: Arc<dyn RecipientDirectory>,
}

impl ProviderEffects {
    /// Create an effect runner
    pub fn new(
        delivery: Arc<FallbackDelivery>,
        verifier: Arc<dyn ExternalVerifier>,
        phone: Arc<dyn PhoneVerifier>,
        directory: Arc<dyn RecipientDirectory>,
    ) -> Self {
        Self {
            delivery,
            verifier,
            phone,
            directory,
        }
    }

    async fn send_verification_code(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), EffectError> {
        let recipient = self.directory.lookup(execution.subject_id).await?;
        let phone = recipient.phone.as_deref().ok_or_else(|| {
            ProviderError::non_retryable(format!(
                "subject {} has no phone number on file",
                execution.subject_id
            ))
        })?;

        self.phone.send_code(phone).await?;
        info!(subject_id = %execution.subject_id, "verification code sent");
        Ok(())
    }

    async fn start_document_check(
        &self,
        execution: &WorkflowExecution,
        input: &StepInput,
    ) -> Result<(), EffectError> {
        let payload = serde_json::to_value(input)
            .map_err(|e| EffectError::non_retryable(format!("unencodable payload: {e}")))?;

        let reference_id = self.verifier.submit(execution.subject_id, payload).await?;
        info!(
            subject_id = %execution.subject_id,
            %reference_id,
            "document check submitted to vendor"
        );
        Ok(())
    }

    async fn notify(
        &self,
        execution: &WorkflowExecution,
        notice: NoticeKind,
        primary: crate::notify::ChannelKind,
        fallback: Option<crate::notify::ChannelKind>,
        callback: Option<&CallbackToken>,
    ) -> Result<(), EffectError> {
        let recipient = self.directory.lookup(execution.subject_id).await?;
        let mut message = render_notice(notice);
        if let Some(token) = callback {
            message = message.with_action_token(token.token.clone());
        }

        let report = self
            .delivery
            .deliver(&DeliveryRequest {
                primary,
                fallback,
                recipient,
                message,
            })
            .await;

        if !report.delivered() {
            // Exhaustion is an operational concern, not a step failure.
            warn!(
                subject_id = %execution.subject_id,
                notice = ?notice,
                attempts = report.attempts.len(),
                "notice could not be delivered on any channel"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl EffectRunner for ProviderEffects {
    #[instrument(skip(self, execution, input, callback), fields(execution_id = %execution.id))]
    async fn run(
        &self,
        effect: &StepEffect,
        execution: &WorkflowExecution,
        input: &StepInput,
        callback: Option<&CallbackToken>,
    ) -> Result<(), EffectError> {
        match effect {
            StepEffect::SendVerificationCode => self.send_verification_code(execution).await,
            StepEffect::StartDocumentCheck => self.start_document_check(execution, input).await,
            StepEffect::Notify {
                notice,
                primary,
                fallback,
            } => {
                self.notify(execution, *notice, *primary, *fallback, callback)
                    .await
            }
        }
    }
}

/// Render a notice template into a message
fn render_notice(notice: NoticeKind) -> Message {
    match notice {
        NoticeKind::OwnerDecisionRequested => Message::new(
            "New booking request",
            "A renter wants to book your car. Accept or decline within 24 hours.",
        ),
        NoticeKind::BookingConfirmed => Message::new(
            "Booking confirmed",
            "The owner accepted your booking request. You're all set.",
        ),
        NoticeKind::BookingRequestExpired => Message::new(
            "Booking request expired",
            "The owner didn't respond in time. Your request has been released.",
        ),
        NoticeKind::KycApproved => Message::new(
            "You're verified",
            "Your identity check passed and your account is now active.",
        ),
        NoticeKind::KycRejected => Message::new(
            "Verification unsuccessful",
            "We couldn't verify your identity. Review your documents and try again.",
        ),
        NoticeKind::KycWindowLapsed => Message::new(
            "Verification window lapsed",
            "Your identity check wasn't completed in time. Start verification again to continue.",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{
        ChannelError, ChannelKind, DeliveryPolicy, Dispatcher, NotificationChannel, Recipient,
    };
    use crate::workflow::StepId;
    use parking_lot::Mutex;
    use uuid::Uuid;

    struct StubVerifier;

    #[async_trait]
    impl ExternalVerifier for StubVerifier {
        async fn submit(
            &self,
            _subject_id: Uuid,
            _payload: serde_json::Value,
        ) -> Result<String, ProviderError> {
            Ok("chk_1".to_string())
        }
    }

    struct FailingPhone;

    #[async_trait]
    impl PhoneVerifier for FailingPhone {
        async fn send_code(&self, _phone: &str) -> Result<(), ProviderError> {
            Err(ProviderError::retryable("sms vendor 503"))
        }
    }

    struct OkPhone;

    #[async_trait]
    impl PhoneVerifier for OkPhone {
        async fn send_code(&self, _phone: &str) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct StubDirectory {
        phone: Option<String>,
    }

    #[async_trait]
    impl RecipientDirectory for StubDirectory {
        async fn lookup(&self, subject_id: Uuid) -> Result<Recipient, ProviderError> {
            let mut recipient = Recipient::new(subject_id).with_email("subject@example.com");
            if let Some(phone) = &self.phone {
                recipient = recipient.with_phone(phone.clone());
            }
            Ok(recipient)
        }
    }

    struct RecordingChannel {
        kind: ChannelKind,
        seen: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(&self, _: &Recipient, message: &Message) -> Result<(), ChannelError> {
            self.seen.lock().push(message.clone());
            Ok(())
        }
    }

    fn effects(
        phone: Arc<dyn PhoneVerifier>,
        directory_phone: Option<&str>,
        channel: Arc<RecordingChannel>,
    ) -> ProviderEffects {
        let dispatcher = Arc::new(Dispatcher::new().register(channel));
        let delivery = Arc::new(FallbackDelivery::new(
            dispatcher,
            DeliveryPolicy::default().with_base_delay(std::time::Duration::from_millis(1)),
        ));
        ProviderEffects::new(
            delivery,
            Arc::new(StubVerifier),
            phone,
            Arc::new(StubDirectory {
                phone: directory_phone.map(str::to_string),
            }),
        )
    }

    fn execution() -> WorkflowExecution {
        WorkflowExecution::new(Uuid::now_v7(), "driver_onboarding", StepId::new("s"))
    }

    fn recording(kind: ChannelKind) -> Arc<RecordingChannel> {
        Arc::new(RecordingChannel {
            kind,
            seen: Mutex::new(vec![]),
        })
    }

    #[tokio::test]
    async fn test_send_code_requires_phone() {
        let runner = effects(Arc::new(OkPhone), None, recording(ChannelKind::Email));

        let err = runner
            .run(
                &StepEffect::SendVerificationCode,
                &execution(),
                &StepInput::None,
                None,
            )
            .await
            .unwrap_err();

        assert!(!err.retryable);
        assert!(err.message.contains("no phone number"));
    }

    #[tokio::test]
    async fn test_send_code_propagates_vendor_failure() {
        let runner = effects(
            Arc::new(FailingPhone),
            Some("+15550100"),
            recording(ChannelKind::Email),
        );

        let err = runner
            .run(
                &StepEffect::SendVerificationCode,
                &execution(),
                &StepInput::None,
                None,
            )
            .await
            .unwrap_err();

        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_notify_embeds_callback_token() {
        let channel = recording(ChannelKind::Push);
        let runner = effects(Arc::new(OkPhone), None, channel.clone());

        let token = CallbackToken {
            token: "tok_abc".to_string(),
            execution_id: Uuid::now_v7(),
            issued_at: chrono::Utc::now(),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            redeemed: false,
        };

        runner
            .run(
                &StepEffect::Notify {
                    notice: NoticeKind::OwnerDecisionRequested,
                    primary: ChannelKind::Push,
                    fallback: None,
                },
                &execution(),
                &StepInput::None,
                Some(&token),
            )
            .await
            .unwrap();

        let seen = channel.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].action_token.as_deref(), Some("tok_abc"));
    }

    #[tokio::test]
    async fn test_notify_exhaustion_is_absorbed() {
        // No channel registered at all: delivery exhausts, effect still Ok.
        let runner = effects(Arc::new(OkPhone), None, recording(ChannelKind::Email));

        let result = runner
            .run(
                &StepEffect::Notify {
                    notice: NoticeKind::KycRejected,
                    primary: ChannelKind::Push,
                    fallback: None,
                },
                &execution(),
                &StepInput::None,
                None,
            )
            .await;

        assert!(result.is_ok());
    }
}
