//! Built-in workflow definitions
//!
//! The marketplace ships two flows: driver onboarding (KYC) and booking
//! acceptance. Both are plain data built from [`StepDescriptor`]s.

use std::time::Duration;

use super::{StepDescriptor, StepGate, WorkflowDefinition};
use crate::notify::ChannelKind;
use crate::workflow::{InputKind, NoticeKind, StepEffect};

/// Driver onboarding definition name
pub const DRIVER_ONBOARDING: &str = "driver_onboarding";

/// Booking acceptance definition name
pub const BOOKING_ACCEPTANCE: &str = "booking_acceptance";

/// Step ids for the built-in definitions
pub mod steps {
    pub const PHONE_VERIFICATION: &str = "phone_verification";
    pub const PROFILE_COMPLETION: &str = "profile_completion";
    pub const DOCUMENT_UPLOAD: &str = "document_upload";
    pub const KYC_VERIFICATION: &str = "kyc_verification";
    pub const ACCOUNT_ACTIVATION: &str = "account_activation";

    pub const OWNER_DECISION: &str = "owner_decision";
    pub const BOOKING_CONFIRMATION: &str = "booking_confirmation";
}

/// Driver onboarding: phone → profile → documents → vendor KYC → activation
///
/// The KYC step suspends on a callback token redeemed by the verification
/// vendor's webhook; everything before it waits on direct API submissions
/// from the driver.
pub fn driver_onboarding() -> WorkflowDefinition {
    WorkflowDefinition::new(
        DRIVER_ONBOARDING,
        vec![
            StepDescriptor::new(steps::PHONE_VERIFICATION, StepGate::Submission)
                .with_input(InputKind::PhoneCode)
                .with_timeout(Duration::from_secs(24 * 3600))
                .with_on_enter(StepEffect::SendVerificationCode),
            StepDescriptor::new(steps::PROFILE_COMPLETION, StepGate::Submission)
                .with_input(InputKind::Profile),
            StepDescriptor::new(steps::DOCUMENT_UPLOAD, StepGate::Submission)
                .with_input(InputKind::Documents),
            StepDescriptor::new(steps::KYC_VERIFICATION, StepGate::Callback)
                .with_input(InputKind::VerificationReport)
                .with_timeout(Duration::from_secs(72 * 3600))
                .with_on_enter(StepEffect::StartDocumentCheck)
                .with_on_timeout(StepEffect::Notify {
                    notice: NoticeKind::KycWindowLapsed,
                    primary: ChannelKind::Email,
                    fallback: Some(ChannelKind::Sms),
                }),
            StepDescriptor::new(steps::ACCOUNT_ACTIVATION, StepGate::Automatic).with_on_enter(
                StepEffect::Notify {
                    notice: NoticeKind::KycApproved,
                    primary: ChannelKind::Email,
                    fallback: Some(ChannelKind::Sms),
                },
            ),
        ],
    )
    .with_on_failure(StepEffect::Notify {
        notice: NoticeKind::KycRejected,
        primary: ChannelKind::Email,
        fallback: Some(ChannelKind::Sms),
    })
}

/// Booking acceptance: notify the owner, wait for their decision, confirm
///
/// The owner's accept/decline arrives as a token redemption from the
/// notification action link; the decision notice embeds the token.
pub fn booking_acceptance() -> WorkflowDefinition {
    WorkflowDefinition::new(
        BOOKING_ACCEPTANCE,
        vec![
            StepDescriptor::new(steps::OWNER_DECISION, StepGate::Callback)
                .with_input(InputKind::Decision)
                .with_timeout(Duration::from_secs(24 * 3600))
                .with_on_enter(StepEffect::Notify {
                    notice: NoticeKind::OwnerDecisionRequested,
                    primary: ChannelKind::Push,
                    fallback: Some(ChannelKind::Sms),
                })
                .with_on_timeout(StepEffect::Notify {
                    notice: NoticeKind::BookingRequestExpired,
                    primary: ChannelKind::Push,
                    fallback: Some(ChannelKind::Email),
                }),
            StepDescriptor::new(steps::BOOKING_CONFIRMATION, StepGate::Automatic).with_on_enter(
                StepEffect::Notify {
                    notice: NoticeKind::BookingConfirmed,
                    primary: ChannelKind::Push,
                    fallback: Some(ChannelKind::Email),
                },
            ),
        ],
    )
}

/// The registry the worker ships with
pub fn standard_registry() -> super::DefinitionRegistry {
    super::DefinitionRegistry::new()
        .register(driver_onboarding())
        .register(booking_acceptance())
}
