//! Step payloads, validated at the engine boundary

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome reported by an external signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    /// The awaited action succeeded; the execution advances
    Success,

    /// The awaited action failed; the execution fails immediately
    Failure,
}

/// The payload shape a step descriptor declares it expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    None,
    PhoneCode,
    Profile,
    Documents,
    VerificationReport,
    Decision,
}

/// A step payload
///
/// Every variant corresponds to one [`InputKind`]; the engine rejects a
/// submission whose variant does not match the current step's declared kind,
/// so step handlers never see loosely-typed data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepInput {
    /// No payload
    None,

    /// Verification code entered by the subject
    PhoneCode { code: String },

    /// Profile fields submitted by the subject
    Profile {
        full_name: String,
        address: String,
        license_number: String,
    },

    /// Identity documents uploaded by the subject
    Documents { document_ids: Vec<Uuid> },

    /// Result reported by the document-verification vendor
    VerificationReport {
        reference_id: String,
        details: Option<serde_json::Value>,
    },

    /// A human decision (owner accepting or declining a booking)
    Decision {
        accepted: bool,
        comment: Option<String>,
    },
}

impl StepInput {
    /// The kind this payload satisfies
    pub fn kind(&self) -> InputKind {
        match self {
            Self::None => InputKind::None,
            Self::PhoneCode { .. } => InputKind::PhoneCode,
            Self::Profile { .. } => InputKind::Profile,
            Self::Documents { .. } => InputKind::Documents,
            Self::VerificationReport { .. } => InputKind::VerificationReport,
            Self::Decision { .. } => InputKind::Decision,
        }
    }
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::PhoneCode => write!(f, "phone_code"),
            Self::Profile => write!(f, "profile"),
            Self::Documents => write!(f, "documents"),
            Self::VerificationReport => write!(f, "verification_report"),
            Self::Decision => write!(f, "decision"),
        }
    }
}
