//! Callback resumption gateway
//!
//! Thin but security-relevant: issues the durable, opaque tokens that
//! suspended executions hand to external actors, and redeems them
//! exactly once.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::persistence::{StoreError, TokenStore};

/// Bytes of entropy per token (256 bits)
const TOKEN_ENTROPY_BYTES: usize = 32;

/// A single-use credential that resumes exactly one suspended execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackToken {
    /// Unguessable wire form (URL-safe base64)
    pub token: String,

    /// The execution this token resumes
    pub execution_id: Uuid,

    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// Monotonic false → true; set by redemption or revocation
    pub redeemed: bool,
}

impl CallbackToken {
    /// Whether the token has expired at `now`
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Errors from gateway operations
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Unknown token
    #[error("invalid callback token")]
    InvalidToken,

    /// Token was already redeemed (or revoked)
    #[error("callback token already redeemed")]
    AlreadyRedeemed,

    /// Token expired before redemption
    #[error("callback token expired at {expired_at}")]
    Expired {
        /// The owning execution, so the caller can apply the out-of-band
        /// timeout transition
        execution_id: Uuid,
        expired_at: DateTime<Utc>,
    },

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Issues and redeems callback tokens
///
/// Redemption is linearized by the store's `mark_redeemed`: under N
/// concurrent redemptions of one token, exactly one wins and the other
/// N−1 observe [`GatewayError::AlreadyRedeemed`].
pub struct CallbackGateway<T: TokenStore> {
    tokens: Arc<T>,
}

impl<T: TokenStore> CallbackGateway<T> {
    /// Create a gateway over a token store
    pub fn new(tokens: Arc<T>) -> Self {
        Self { tokens }
    }

    /// Issue a fresh token for an execution
    ///
    /// Any prior live token for the execution is revoked first, preserving
    /// the one-live-token invariant even when a crash interrupted a
    /// previous suspension attempt.
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        execution_id: Uuid,
        ttl: Duration,
    ) -> Result<CallbackToken, GatewayError> {
        self.tokens.revoke_for_execution(execution_id).await?;

        let now = Utc::now();
        let token = CallbackToken {
            token: generate_token(),
            execution_id,
            issued_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(72)),
            redeemed: false,
        };

        self.tokens.put(&token).await?;
        debug!(%execution_id, expires_at = %token.expires_at, "issued callback token");

        Ok(token)
    }

    /// Inspect a token without consuming it
    ///
    /// Lets callers validate everything else about a redemption attempt
    /// before spending the token's single use.
    pub async fn peek(&self, token: &str) -> Result<CallbackToken, GatewayError> {
        let record = self
            .tokens
            .get(token)
            .await?
            .ok_or(GatewayError::InvalidToken)?;

        if record.redeemed {
            return Err(GatewayError::AlreadyRedeemed);
        }

        if record.expired(Utc::now()) {
            warn!(execution_id = %record.execution_id, "attempt to use expired token");
            return Err(GatewayError::Expired {
                execution_id: record.execution_id,
                expired_at: record.expires_at,
            });
        }

        Ok(record)
    }

    /// Redeem a token, returning the owning execution's id
    #[instrument(skip(self, token))]
    pub async fn redeem(&self, token: &str) -> Result<Uuid, GatewayError> {
        let record = self.peek(token).await?;

        // The store call is the linearization point for exactly-once.
        match self.tokens.mark_redeemed(token).await {
            Ok(()) => {
                debug!(execution_id = %record.execution_id, "redeemed callback token");
                Ok(record.execution_id)
            }
            Err(StoreError::AlreadyRedeemed) => Err(GatewayError::AlreadyRedeemed),
            Err(StoreError::TokenNotFound) => Err(GatewayError::InvalidToken),
            Err(e) => Err(e.into()),
        }
    }

    /// Permanently invalidate any live token for an execution
    pub async fn revoke(&self, execution_id: Uuid) -> Result<(), GatewayError> {
        self.tokens.revoke_for_execution(execution_id).await?;
        Ok(())
    }
}

/// Generate an unguessable, URL-safe token string
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
