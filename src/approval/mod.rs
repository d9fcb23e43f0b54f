//! Approval token service
//!
//! HMAC-signed, TTL'd, single-reservation tickets authorizing a
//! previewed order. The wire token is `"<32-hex-id>.<hex-signature>"`;
//! storage keeps only its SHA-256. Reservation, consumption and release
//! are each one conditional UPDATE on the approval row.

use crate::error::{Result, SwarmError};
use crate::persistence::{ApprovalRow, ApprovalState, ApprovalStore};
use crate::policy::PolicyResult;
use crate::util::{
    constant_time_eq, hmac_sha256_hex, random_hex_id, sha256_hex, stable_hash, Clock,
};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct IssuedApproval {
    pub approval_id: String,
    pub token: String,
    pub expires_at: i64,
}

pub struct ApprovalService {
    store: ApprovalStore,
    clock: Arc<dyn Clock>,
    secret: String,
}

impl ApprovalService {
    pub fn new(store: ApprovalStore, clock: Arc<dyn Clock>, secret: &str) -> Self {
        Self {
            store,
            clock,
            secret: secret.to_string(),
        }
    }

    fn token_body(approval_id: &str, preview_hash: &str, expires_at: i64) -> String {
        format!("{approval_id}:{preview_hash}:{expires_at}")
    }

    /// Issue a token for a previewed order and its policy verdict.
    pub async fn generate(
        &self,
        preview: &serde_json::Value,
        policy_result: &PolicyResult,
        ttl_s: u64,
    ) -> Result<IssuedApproval> {
        let now_ms = self.clock.now_ms();
        let approval_id = random_hex_id();
        let preview_hash = stable_hash(&json!({
            "preview": preview,
            "policy_result": policy_result,
        }));
        let expires_at = now_ms + (ttl_s as i64) * 1000;

        let body = Self::token_body(&approval_id, &preview_hash, expires_at);
        let signature = hmac_sha256_hex(&self.secret, &body);
        let token = format!("{approval_id}.{signature}");
        let token_hash = sha256_hex(&token);

        self.store
            .insert(
                &approval_id,
                &preview_hash,
                &preview.to_string(),
                &serde_json::to_string(policy_result)?,
                &token_hash,
                expires_at,
                now_ms,
            )
            .await?;

        debug!("issued approval {approval_id}, expires {expires_at}");
        Ok(IssuedApproval {
            approval_id,
            token,
            expires_at,
        })
    }

    /// Validate a wire token: lookup, liveness, then signature, with a
    /// constant-time compare.
    pub async fn validate(&self, token: &str) -> Result<ApprovalRow> {
        let (token_id, signature) = token
            .split_once('.')
            .filter(|(id, sig)| !id.is_empty() && !sig.is_empty())
            .ok_or_else(|| SwarmError::InvalidInput("malformed approval token".into()))?;

        let row = match self.store.get_by_token_hash(&sha256_hex(token)).await? {
            Some(row) => row,
            // Legacy rows stored the raw token in the hash column.
            None => self
                .store
                .get_by_token_hash(token)
                .await?
                .ok_or_else(|| SwarmError::NotFound("approval not found".into()))?,
        };

        if row.state()? == ApprovalState::Used {
            return Err(SwarmError::Conflict("approval already used".into()));
        }
        if row.is_expired(self.clock.now_ms()) {
            return Err(SwarmError::Unauthorized("approval expired".into()));
        }

        let expected = hmac_sha256_hex(
            &self.secret,
            &Self::token_body(&row.id, &row.preview_hash, row.expires_at),
        );
        if token_id != row.id || !constant_time_eq(signature, &expected) {
            return Err(SwarmError::Unauthorized("approval signature mismatch".into()));
        }

        Ok(row)
    }

    /// Take the single reservation slot. Fails with CONFLICT when another
    /// holder has a live reservation.
    pub async fn reserve(
        &self,
        approval_id: &str,
        reservation_id: &str,
        ttl_s: u64,
    ) -> Result<()> {
        let changed = self
            .store
            .reserve(approval_id, reservation_id, self.clock.now_ms(), ttl_s)
            .await?;
        if changed {
            Ok(())
        } else {
            Err(SwarmError::Conflict(format!(
                "approval {approval_id} is not reservable"
            )))
        }
    }

    /// `RESERVED -> USED` for the holding reservation.
    pub async fn consume(&self, approval_id: &str, reservation_id: &str) -> Result<()> {
        let changed = self
            .store
            .consume(approval_id, reservation_id, self.clock.now_ms())
            .await?;
        if changed {
            Ok(())
        } else {
            Err(SwarmError::Conflict(format!(
                "approval {approval_id} is not held by this reservation"
            )))
        }
    }

    /// Stamp the submission instant after the gated order went out.
    pub async fn mark_submitted(&self, approval_id: &str) -> Result<()> {
        self.store
            .mark_submitted(approval_id, self.clock.now_ms())
            .await
    }

    /// Stamp a failed gated submission with its sanitized error.
    pub async fn mark_failed(&self, approval_id: &str, error: &str) -> Result<()> {
        self.store
            .mark_failed(approval_id, &serde_json::to_string(error)?, self.clock.now_ms())
            .await
    }

    /// Revert to ACTIVE, recording the triggering error if any.
    pub async fn release(
        &self,
        approval_id: &str,
        reservation_id: &str,
        error: Option<&str>,
    ) -> Result<()> {
        let error_json = match error {
            Some(e) => Some(serde_json::to_string(e)?),
            None => None,
        };
        let changed = self
            .store
            .release(approval_id, reservation_id, error_json.as_deref())
            .await?;
        if changed {
            Ok(())
        } else {
            Err(SwarmError::Conflict(format!(
                "approval {approval_id} is not held by this reservation"
            )))
        }
    }
}
