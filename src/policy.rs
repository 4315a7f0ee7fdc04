//! The `ControlPolicy` contract, error family, and built-in policies (C5, C7).

pub mod builtins;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::streaming::{StreamChunk, StreamingError};
use crate::transaction::Transaction;

/// The error family crossing the policy/orchestrator boundary. Every
/// subkind carries the failing policy's name so logs and error
/// responses can point at the offending node in the policy tree.
#[derive(Error, Debug)]
pub enum ControlPolicyError {
    #[error("[{policy_name}] policy load error: {detail}")]
    PolicyLoad { policy_name: String, detail: String },

    #[error("[{policy_name}] policy invoked on a transaction with no request")]
    NoRequest { policy_name: String },

    #[error("[{policy_name}] required API key not found")]
    ApiKeyNotFound { policy_name: String },

    #[error("[{policy_name}] client authentication failed: {detail}")]
    ClientAuthentication {
        policy_name: String,
        detail: String,
        status_code: u16,
    },

    #[error("[{policy_name}] client API key missing: {detail}")]
    ClientAuthenticationNotFound {
        policy_name: String,
        detail: String,
        status_code: u16,
    },

    #[error("[{policy_name}] leaked API key detected: {detail}")]
    LeakedApiKey {
        policy_name: String,
        detail: String,
        status_code: u16,
    },

    #[error("[{policy_name}] upstream call failed: {detail}")]
    Upstream { policy_name: String, detail: String },

    #[error("[{policy_name}] streaming error: {source}")]
    Streaming {
        policy_name: String,
        #[source]
        source: StreamingError,
    },
}

impl ControlPolicyError {
    /// HTTP status to use when this error terminates the request instead
    /// of being recovered from by an enclosing `ConditionalPolicy`.
    pub fn status_code(&self) -> u16 {
        match self {
            ControlPolicyError::PolicyLoad { .. } => 500,
            ControlPolicyError::NoRequest { .. } => 500,
            ControlPolicyError::ApiKeyNotFound { .. } => 500,
            ControlPolicyError::ClientAuthentication { status_code, .. } => *status_code,
            ControlPolicyError::ClientAuthenticationNotFound { status_code, .. } => *status_code,
            ControlPolicyError::LeakedApiKey { status_code, .. } => *status_code,
            ControlPolicyError::Upstream { .. } => 502,
            ControlPolicyError::Streaming { .. } => 502,
        }
    }

    pub fn policy_name(&self) -> &str {
        match self {
            ControlPolicyError::PolicyLoad { policy_name, .. }
            | ControlPolicyError::NoRequest { policy_name }
            | ControlPolicyError::ApiKeyNotFound { policy_name }
            | ControlPolicyError::ClientAuthentication { policy_name, .. }
            | ControlPolicyError::ClientAuthenticationNotFound { policy_name, .. }
            | ControlPolicyError::LeakedApiKey { policy_name, .. }
            | ControlPolicyError::Upstream { policy_name, .. }
            | ControlPolicyError::Streaming { policy_name, .. } => policy_name,
        }
    }
}

/// Dependencies a policy may request by name while being constructed
/// from configuration (C6's "declared dependencies" resolution step).
#[derive(Clone)]
pub struct DependencyContainer {
    pub settings: std::sync::Arc<crate::settings::Settings>,
    pub http_client: reqwest::Client,
    pub api_key_repository: std::sync::Arc<dyn crate::repository::ApiKeyRepository>,
    pub policy_repository: std::sync::Arc<dyn crate::repository::PolicyRepository>,
}

/// A node in the policy tree. `apply` may mutate the transaction in
/// place and must return the same transaction — identity-preserving,
/// never swapped for a fresh one.
#[async_trait]
pub trait ControlPolicy: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(
        &self,
        transaction: Transaction,
        container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError>;

    /// Per-chunk transform applied while streaming a response. Nodes that
    /// wrap children (`CompoundPolicy`, `ConditionalPolicy`) must forward
    /// this to whichever child actually handled the request; leaf
    /// policies that care override it directly (or via
    /// `StreamingControlPolicy`). Default is identity.
    fn process_chunk(&self, chunk: StreamChunk) -> Result<StreamChunk, ControlPolicyError> {
        Ok(chunk)
    }

    /// `{type, name, ...}` — round-trips losslessly through `PolicyRegistry::load_policy`.
    fn serialize(&self) -> Value;
}

/// Refines `ControlPolicy` for policies that treat streaming and
/// non-streaming transactions differently. The default `apply`
/// dispatches on `transaction.is_streaming()`; `apply_streaming` wraps
/// the response iterator with `process_chunk`.
#[async_trait]
pub trait StreamingControlPolicy: Send + Sync {
    fn name(&self) -> &str;

    async fn apply_non_streaming(
        &self,
        transaction: Transaction,
        container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError>;

    async fn apply_streaming(
        &self,
        transaction: Transaction,
        container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError>;

    /// Per-chunk transform applied by the default streaming wrapper.
    /// OpenAI-content transformers only ever see `delta.content` text;
    /// the default implementation passes every chunk through unchanged.
    fn process_chunk(&self, chunk: StreamChunk) -> Result<StreamChunk, ControlPolicyError> {
        Ok(chunk)
    }

    fn serialize(&self) -> Value;
}

#[async_trait]
impl<T> ControlPolicy for T
where
    T: StreamingControlPolicy,
{
    fn name(&self) -> &str {
        StreamingControlPolicy::name(self)
    }

    async fn apply(
        &self,
        transaction: Transaction,
        container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        if transaction.is_streaming() {
            self.apply_streaming(transaction, container).await
        } else {
            self.apply_non_streaming(transaction, container).await
        }
    }

    fn process_chunk(&self, chunk: StreamChunk) -> Result<StreamChunk, ControlPolicyError> {
        StreamingControlPolicy::process_chunk(self, chunk)
    }

    fn serialize(&self) -> Value {
        StreamingControlPolicy::serialize(self)
    }
}
