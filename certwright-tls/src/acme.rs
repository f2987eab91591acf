//! ACME protocol surface
//!
//! 🔐 Types shared by the registrar, the request executor and the
//! orchestrator, plus the [`AcmeAuthority`] seam behind which the wire
//! protocol lives. [`crate::client::HttpAcmeClient`] reaches real
//! authorities through `acme2`; tests substitute their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ACME directory URLs
pub mod directory {
    /// 🏭 Let's Encrypt Production - for real certificates
    pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
    /// 🧪 Let's Encrypt Staging - for testing (not trusted)
    pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
}

/// Certificate authority an acquisition targets
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AcmeDirectory {
    /// Let's Encrypt staging (untrusted certificates, generous rate limits)
    #[default]
    Staging,
    /// Let's Encrypt production
    Production,
    /// Any other RFC 8555 directory
    Custom(String),
}

impl AcmeDirectory {
    pub fn url(&self) -> &str {
        match self {
            Self::Staging => directory::LETS_ENCRYPT_STAGING,
            Self::Production => directory::LETS_ENCRYPT_PRODUCTION,
            Self::Custom(url) => url,
        }
    }
}

/// ACME error types
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("🔴 ACME request failed: {0}")]
    Acme(#[from] acme2::Error),

    #[error("⚠️ Challenge failed for {identifier}: {detail}")]
    ChallengeFailed { identifier: String, detail: String },

    #[error("❌ Order failed: {0}")]
    OrderFailed(String),

    #[error("📜 Terms of service at {0} were not accepted")]
    TermsDeclined(String),

    #[error("🔑 Invalid key: {0}")]
    Key(String),

    #[error("🔧 Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("📦 Malformed ACME response: {0}")]
    Protocol(String),
}

/// 🧭 What an authority's directory advertises
///
/// The endpoint URLs themselves stay with the client that fetched them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AcmeEndpoints {
    /// Directory the endpoints were discovered from
    pub directory: String,
    /// Terms of service the account must agree to, if published
    pub terms_of_service: Option<String>,
    pub website: Option<String>,
    /// CAA issuer domains the authority recognizes
    #[serde(default)]
    pub caa_identities: Vec<String>,
}

/// Parameters for creating an account
#[derive(Debug, Clone)]
pub struct AccountRequest {
    pub email: String,
    /// PEM-encoded RSA private key identifying the account
    pub account_key_pem: String,
    pub terms_of_service_agreed: bool,
}

/// 👤 Account as acknowledged by the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRegistration {
    pub status: String,
    pub contact: Vec<String>,
}

/// Parameters for one single-hostname issuance
#[derive(Debug, Clone)]
pub struct IssuanceRequest {
    pub hostname: String,
    pub account_key_pem: String,
    /// Key the certificate will be bound to
    pub https_key_pem: String,
}

/// 🪝 Callbacks that publish and withdraw HTTP-01 proofs
///
/// `identifier` is the final path segment the authority will request under
/// [`crate::challenge::ACME_CHALLENGE_PREFIX`]; `token` is the body it
/// expects back. Returning from a hook signals completion.
#[async_trait]
pub trait ChallengeHooks: Send + Sync {
    /// 🚀 Make the proof reachable
    async fn setup(&self, hostname: &str, identifier: &str, token: &str) -> Result<(), AcmeError>;

    /// 🧹 Withdraw the proof once the challenge resolved, whatever the outcome
    async fn teardown(&self, hostname: &str, identifier: &str) -> Result<(), AcmeError>;
}

/// 🔐 A certificate authority speaking ACME
#[async_trait]
pub trait AcmeAuthority: Send + Sync {
    /// 🧭 Fetch the directory and resolve its endpoints
    async fn discover(&self, directory_url: &str) -> Result<AcmeEndpoints, AcmeError>;

    /// 👤 Create a new account; no existence check is performed.
    ///
    /// Implementations may keep the resulting account handle so a following
    /// [`issue_certificate`](Self::issue_certificate) with the same key does
    /// not have to look the account up again.
    async fn register_account(
        &self,
        endpoints: &AcmeEndpoints,
        request: &AccountRequest,
    ) -> Result<AccountRegistration, AcmeError>;

    /// 📜 Authorize `request.hostname` over HTTP-01 and return the issued
    /// PEM certificate chain.
    ///
    /// Implementations must call `hooks.teardown` for every successful
    /// `hooks.setup`, on success and failure alike.
    async fn issue_certificate(
        &self,
        endpoints: &AcmeEndpoints,
        request: &IssuanceRequest,
        hooks: &dyn ChallengeHooks,
    ) -> Result<String, AcmeError>;
}
