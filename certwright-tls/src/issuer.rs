//! Certificate request executor
//!
//! 📜 Drives authorization and issuance for a single hostname, publishing
//! HTTP-01 proofs through the shared [`ChallengeTokenStore`].

use crate::acme::{AcmeAuthority, AcmeEndpoints, AcmeError, ChallengeHooks, IssuanceRequest};
use crate::challenge::ChallengeTokenStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Renew when fewer than this many seconds of validity remain
const RENEWAL_WINDOW_SECS: i64 = 30 * 24 * 60 * 60;

/// 📜 An issued certificate chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub hostname: String,
    /// Leaf first, then intermediates (PEM)
    pub chain_pem: String,
    /// Leaf `notAfter` (Unix seconds)
    pub not_after: i64,
}

impl IssuedCertificate {
    /// ⏰ Check if certificate is about to expire (within 30 days)
    pub fn needs_renewal(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        self.not_after - now < RENEWAL_WINDOW_SECS
    }
}

/// 📜 Requests certificates and wires challenges into the token store
pub struct CertificateRequestExecutor {
    authority: Arc<dyn AcmeAuthority>,
    store: Arc<ChallengeTokenStore>,
}

impl CertificateRequestExecutor {
    pub fn new(authority: Arc<dyn AcmeAuthority>, store: Arc<ChallengeTokenStore>) -> Self {
        Self { authority, store }
    }

    /// Authorize `hostname` and obtain its certificate. No retry.
    pub async fn request(
        &self,
        hostname: &str,
        endpoints: &AcmeEndpoints,
        account_key_pem: &str,
        https_key_pem: &str,
    ) -> Result<IssuedCertificate, AcmeError> {
        tracing::info!("🔐 Requesting certificate for {}", hostname);

        let hooks = StoreHooks::new(self.store.clone());
        let request = IssuanceRequest {
            hostname: hostname.to_string(),
            account_key_pem: account_key_pem.to_string(),
            https_key_pem: https_key_pem.to_string(),
        };

        let result = self
            .authority
            .issue_certificate(endpoints, &request, &hooks)
            .await;
        hooks.sweep();

        let chain_pem = result.inspect_err(|e| {
            tracing::error!("❌ Issuance failed for {}: {}", hostname, e);
        })?;
        let not_after = leaf_expiry(&chain_pem)?;

        tracing::info!("🎉 Certificate obtained for {}", hostname);
        Ok(IssuedCertificate {
            hostname: hostname.to_string(),
            chain_pem,
            not_after,
        })
    }
}

/// Hooks that publish proofs into the store and remember what they published
struct StoreHooks {
    store: Arc<ChallengeTokenStore>,
    outstanding: Mutex<HashSet<String>>,
}

impl StoreHooks {
    fn new(store: Arc<ChallengeTokenStore>) -> Self {
        Self {
            store,
            outstanding: Mutex::new(HashSet::new()),
        }
    }

    /// Withdraw anything the exchange set up but never tore down
    fn sweep(&self) {
        for identifier in self.outstanding.lock().drain() {
            tracing::warn!("🧹 Removing leftover challenge token {}", identifier);
            self.store.remove(&identifier);
        }
    }
}

#[async_trait]
impl ChallengeHooks for StoreHooks {
    async fn setup(&self, hostname: &str, identifier: &str, token: &str) -> Result<(), AcmeError> {
        tracing::debug!("🚀 Publishing challenge {} for {}", identifier, hostname);
        self.outstanding.lock().insert(identifier.to_string());
        self.store.set(identifier, token);
        Ok(())
    }

    async fn teardown(&self, hostname: &str, identifier: &str) -> Result<(), AcmeError> {
        tracing::debug!("🧹 Withdrawing challenge {} for {}", identifier, hostname);
        self.store.remove(identifier);
        self.outstanding.lock().remove(identifier);
        Ok(())
    }
}

fn leaf_expiry(chain_pem: &str) -> Result<i64, AcmeError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(chain_pem.as_bytes())
        .map_err(|e| AcmeError::Protocol(format!("issued certificate is not PEM: {}", e)))?;
    let leaf = pem
        .parse_x509()
        .map_err(|e| AcmeError::Protocol(format!("issued certificate is not X.509: {}", e)))?;

    Ok(leaf.validity().not_after.timestamp())
}
