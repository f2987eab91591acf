//! Certificate acquisition orchestrator
//!
//! 🎯 Runs the three independent preparation tasks of an acquisition
//! (endpoint discovery, account key, HTTPS key) concurrently, joins them on
//! a [`JoinGate`], registers the account when no key was supplied, and only
//! then hands over to the [`CertificateRequestExecutor`].
//!
//! The first task to fail settles the acquisition with its error. Sibling
//! tasks run to completion but their results are dropped, and the gate can
//! no longer open, so no later stage starts.

use crate::acme::{AcmeAuthority, AcmeDirectory, AcmeEndpoints, AcmeError};
use crate::cert_store::CertStore;
use crate::challenge::ChallengeTokenStore;
use crate::gate::{JoinGate, OnceFlag};
use crate::issuer::{CertificateRequestExecutor, IssuedCertificate};
use crate::keys::{GenerationError, KeyGenerator, KeyPair};
use crate::registrar::{AccountRegistrar, TermsOfService};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::oneshot;

/// Preparation tasks the gate waits for: endpoints, account key, HTTPS key
const PREPARATION_TASKS: usize = 3;

/// Acquisition errors
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("🔑 Key generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("🧭 Endpoint discovery failed: {0}")]
    Discovery(#[source] AcmeError),

    #[error("👤 Account registration failed: {0}")]
    Registration(#[source] AcmeError),

    #[error("📜 Certificate issuance failed: {0}")]
    Issuance(#[source] AcmeError),

    #[error("⚙️ Invalid acquisition request: {0}")]
    InvalidRequest(String),

    #[error("💥 Acquisition ended without a result")]
    Aborted,
}

/// Parameters of one certificate acquisition
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub hostname: String,
    pub email: String,
    /// PEM of an account key that is already registered with the authority
    pub account_key: Option<String>,
    /// PEM of the key the certificate should be bound to
    pub https_key: Option<String>,
    pub directory: AcmeDirectory,
}

impl AcquisitionRequest {
    pub fn new(hostname: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            email: email.into(),
            account_key: None,
            https_key: None,
            directory: AcmeDirectory::default(),
        }
    }

    /// 👤 Reuse a registered account key; registration is skipped
    pub fn with_account_key(mut self, pem: impl Into<String>) -> Self {
        self.account_key = Some(pem.into());
        self
    }

    /// 🔑 Reuse an existing HTTPS key
    pub fn with_https_key(mut self, pem: impl Into<String>) -> Self {
        self.https_key = Some(pem.into());
        self
    }

    pub fn with_directory(mut self, directory: AcmeDirectory) -> Self {
        self.directory = directory;
        self
    }

    fn validate(&self) -> Result<(), AcquireError> {
        let hostname = self.hostname.as_str();
        if hostname.is_empty()
            || hostname
                .chars()
                .any(|c| c.is_whitespace() || c == '/' || c == ':')
        {
            return Err(AcquireError::InvalidRequest(format!(
                "invalid hostname {:?}",
                hostname
            )));
        }

        match self.email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => {
                return Err(AcquireError::InvalidRequest(format!(
                    "invalid operator email {:?}",
                    self.email
                )));
            }
        }

        for (name, pem) in [("account", &self.account_key), ("https", &self.https_key)] {
            if let Some(pem) = pem {
                KeyPair::from_pem(pem).map_err(|e| {
                    AcquireError::InvalidRequest(format!("supplied {} key: {}", name, e))
                })?;
            }
        }

        Ok(())
    }
}

/// 🎉 Outcome of a successful acquisition
#[derive(Clone)]
pub struct AcquisitionResult {
    pub certificate: IssuedCertificate,
    /// Account key used, freshly generated or supplied; persist it to avoid
    /// registering again next time
    pub account_key: String,
    /// Key the certificate is bound to
    pub https_key: String,
}

impl fmt::Debug for AcquisitionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionResult")
            .field("certificate", &self.certificate)
            .field("account_key", &"<redacted>")
            .field("https_key", &"<redacted>")
            .finish()
    }
}

/// 🎯 Acquires certificates
pub struct Orchestrator {
    authority: Arc<dyn AcmeAuthority>,
    keys: Arc<dyn KeyGenerator>,
    store: Arc<ChallengeTokenStore>,
    terms: TermsOfService,
    accounts: Option<Arc<CertStore>>,
}

impl Orchestrator {
    pub fn new(
        authority: Arc<dyn AcmeAuthority>,
        keys: Arc<dyn KeyGenerator>,
        store: Arc<ChallengeTokenStore>,
    ) -> Self {
        Self {
            authority,
            keys,
            store,
            terms: TermsOfService::default(),
            accounts: None,
        }
    }

    /// 💾 Persist freshly registered account keys here as soon as the
    /// authority accepts them, even if issuance later fails
    pub fn with_cert_store(mut self, store: Arc<CertStore>) -> Self {
        self.accounts = Some(store);
        self
    }

    /// 📜 Set the terms-of-service policy used when registering
    pub fn with_terms_of_service(mut self, terms: TermsOfService) -> Self {
        self.terms = terms;
        self
    }

    /// Store the HTTP responder must consult
    pub fn challenge_store(&self) -> Arc<ChallengeTokenStore> {
        self.store.clone()
    }

    /// 🔐 Acquire a certificate for `request.hostname`
    pub async fn acquire(
        &self,
        request: AcquisitionRequest,
    ) -> Result<AcquisitionResult, AcquireError> {
        request.validate()?;
        tracing::info!(
            "🔐 Acquiring certificate for {} from {}",
            request.hostname,
            request.directory.url()
        );

        let (tx, rx) = oneshot::channel();
        let acquisition = Arc::new(Acquisition {
            hostname: request.hostname.clone(),
            email: request.email.clone(),
            directory: request.directory.url().to_string(),
            endpoints: OnceLock::new(),
            account_key: OnceLock::new(),
            https_key: OnceLock::new(),
            gate: JoinGate::new(PREPARATION_TASKS),
            registered: if request.account_key.is_some() {
                OnceFlag::raised()
            } else {
                OnceFlag::new()
            },
            issuing: OnceFlag::new(),
            outcome: Mutex::new(Some(tx)),
            registrar: AccountRegistrar::new(self.authority.clone(), self.terms),
            accounts: self.accounts.clone(),
            executor: CertificateRequestExecutor::new(self.authority.clone(), self.store.clone()),
        });

        // Task: discover the authority's endpoints
        {
            let acquisition = acquisition.clone();
            let authority = self.authority.clone();
            let directory_url = request.directory.url().to_string();
            tokio::spawn(async move {
                match authority.discover(&directory_url).await {
                    Ok(endpoints) => {
                        let _ = acquisition.endpoints.set(endpoints);
                        acquisition.arrive().await;
                    }
                    Err(e) => acquisition.settle(Err(AcquireError::Discovery(e))),
                }
            });
        }

        // Tasks: account key and HTTPS key, supplied or generated
        for (slot, supplied) in [
            (KeySlot::Account, request.account_key),
            (KeySlot::Https, request.https_key),
        ] {
            let acquisition = acquisition.clone();
            match supplied {
                Some(pem) => {
                    let _ = acquisition.key_slot(slot).set(pem);
                    acquisition.arrive().await;
                }
                None => {
                    let keys = self.keys.clone();
                    tokio::spawn(async move {
                        match keys.generate().await {
                            Ok(pair) => {
                                tracing::debug!("🔑 Generated {} key", slot.name());
                                let _ = acquisition
                                    .key_slot(slot)
                                    .set(pair.private_key_pem().to_string());
                                acquisition.arrive().await;
                            }
                            Err(e) => acquisition.settle(Err(AcquireError::Generation(e))),
                        }
                    });
                }
            }
        }

        let outcome = rx.await.unwrap_or(Err(AcquireError::Aborted));
        match &outcome {
            Ok(_) => tracing::info!("🎉 Certificate ready for {}", request.hostname),
            Err(e) => tracing::error!("❌ Acquisition failed for {}: {}", request.hostname, e),
        }
        outcome
    }
}

#[derive(Debug, Clone, Copy)]
enum KeySlot {
    Account,
    Https,
}

impl KeySlot {
    fn name(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Https => "https",
        }
    }
}

/// In-flight state of one acquisition
struct Acquisition {
    hostname: String,
    email: String,
    directory: String,
    endpoints: OnceLock<AcmeEndpoints>,
    account_key: OnceLock<String>,
    https_key: OnceLock<String>,
    /// Phase 1: endpoints, account key, HTTPS key
    gate: JoinGate,
    /// Phase 2: raised once the account is known to be registered
    registered: OnceFlag,
    /// Claimed by the single executor invocation
    issuing: OnceFlag,
    outcome: Mutex<Option<oneshot::Sender<Result<AcquisitionResult, AcquireError>>>>,
    registrar: AccountRegistrar,
    accounts: Option<Arc<CertStore>>,
    executor: CertificateRequestExecutor,
}

impl Acquisition {
    fn key_slot(&self, slot: KeySlot) -> &OnceLock<String> {
        match slot {
            KeySlot::Account => &self.account_key,
            KeySlot::Https => &self.https_key,
        }
    }

    /// Signal one readiness transition; the arrival that opens the gate
    /// carries on with registration and issuance.
    async fn arrive(&self) {
        if self.gate.arrive() {
            self.proceed().await;
        }
    }

    async fn proceed(&self) {
        let (Some(endpoints), Some(account_key), Some(https_key)) = (
            self.endpoints.get(),
            self.account_key.get(),
            self.https_key.get(),
        ) else {
            self.settle(Err(AcquireError::Aborted));
            return;
        };

        if !self.registered.is_set() {
            if let Err(e) = self
                .registrar
                .register(&self.email, account_key, endpoints)
                .await
            {
                self.settle(Err(AcquireError::Registration(e)));
                return;
            }
            self.registered.set();
            self.remember_account(account_key).await;
        }

        if !self.issuing.claim() {
            return;
        }

        let outcome = self
            .executor
            .request(&self.hostname, endpoints, account_key, https_key)
            .await
            .map(|certificate| AcquisitionResult {
                certificate,
                account_key: account_key.clone(),
                https_key: https_key.clone(),
            })
            .map_err(AcquireError::Issuance);

        self.settle(outcome);
    }

    async fn remember_account(&self, account_key: &str) {
        let Some(store) = &self.accounts else {
            return;
        };
        if let Err(e) = store
            .store_account_key(&self.directory, &self.email, account_key)
            .await
        {
            tracing::warn!("⚠️ Could not persist account key for {}: {}", self.email, e);
        }
    }

    /// Deliver the outcome; only the first call has an effect
    fn settle(&self, outcome: Result<AcquisitionResult, AcquireError>) {
        match self.outcome.lock().take() {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => {
                if let Err(e) = outcome {
                    tracing::debug!("Discarding late failure for {}: {}", self.hostname, e);
                }
            }
        }
    }
}
