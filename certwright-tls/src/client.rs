//! ACME client
//!
//! 🌐 Drives the RFC 8555 exchange through `acme2` with RSA account keys.
//! Directories and account handles are cached per client: an account
//! registered through this client is reused for issuance, and only keys it
//! has never seen are looked up with `onlyReturnExisting`.

use crate::acme::{
    AccountRegistration, AccountRequest, AcmeAuthority, AcmeEndpoints, AcmeError, ChallengeHooks,
    IssuanceRequest,
};
use crate::keys::KeyPair;
use acme2::{
    Account, AccountBuilder, Authorization, AuthorizationStatus, Challenge, ChallengeStatus, Csr,
    Directory, DirectoryBuilder, OrderBuilder, OrderStatus,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const HTTP_01: &str = "http-01";

/// ⏳ How often and how long to poll challenges, authorizations and orders
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub attempts: usize,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(2),
        }
    }
}

/// Directory URL and account key PEM
type AccountKey = (String, String);

/// 🌐 ACME client over HTTPS
#[derive(Default)]
pub struct HttpAcmeClient {
    directories: Mutex<HashMap<String, Arc<Directory>>>,
    accounts: Mutex<HashMap<AccountKey, Arc<Account>>>,
    poll: PollPolicy,
}

impl HttpAcmeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// ⏳ Set the polling policy
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    async fn directory(&self, url: &str) -> Result<Arc<Directory>, AcmeError> {
        let cached = self.directories.lock().get(url).cloned();
        if let Some(directory) = cached {
            return Ok(directory);
        }

        let directory = DirectoryBuilder::new(url.to_string()).build().await?;
        self.directories
            .lock()
            .insert(url.to_string(), directory.clone());
        Ok(directory)
    }

    /// Account handle for a key registered earlier, through this client or
    /// another one
    async fn account(
        &self,
        endpoints: &AcmeEndpoints,
        account_key_pem: &str,
    ) -> Result<Arc<Account>, AcmeError> {
        let cache_key = (endpoints.directory.clone(), account_key_pem.to_string());
        let cached = self.accounts.lock().get(&cache_key).cloned();
        if let Some(account) = cached {
            tracing::debug!("👤 Reusing account handle for {}", endpoints.directory);
            return Ok(account);
        }

        tracing::info!("🔍 Looking up existing account at {}", endpoints.directory);
        let key = parse_key(account_key_pem)?;
        let directory = self.directory(&endpoints.directory).await?;

        let mut builder = AccountBuilder::new(directory);
        builder.private_key(key.private_key().clone());
        builder.only_return_existing(true);
        let account = builder.build().await?;

        self.accounts.lock().insert(cache_key, account.clone());
        Ok(account)
    }

    /// Publish the proof for one authorization, wait for the authority to
    /// check it and withdraw it again
    async fn authorize(
        &self,
        authorization: Authorization,
        hooks: &dyn ChallengeHooks,
    ) -> Result<(), AcmeError> {
        let hostname = authorization.identifier.value.clone();

        match authorization.status {
            AuthorizationStatus::Valid => {
                tracing::info!("✅ Authorization for {} already valid", hostname);
                return Ok(());
            }
            AuthorizationStatus::Pending => {}
            status => {
                return Err(AcmeError::ChallengeFailed {
                    identifier: hostname,
                    detail: format!("authorization is {:?}", status),
                });
            }
        }

        let challenge =
            authorization
                .get_challenge(HTTP_01)
                .ok_or_else(|| AcmeError::ChallengeFailed {
                    identifier: hostname.clone(),
                    detail: "no http-01 challenge offered".to_string(),
                })?;
        let (Some(token), Some(key_authorization)) =
            (challenge.token.clone(), challenge.key_authorization()?)
        else {
            return Err(AcmeError::Protocol(format!(
                "http-01 challenge for {} carries no token",
                hostname
            )));
        };

        hooks.setup(&hostname, &token, &key_authorization).await?;
        tracing::info!("🚀 Challenge deployed for {}", hostname);

        let outcome = self.validate(challenge, authorization, &hostname).await;
        let cleanup = hooks.teardown(&hostname, &token).await;

        outcome?;
        cleanup
    }

    async fn validate(
        &self,
        challenge: Challenge,
        authorization: Authorization,
        hostname: &str,
    ) -> Result<(), AcmeError> {
        let challenge = challenge.validate().await?;
        let challenge = challenge
            .wait_done(self.poll.interval, self.poll.attempts)
            .await?;

        if challenge.status != ChallengeStatus::Valid {
            let detail = challenge
                .error
                .as_ref()
                .and_then(|e| e.detail.clone())
                .unwrap_or_else(|| format!("challenge is {:?}", challenge.status));
            return Err(AcmeError::ChallengeFailed {
                identifier: hostname.to_string(),
                detail,
            });
        }

        let authorization = authorization
            .wait_done(self.poll.interval, self.poll.attempts)
            .await?;
        if authorization.status != AuthorizationStatus::Valid {
            return Err(AcmeError::ChallengeFailed {
                identifier: hostname.to_string(),
                detail: format!("authorization is {:?}", authorization.status),
            });
        }

        tracing::info!("✅ Challenge validated for {}", hostname);
        Ok(())
    }
}

#[async_trait]
impl AcmeAuthority for HttpAcmeClient {
    async fn discover(&self, directory_url: &str) -> Result<AcmeEndpoints, AcmeError> {
        tracing::info!("🧭 Discovering ACME endpoints at {}", directory_url);

        let directory = self.directory(directory_url).await?;
        let meta = directory.meta.clone();

        Ok(AcmeEndpoints {
            directory: directory_url.to_string(),
            terms_of_service: meta.as_ref().and_then(|m| m.terms_of_service.clone()),
            website: meta.as_ref().and_then(|m| m.website.clone()),
            caa_identities: meta.and_then(|m| m.caa_identities).unwrap_or_default(),
        })
    }

    async fn register_account(
        &self,
        endpoints: &AcmeEndpoints,
        request: &AccountRequest,
    ) -> Result<AccountRegistration, AcmeError> {
        let key = parse_key(&request.account_key_pem)?;
        let directory = self.directory(&endpoints.directory).await?;
        let contact = vec![format!("mailto:{}", request.email)];

        let mut builder = AccountBuilder::new(directory);
        builder.private_key(key.private_key().clone());
        builder.contact(contact.clone());
        builder.terms_of_service_agreed(request.terms_of_service_agreed);
        let account = builder.build().await?;

        let status = format!("{:?}", account.status).to_lowercase();
        self.accounts.lock().insert(
            (endpoints.directory.clone(), request.account_key_pem.clone()),
            account,
        );

        Ok(AccountRegistration { status, contact })
    }

    async fn issue_certificate(
        &self,
        endpoints: &AcmeEndpoints,
        request: &IssuanceRequest,
        hooks: &dyn ChallengeHooks,
    ) -> Result<String, AcmeError> {
        let https_key = parse_key(&request.https_key_pem)?;
        let account = self.account(endpoints, &request.account_key_pem).await?;

        tracing::info!("📝 Creating order for {}", request.hostname);
        let mut builder = OrderBuilder::new(account);
        builder.add_dns_identifier(request.hostname.clone());
        let order = builder.build().await?;

        for authorization in order.authorizations().await? {
            self.authorize(authorization, hooks).await?;
        }

        let mut order = order
            .wait_ready(self.poll.interval, self.poll.attempts)
            .await?;

        if order.status == OrderStatus::Ready {
            tracing::info!("🔧 Finalizing order for {}", request.hostname);
            order = order
                .finalize(Csr::Automatic(https_key.private_key().clone()))
                .await?;
            order = order
                .wait_done(self.poll.interval, self.poll.attempts)
                .await?;
        }

        if order.status != OrderStatus::Valid {
            return Err(AcmeError::OrderFailed(format!(
                "order for {} is {:?}",
                request.hostname, order.status
            )));
        }

        tracing::info!("⏳ Downloading certificate for {}", request.hostname);
        let chain = order.certificate().await?.ok_or_else(|| {
            AcmeError::Protocol("valid order carries no certificate".to_string())
        })?;

        let mut pem = String::new();
        for certificate in chain {
            pem.push_str(&String::from_utf8_lossy(&certificate.to_pem()?));
        }
        Ok(pem)
    }
}

fn parse_key(pem: &str) -> Result<KeyPair, AcmeError> {
    KeyPair::from_pem(pem).map_err(|e| AcmeError::Key(e.to_string()))
}
