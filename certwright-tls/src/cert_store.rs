//! Certificate and account key storage
//!
//! 💾 Persists acquired certificates and registered account keys as JSON and
//! PEM files so a later run can reuse them. Account keys are only valid at
//! the authority that registered them, so they are kept per directory.
//! Files holding private keys are created readable by the owner only.
//!
//! ```text
//! <root>/certs/<hostname>.json
//! <root>/accounts/<directory>/<email>.pem
//! ```

use crate::issuer::IssuedCertificate;
use crate::orchestrator::AcquisitionResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Certificate store errors
#[derive(Debug, Error)]
pub enum CertStoreError {
    #[error("💥 IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("🔍 Certificate not found for host: {0}")]
    NotFound(String),

    #[error("⚠️ Invalid stored data: {0}")]
    Invalid(String),
}

/// A certificate together with the key it is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCertificate {
    pub hostname: String,
    pub chain_pem: String,
    pub key_pem: String,
    pub not_after: i64,
}

impl StoredCertificate {
    /// ⏰ Whether the certificate expires within 30 days
    pub fn needs_renewal(&self) -> bool {
        self.as_issued().needs_renewal()
    }

    fn as_issued(&self) -> IssuedCertificate {
        IssuedCertificate {
            hostname: self.hostname.clone(),
            chain_pem: self.chain_pem.clone(),
            not_after: self.not_after,
        }
    }
}

/// 🗄️ File-backed store for certificates and account keys
pub struct CertStore {
    path: PathBuf,
    cache: RwLock<HashMap<String, StoredCertificate>>,
}

impl CertStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Default location under the user's local data directory
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("certwright")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 🚀 Create the directory tree and load stored certificates
    pub async fn init(&self) -> Result<(), CertStoreError> {
        tracing::info!("📁 Initializing certificate store at {:?}", self.path);
        tokio::fs::create_dir_all(self.certs_dir()).await?;
        tokio::fs::create_dir_all(self.accounts_dir()).await?;
        self.load_all().await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<(), CertStoreError> {
        let mut entries = tokio::fs::read_dir(self.certs_dir()).await?;
        let mut cache = self.cache.write().await;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }

            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<StoredCertificate>(&content) {
                Ok(cert) => {
                    cache.insert(cert.hostname.clone(), cert);
                }
                Err(e) => tracing::warn!("⚠️ Skipping unreadable certificate {:?}: {}", path, e),
            }
        }

        tracing::info!("📜 Loaded {} certificate(s) from disk", cache.len());
        Ok(())
    }

    /// 💾 Persist the certificate and HTTPS key of an acquisition
    pub async fn store_certificate(
        &self,
        result: &AcquisitionResult,
    ) -> Result<StoredCertificate, CertStoreError> {
        let hostname = &result.certificate.hostname;
        tracing::info!("💾 Storing certificate for {}", hostname);

        let stored = StoredCertificate {
            hostname: hostname.clone(),
            chain_pem: result.certificate.chain_pem.clone(),
            key_pem: result.https_key.clone(),
            not_after: result.certificate.not_after,
        };

        let json = serde_json::to_string_pretty(&stored)
            .map_err(|e| CertStoreError::Invalid(e.to_string()))?;
        let file = self.certs_dir().join(format!("{}.json", file_stem(hostname)?));
        tokio::fs::create_dir_all(self.certs_dir()).await?;
        write_private(&file, json.as_bytes()).await?;

        self.cache
            .write()
            .await
            .insert(hostname.clone(), stored.clone());
        Ok(stored)
    }

    /// 🔍 Stored certificate for `hostname`
    pub async fn certificate(&self, hostname: &str) -> Result<StoredCertificate, CertStoreError> {
        self.cache
            .read()
            .await
            .get(hostname)
            .cloned()
            .ok_or_else(|| CertStoreError::NotFound(hostname.to_string()))
    }

    /// ⏰ Whether `hostname` has no certificate or one about to expire
    pub async fn needs_renewal(&self, hostname: &str) -> bool {
        match self.cache.read().await.get(hostname) {
            Some(cert) => cert.needs_renewal(),
            None => true,
        }
    }

    /// 👤 Account key registered for `email` at `directory`, if one was
    /// stored
    pub async fn account_key(
        &self,
        directory: &str,
        email: &str,
    ) -> Result<Option<String>, CertStoreError> {
        let file = self.account_file(directory, email)?;
        match tokio::fs::read_to_string(&file).await {
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 💾 Remember the account key registered for `email` at `directory`
    pub async fn store_account_key(
        &self,
        directory: &str,
        email: &str,
        pem: &str,
    ) -> Result<(), CertStoreError> {
        tracing::info!("💾 Storing account key for {} at {}", email, directory);
        let file = self.account_file(directory, email)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_private(&file, pem.as_bytes()).await?;
        Ok(())
    }

    fn account_file(&self, directory: &str, email: &str) -> Result<PathBuf, CertStoreError> {
        Ok(self
            .accounts_dir()
            .join(directory_scope(directory)?)
            .join(format!("{}.pem", file_stem(email)?)))
    }

    fn certs_dir(&self) -> PathBuf {
        self.path.join("certs")
    }

    fn accounts_dir(&self) -> PathBuf {
        self.path.join("accounts")
    }
}

/// Hostnames and emails become file names as-is, so refuse anything that
/// could escape the store directory.
fn file_stem(name: &str) -> Result<&str, CertStoreError> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
    {
        return Err(CertStoreError::Invalid(format!("unusable name {:?}", name)));
    }
    Ok(name)
}

/// One path segment per directory URL, e.g.
/// `acme-v02.api.letsencrypt.org_directory`
fn directory_scope(directory: &str) -> Result<String, CertStoreError> {
    let location = directory
        .split_once("://")
        .map_or(directory, |(_, rest)| rest);
    let scope: String = location
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    file_stem(scope.trim_matches('_')).map(str::to_string)
}

/// Write a file holding private key material, readable only by the owner
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.flush().await?;

    // An existing file keeps its old mode on open
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE_CERT: &str = include_str!("../tests/fixtures/example.com.crt");

    fn acquisition(hostname: &str, not_after: i64) -> AcquisitionResult {
        AcquisitionResult {
            certificate: IssuedCertificate {
                hostname: hostname.to_string(),
                chain_pem: FIXTURE_CERT.to_string(),
                not_after,
            },
            account_key: "ACCOUNT".to_string(),
            https_key: "HTTPS".to_string(),
        }
    }

    #[tokio::test]
    async fn test_store_and_reload() {
        let dir = tempfile::tempdir().unwrap();

        let store = CertStore::new(dir.path());
        store.init().await.unwrap();
        store
            .store_certificate(&acquisition("example.com", 2107499991))
            .await
            .unwrap();

        assert!(dir.path().join("certs/example.com.json").exists());

        let reopened = CertStore::new(dir.path());
        reopened.init().await.unwrap();
        let cert = reopened.certificate("example.com").await.unwrap();
        assert_eq!(cert.key_pem, "HTTPS");
        assert_eq!(cert.chain_pem, FIXTURE_CERT);
        assert!(!reopened.needs_renewal("example.com").await);
    }

    #[tokio::test]
    async fn test_missing_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();

        assert!(matches!(
            store.certificate("absent.example.com").await,
            Err(CertStoreError::NotFound(_))
        ));
        assert!(store.needs_renewal("absent.example.com").await);
    }

    #[tokio::test]
    async fn test_expiring_certificate_needs_renewal() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();
        store
            .store_certificate(&acquisition("old.example.com", 0))
            .await
            .unwrap();

        assert!(store.needs_renewal("old.example.com").await);
    }

    const STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
    const PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

    #[tokio::test]
    async fn test_account_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();

        assert_eq!(store.account_key(STAGING, "ops@example.com").await.unwrap(), None);
        store
            .store_account_key(STAGING, "ops@example.com", "PEM")
            .await
            .unwrap();
        assert_eq!(
            store
                .account_key(STAGING, "ops@example.com")
                .await
                .unwrap()
                .as_deref(),
            Some("PEM")
        );
        assert!(
            dir.path()
                .join("accounts/acme-staging-v02.api.letsencrypt.org_directory/ops@example.com.pem")
                .exists()
        );
    }

    #[tokio::test]
    async fn test_account_keys_are_per_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();

        store
            .store_account_key(STAGING, "ops@example.com", "STAGING")
            .await
            .unwrap();
        assert_eq!(
            store.account_key(PRODUCTION, "ops@example.com").await.unwrap(),
            None
        );
        assert_eq!(
            store
                .account_key("http://127.0.0.1:14000/dir", "ops@example.com")
                .await
                .unwrap(),
            None
        );

        store
            .store_account_key(PRODUCTION, "ops@example.com", "PRODUCTION")
            .await
            .unwrap();
        assert_eq!(
            store
                .account_key(STAGING, "ops@example.com")
                .await
                .unwrap()
                .as_deref(),
            Some("STAGING")
        );
        assert_eq!(
            store
                .account_key(PRODUCTION, "ops@example.com")
                .await
                .unwrap()
                .as_deref(),
            Some("PRODUCTION")
        );
    }

    #[test]
    fn test_directory_scope() {
        assert_eq!(
            directory_scope(PRODUCTION).unwrap(),
            "acme-v02.api.letsencrypt.org_directory"
        );
        assert_eq!(
            directory_scope("http://127.0.0.1:14000/dir").unwrap(),
            "127.0.0.1_14000_dir"
        );
        assert!(directory_scope("https://").is_err());
        assert!(directory_scope("..").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        store.init().await.unwrap();

        // A pre-existing, world-readable file is tightened as well
        let cert_file = dir.path().join("certs/example.com.json");
        std::fs::write(&cert_file, "{}").unwrap();
        std::fs::set_permissions(&cert_file, std::fs::Permissions::from_mode(0o644)).unwrap();

        store
            .store_certificate(&acquisition("example.com", 2107499991))
            .await
            .unwrap();
        store
            .store_account_key(STAGING, "ops@example.com", "PEM")
            .await
            .unwrap();

        let account_file = dir
            .path()
            .join("accounts/acme-staging-v02.api.letsencrypt.org_directory/ops@example.com.pem");
        for file in [cert_file, account_file] {
            let mode = std::fs::metadata(&file).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{:?}", file);
        }
    }

    #[tokio::test]
    async fn test_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());

        assert!(matches!(
            store.store_account_key(STAGING, "../evil", "PEM").await,
            Err(CertStoreError::Invalid(_))
        ));
        assert!(matches!(
            store.store_certificate(&acquisition("a/b", 0)).await,
            Err(CertStoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_skips_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("certs")).unwrap();
        std::fs::write(dir.path().join("certs/broken.json"), "{").unwrap();
        std::fs::write(dir.path().join("certs/notes.txt"), "ignored").unwrap();

        let store = CertStore::new(dir.path());
        store.init().await.unwrap();
        assert!(store.needs_renewal("broken").await);
    }
}
