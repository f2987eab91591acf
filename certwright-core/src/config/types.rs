//! Configuration type definitions
//!
//! These types represent the runtime configuration for Certwright. Every
//! field has a default so an empty file is a valid configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Environment variable overriding the storage directory
pub const STORE_ENV: &str = "CERTWRIGHT_STORE";

/// Smallest RSA modulus accepted for generated keys
pub const MIN_KEY_BITS: u32 = 2048;

/// Root configuration for Certwright
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CertwrightConfig {
    /// Certificate authority settings
    #[serde(default)]
    pub acme: AcmeConfig,

    /// HTTP-01 responder
    #[serde(default)]
    pub challenge: ChallengeConfig,

    /// Key generation
    #[serde(default)]
    pub keys: KeysConfig,

    /// Certificate and account key storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CertwrightConfig {
    /// ✅ Reject configurations that parse but cannot work
    pub fn validate(&self) -> Result<()> {
        if let Some(email) = &self.acme.email {
            match email.split_once('@') {
                Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
                _ => {
                    return Err(Error::Validation(format!(
                        "acme.email {:?} is not an email address",
                        email
                    )));
                }
            }
        }

        if let Some(url) = &self.acme.directory_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(Error::Validation(format!(
                    "acme.directory_url {:?} is not an HTTP(S) URL",
                    url
                )));
            }
        }

        if self.acme.poll_attempts == Some(0) {
            return Err(Error::Validation(
                "acme.poll_attempts must be at least 1".to_string(),
            ));
        }

        if self.keys.bits < MIN_KEY_BITS {
            return Err(Error::Validation(format!(
                "keys.bits {} is below the minimum of {}",
                self.keys.bits, MIN_KEY_BITS
            )));
        }

        self.challenge.listen_addr()?;
        Ok(())
    }
}

/// Which Let's Encrypt environment to use
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AcmeEnvironment {
    /// Untrusted certificates, generous rate limits
    #[default]
    Staging,
    Production,
}

/// Certificate authority configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcmeConfig {
    #[serde(default)]
    pub environment: AcmeEnvironment,

    /// Directory of a non-Let's Encrypt authority; overrides `environment`
    #[serde(default)]
    pub directory_url: Option<String>,

    /// Operator contact for account registration
    #[serde(default)]
    pub email: Option<String>,

    /// Agree to the authority's terms of service without prompting
    #[serde(default = "default_bool_true")]
    pub accept_terms_of_service: bool,

    /// Authorization/order polls before giving up
    #[serde(default)]
    pub poll_attempts: Option<usize>,

    /// Seconds between polls
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            environment: AcmeEnvironment::default(),
            directory_url: None,
            email: None,
            accept_terms_of_service: true,
            poll_attempts: None,
            poll_interval_secs: None,
        }
    }
}

/// HTTP-01 responder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChallengeConfig {
    /// Address the responder binds; the authority connects on port 80
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl ChallengeConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            Error::Validation(format!("challenge.listen {:?}: {}", self.listen, e))
        })
    }
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// How RSA keys are generated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyBackend {
    /// Run `openssl genrsa` as a child process
    #[default]
    OpensslCommand,
    /// Use the linked OpenSSL library
    InProcess,
}

/// Key generation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeysConfig {
    #[serde(default)]
    pub backend: KeyBackend,

    /// Executable used by the `openssl_command` backend
    #[serde(default = "default_openssl_path")]
    pub openssl_path: String,

    /// RSA modulus size
    #[serde(default = "default_key_bits")]
    pub bits: u32,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            backend: KeyBackend::default(),
            openssl_path: default_openssl_path(),
            bits: default_key_bits(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StorageConfig {
    /// Storage directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Storage directory: `CERTWRIGHT_STORE`, then `path`, then the user's
    /// local data directory
    pub fn resolve(&self) -> PathBuf {
        self.resolve_from(std::env::var_os(STORE_ENV))
    }

    fn resolve_from(&self, env: Option<OsString>) -> PathBuf {
        if let Some(path) = env.filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        match &self.path {
            Some(path) => path.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("certwright"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_bool_true() -> bool {
    true
}

fn default_listen() -> String {
    "0.0.0.0:80".to_string()
}

fn default_openssl_path() -> String {
    "openssl".to_string()
}

fn default_key_bits() -> u32 {
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}
