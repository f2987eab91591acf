//! Certwright TLS Module
//!
//! Automated HTTPS certificate acquisition:
//! - RSA key generation and SSH export
//! - HTTP-01 challenge token store
//! - ACME v2 client (Let's Encrypt)
//! - Acquisition orchestration and certificate storage

pub mod acme;
pub mod cert_store;
pub mod challenge;
pub mod client;
pub mod gate;
pub mod issuer;
pub mod keys;
pub mod orchestrator;
pub mod registrar;
pub mod ssh;

pub use acme::{AcmeAuthority, AcmeDirectory, AcmeEndpoints, AcmeError, ChallengeHooks};
pub use cert_store::{CertStore, CertStoreError, StoredCertificate};
pub use challenge::{ACME_CHALLENGE_PREFIX, ChallengeTokenStore};
pub use client::{HttpAcmeClient, PollPolicy};
pub use issuer::{CertificateRequestExecutor, IssuedCertificate};
pub use keys::{GenerationError, InProcess, KeyGenerator, KeyPair, OpensslCommand};
pub use orchestrator::{AcquireError, AcquisitionRequest, AcquisitionResult, Orchestrator};
pub use registrar::{AccountRegistrar, TermsOfService};
pub use ssh::{SshKeyPair, create_ssh_key_pair};
