//! Certwright - automated HTTPS certificates from Let's Encrypt
//!
//! This is the main entry point for the Certwright CLI.

use anyhow::{Context, bail};
use certwright_api::ChallengeServer;
use certwright_core::config::{AcmeEnvironment, CertwrightConfig, ConfigLoader, KeyBackend};
use certwright_tls::{
    AcmeDirectory, AcquisitionRequest, CertStore, ChallengeTokenStore, HttpAcmeClient, InProcess,
    KeyGenerator, OpensslCommand, Orchestrator, PollPolicy, SshKeyPair, TermsOfService,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Certwright - automated HTTPS certificates from Let's Encrypt
#[derive(Parser)]
#[command(name = "certwright")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (.json or .toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Obtain a certificate for a hostname
    Issue {
        /// Hostname the certificate is for
        #[arg(long)]
        hostname: String,

        /// Operator contact email (defaults to acme.email)
        #[arg(long)]
        email: Option<String>,

        /// Use Let's Encrypt production instead of staging
        #[arg(long, conflicts_with = "directory")]
        production: bool,

        /// ACME directory URL of another authority
        #[arg(long)]
        directory: Option<String>,

        /// PEM file with an already registered account key
        #[arg(long)]
        account_key: Option<PathBuf>,

        /// PEM file with the key to certify
        #[arg(long)]
        https_key: Option<PathBuf>,

        /// Also write cert.pem, key.pem and account.pem here
        #[arg(long)]
        out: Option<PathBuf>,

        /// Challenge responder address (defaults to challenge.listen)
        #[arg(long)]
        listen: Option<String>,
    },

    /// Generate an RSA key pair in OpenSSH format
    #[command(name = "ssh-keygen")]
    SshKeygen {
        /// Write id_rsa and id_rsa.pub here
        #[arg(long)]
        out: Option<PathBuf>,

        /// Comment appended to the public key
        #[arg(long)]
        comment: Option<String>,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(value_name = "CONFIG")]
        file: PathBuf,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CertwrightConfig::default(),
    };

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Issue {
            hostname,
            email,
            production,
            directory,
            account_key,
            https_key,
            out,
            listen,
        } => {
            let directory = match (directory, production) {
                (Some(url), _) => AcmeDirectory::Custom(url),
                (None, true) => AcmeDirectory::Production,
                (None, false) => configured_directory(&config),
            };
            let Some(email) = email.or_else(|| config.acme.email.clone()) else {
                bail!("an operator email is required (--email or acme.email)");
            };

            let issue = Issue {
                hostname,
                email,
                directory,
                account_key,
                https_key,
                out,
                listen: listen.unwrap_or_else(|| config.challenge.listen.clone()),
            };
            issue.run(&config).await?;
        }

        Commands::SshKeygen { out, comment } => {
            let keys = key_generator(&config);
            let pair = keys.generate().await?;
            let ssh = SshKeyPair::export_with_comment(&pair, comment.as_deref())?;

            println!("🗝️ Fingerprint: {}", ssh.fingerprint);
            println!("{}", ssh.public_key);

            if let Some(dir) = out {
                std::fs::create_dir_all(&dir)?;
                write_secret(&dir.join("id_rsa"), &ssh.private_key)?;
                std::fs::write(dir.join("id_rsa.pub"), format!("{}\n", ssh.public_key))?;
                println!("💾 Wrote {}", dir.join("id_rsa").display());
            }
        }

        Commands::Validate { file } => {
            tracing::info!("Validating config: {}", file.display());

            match ConfigLoader::load(&file) {
                Ok(_) => {
                    println!("✅ Configuration '{}' is valid!", file.display());
                }
                Err(e) => {
                    eprintln!("❌ Configuration Error: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("Certwright v{}", certwright_core::VERSION);
        }
    }

    Ok(())
}

/// Parameters of `certwright issue` after merging flags and configuration
struct Issue {
    hostname: String,
    email: String,
    directory: AcmeDirectory,
    account_key: Option<PathBuf>,
    https_key: Option<PathBuf>,
    out: Option<PathBuf>,
    listen: String,
}

impl Issue {
    async fn run(self, config: &CertwrightConfig) -> anyhow::Result<()> {
        let store = Arc::new(CertStore::new(config.storage.resolve()));
        store.init().await?;
        let directory_url = self.directory.url();

        let mut request = AcquisitionRequest::new(&self.hostname, &self.email)
            .with_directory(self.directory.clone());

        match &self.account_key {
            Some(path) => request = request.with_account_key(read_pem(path)?),
            None => {
                if let Some(pem) = store.account_key(directory_url, &self.email).await? {
                    tracing::info!(
                        "👤 Reusing stored account key for {} at {}",
                        self.email,
                        directory_url
                    );
                    request = request.with_account_key(pem);
                }
            }
        }
        if let Some(path) = &self.https_key {
            request = request.with_https_key(read_pem(path)?);
        }

        let mut client = HttpAcmeClient::new();
        if let Some(poll) = poll_policy(config) {
            client = client.with_poll_policy(poll);
        }
        let terms = if config.acme.accept_terms_of_service {
            TermsOfService::AutoAccept
        } else {
            TermsOfService::Decline
        };

        let challenges = Arc::new(ChallengeTokenStore::new());
        let orchestrator = Orchestrator::new(Arc::new(client), key_generator(config), challenges.clone())
            .with_terms_of_service(terms)
            .with_cert_store(store.clone());

        let listen = self
            .listen
            .parse()
            .with_context(|| format!("invalid listen address {:?}", self.listen))?;
        let responder = ChallengeServer::bind(listen, challenges).await?;
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let responder = tokio::spawn(responder.serve_until(async {
            let _ = stopped.await;
        }));

        let outcome = orchestrator.acquire(request).await;

        let _ = stop.send(());
        responder.await??;
        let result = outcome?;

        let stored = store.store_certificate(&result).await?;
        store
            .store_account_key(directory_url, &self.email, &result.account_key)
            .await?;

        if let Some(dir) = &self.out {
            std::fs::create_dir_all(dir)?;
            std::fs::write(dir.join("cert.pem"), &stored.chain_pem)?;
            write_secret(&dir.join("key.pem"), &result.https_key)?;
            write_secret(&dir.join("account.pem"), &result.account_key)?;
        }

        println!(
            "🎉 Certificate for {} issued by {} (expires at {})",
            self.hostname,
            directory_url,
            stored.not_after
        );
        Ok(())
    }
}

fn configured_directory(config: &CertwrightConfig) -> AcmeDirectory {
    match (&config.acme.directory_url, config.acme.environment) {
        (Some(url), _) => AcmeDirectory::Custom(url.clone()),
        (None, AcmeEnvironment::Production) => AcmeDirectory::Production,
        (None, AcmeEnvironment::Staging) => AcmeDirectory::Staging,
    }
}

fn key_generator(config: &CertwrightConfig) -> Arc<dyn KeyGenerator> {
    match config.keys.backend {
        KeyBackend::OpensslCommand => Arc::new(
            OpensslCommand::new()
                .with_program(&config.keys.openssl_path)
                .with_bits(config.keys.bits),
        ),
        KeyBackend::InProcess => Arc::new(InProcess::new().with_bits(config.keys.bits)),
    }
}

fn poll_policy(config: &CertwrightConfig) -> Option<PollPolicy> {
    let acme = &config.acme;
    if acme.poll_attempts.is_none() && acme.poll_interval_secs.is_none() {
        return None;
    }

    let default = PollPolicy::default();
    Some(PollPolicy {
        attempts: acme.poll_attempts.unwrap_or(default.attempts),
        interval: acme
            .poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(default.interval),
    })
}

fn read_pem(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Write a private key readable only by the owner
fn write_secret(path: &Path, contents: &str) -> anyhow::Result<()> {
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_configured_directory() {
        let mut config = CertwrightConfig::default();
        assert_eq!(configured_directory(&config), AcmeDirectory::Staging);

        config.acme.environment = AcmeEnvironment::Production;
        assert_eq!(configured_directory(&config), AcmeDirectory::Production);

        config.acme.directory_url = Some("https://ca.internal/directory".to_string());
        assert_eq!(
            configured_directory(&config),
            AcmeDirectory::Custom("https://ca.internal/directory".to_string())
        );
    }

    #[test]
    fn test_poll_policy() {
        let mut config = CertwrightConfig::default();
        assert!(poll_policy(&config).is_none());

        config.acme.poll_interval_secs = Some(5);
        let poll = poll_policy(&config).unwrap();
        assert_eq!(poll.interval, Duration::from_secs(5));
        assert_eq!(poll.attempts, PollPolicy::default().attempts);
    }

    #[test]
    fn test_issue_flags() {
        let cli = Cli::try_parse_from([
            "certwright",
            "issue",
            "--hostname",
            "example.com",
            "--email",
            "ops@example.com",
            "--production",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Issue { production: true, directory: None, .. }
        ));

        assert!(
            Cli::try_parse_from([
                "certwright",
                "issue",
                "--hostname",
                "example.com",
                "--production",
                "--directory",
                "https://ca/directory",
            ])
            .is_err()
        );
    }
}
