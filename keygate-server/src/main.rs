//! keygate-server - bootstrap certificate authority
//!
//! Issues certificates to hosts that prove knowledge of a pre-shared token.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keygate_auth::{CaIdentity, KeyAlgorithm, Token, DEFAULT_VALIDITY_DAYS};
use keygate_server::{
    RateLimit, RemoteServer, ServerSettings, DEFAULT_PORT, MAX_CONNECTIONS, REQUEST_TIMEOUT,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Default lifetime of a generated CA certificate (10 years).
const DEFAULT_CA_VALIDITY_DAYS: u32 = 3650;

#[derive(Parser)]
#[command(name = "keygate-server", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a self-signed CA certificate and key
    Init {
        /// Hostname clients will connect to; becomes the CA common name
        #[arg(long, env = "KEYGATE_HOSTNAME")]
        hostname: String,

        /// CA certificate lifetime in days
        #[arg(long, default_value_t = DEFAULT_CA_VALIDITY_DAYS)]
        days: u32,

        /// Key algorithm (ecdsa-p256, ecdsa-p384, ed25519)
        #[arg(long, env = "KEYGATE_ALGORITHM", default_value = "ecdsa-p256")]
        algorithm: KeyAlgorithm,

        /// Directory for ca-cert.pem and ca-key.pem
        #[arg(long, env = "KEYGATE_OUT_DIR", default_value = ".")]
        out_dir: PathBuf,
    },

    /// Serve signing requests
    Serve {
        /// Pre-shared token
        #[arg(long, env = "KEYGATE_TOKEN", hide_env_values = true)]
        token: String,

        /// CA certificate chain (PEM, CA certificate first)
        #[arg(long, env = "KEYGATE_CERT", default_value = "ca-cert.pem")]
        cert: PathBuf,

        /// CA private key (PKCS#8 PEM)
        #[arg(long, env = "KEYGATE_KEY", default_value = "ca-key.pem")]
        key: PathBuf,

        #[arg(long, env = "KEYGATE_BIND", default_value = "0.0.0.0")]
        bind: IpAddr,

        #[arg(long, env = "KEYGATE_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Lifetime of issued certificates in days
        #[arg(long, env = "KEYGATE_DAYS", default_value_t = DEFAULT_VALIDITY_DAYS)]
        days: u32,

        /// Sustained signing requests per second (0 disables rate limiting)
        #[arg(long, env = "KEYGATE_RATE_PER_SECOND", default_value_t = RateLimit::default().per_second)]
        rate_per_second: u32,

        #[arg(long, env = "KEYGATE_RATE_BURST", default_value_t = RateLimit::default().burst)]
        rate_burst: u32,

        /// Seconds a client may take to send request headers, and again the body
        #[arg(long, env = "KEYGATE_REQUEST_TIMEOUT", default_value_t = REQUEST_TIMEOUT.as_secs())]
        request_timeout: u64,

        /// Connections served at once
        #[arg(long, env = "KEYGATE_MAX_CONNECTIONS", default_value_t = MAX_CONNECTIONS)]
        max_connections: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            hostname,
            days,
            algorithm,
            out_dir,
        } => cmd_init(&hostname, days, algorithm, &out_dir),
        Commands::Serve {
            token,
            cert,
            key,
            bind,
            port,
            days,
            rate_per_second,
            rate_burst,
            request_timeout,
            max_connections,
        } => {
            let settings = ServerSettings {
                bind_address: bind,
                port,
                validity_days: days,
                rate_limit: (rate_per_second > 0).then_some(RateLimit {
                    per_second: rate_per_second,
                    burst: rate_burst,
                }),
                request_timeout: Duration::from_secs(request_timeout),
                max_connections,
                ..ServerSettings::default()
            };
            cmd_serve(settings, token, &cert, &key).await
        }
    }
}

fn cmd_init(hostname: &str, days: u32, algorithm: KeyAlgorithm, out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let cert_path = out_dir.join("ca-cert.pem");
    let key_path = out_dir.join("ca-key.pem");
    if key_path.exists() {
        anyhow::bail!("{} already exists; refusing to overwrite", key_path.display());
    }

    let ca = CaIdentity::generate(hostname, algorithm, days).context("failed to generate CA")?;

    write_private(&key_path, ca.key_pem())?;
    std::fs::write(&cert_path, ca.chain().to_pem())
        .with_context(|| format!("failed to write {}", cert_path.display()))?;

    tracing::info!(
        hostname,
        %algorithm,
        days,
        cert = %cert_path.display(),
        key = %key_path.display(),
        "Generated CA"
    );
    Ok(())
}

fn write_private(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict {}", path.display()))?;
    }
    Ok(())
}

async fn cmd_serve(settings: ServerSettings, token: String, cert: &Path, key: &Path) -> Result<()> {
    let chain_pem = std::fs::read_to_string(cert)
        .with_context(|| format!("failed to read {}", cert.display()))?;
    let key_pem = zeroize::Zeroizing::new(
        std::fs::read_to_string(key).with_context(|| format!("failed to read {}", key.display()))?,
    );

    let ca = CaIdentity::from_pem(&chain_pem, &key_pem).context("failed to load CA identity")?;
    let token = Token::new(token).context("invalid token")?;

    tracing::info!(
        hostname = %ca.hostname().unwrap_or_default(),
        algorithm = %ca.algorithm(),
        validity_days = settings.validity_days,
        "Loaded CA identity"
    );

    let server = RemoteServer::new(settings, ca, token).context("failed to configure server")?;
    server.start().await.context("failed to start server")?;

    shutdown_signal().await;

    server.shutdown().await.context("failed to stop server")?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_identity() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init("ca.example", 30, KeyAlgorithm::EcdsaP384, dir.path()).unwrap();

        let chain = std::fs::read_to_string(dir.path().join("ca-cert.pem")).unwrap();
        let key = std::fs::read_to_string(dir.path().join("ca-key.pem")).unwrap();
        let ca = CaIdentity::from_pem(&chain, &key).unwrap();

        assert_eq!(ca.hostname().unwrap(), "ca.example");
        assert_eq!(ca.algorithm(), KeyAlgorithm::EcdsaP384);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("ca-key.pem"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init("ca.example", 30, KeyAlgorithm::EcdsaP256, dir.path()).unwrap();
        let before = std::fs::read_to_string(dir.path().join("ca-key.pem")).unwrap();

        let err = cmd_init("ca.example", 30, KeyAlgorithm::EcdsaP256, dir.path()).unwrap_err();
        assert!(err.to_string().contains("refusing to overwrite"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("ca-key.pem")).unwrap(),
            before
        );
    }
}
