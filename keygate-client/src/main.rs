//! keygate - request a certificate from a keygate CA
//!
//! Generates a key pair locally, proves knowledge of the pre-shared token and
//! writes the issued key and chain as PEM files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keygate_auth::{KeyAlgorithm, Token};
use keygate_client::{ClientSettings, RemoteClient, DEFAULT_PORT};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keygate", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a certificate
    Request {
        /// CA hostname; must match the CA certificate's common name
        #[arg(long, env = "KEYGATE_CA_HOSTNAME")]
        ca_hostname: String,

        /// Pre-shared token
        #[arg(long, env = "KEYGATE_TOKEN", hide_env_values = true)]
        token: String,

        /// Subject distinguished name (e.g., "CN=host1,OU=web")
        #[arg(long, env = "KEYGATE_DN")]
        dn: String,

        #[arg(long, env = "KEYGATE_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Subject alternative name (repeatable)
        #[arg(long = "san")]
        subject_alt_names: Vec<String>,

        /// Key algorithm (ecdsa-p256, ecdsa-p384, ed25519)
        #[arg(long, env = "KEYGATE_ALGORITHM", default_value = "ecdsa-p256")]
        algorithm: KeyAlgorithm,

        /// Request timeout (e.g., "30s", "2m")
        #[arg(long, env = "KEYGATE_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
        timeout: Duration,

        /// Directory for <name>-key.pem and <name>-chain.pem
        #[arg(long, env = "KEYGATE_OUT_DIR", default_value = ".")]
        out_dir: PathBuf,
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
        Commands::Request {
            ca_hostname,
            token,
            dn,
            port,
            subject_alt_names,
            algorithm,
            timeout,
            out_dir,
        } => {
            let settings = ClientSettings {
                port,
                algorithm,
                subject_alt_names,
                timeout,
                ..ClientSettings::new(ca_hostname)
            };
            cmd_request(settings, token, &dn, &out_dir).await
        }
    }
}

async fn cmd_request(
    settings: ClientSettings,
    token: String,
    dn: &str,
    out_dir: &Path,
) -> Result<()> {
    let token = Token::new(token).context("invalid token")?;
    let ca_hostname = settings.ca_hostname.clone();
    let client = RemoteClient::new(settings, token).context("failed to configure client")?;

    let identity = client
        .issue(dn)
        .await
        .with_context(|| format!("certificate request to {ca_hostname} failed"))?;

    let name = identity
        .chain()
        .leaf()
        .common_name()
        .ok()
        .flatten()
        .map(|cn| file_stem(&cn))
        .unwrap_or_else(|| "host".to_string());

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let key_path = out_dir.join(format!("{name}-key.pem"));
    let chain_path = out_dir.join(format!("{name}-chain.pem"));

    write_private(&key_path, identity.key_pem())?;
    std::fs::write(&chain_path, identity.chain().to_pem())
        .with_context(|| format!("failed to write {}", chain_path.display()))?;

    tracing::info!(
        key = %key_path.display(),
        chain = %chain_path.display(),
        chain_len = identity.chain().len(),
        "Wrote issued identity"
    );
    Ok(())
}

/// Map a common name to a safe file name component.
fn file_stem(common_name: &str) -> String {
    common_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
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

/// Parse a duration string like "30s", "5m" or "1h". A bare number is seconds.
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();

    let (num_str, unit) = if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else {
        (s, 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid duration: {}", s))?;
    if num == 0 {
        return Err(format!("Duration must be positive: {}", s));
    }
    Ok(Duration::from_secs(num.saturating_mul(unit)))
}
