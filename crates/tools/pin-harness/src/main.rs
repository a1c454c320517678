//! CLI pinning harness
//!
//! - `pins`: print the digests a server currently presents
//! - `request`: run one request through a stack under a pinning configuration
//! - `redirect`: show how the connect hook rewrites a destination address

use anyhow::Context;
use clap::{Parser, Subcommand};
use pinprobe_bypass::sockaddr::{self, SockaddrLayout};
use pinprobe_bypass::symbols::CONNECT;
use pinprobe_bypass::{BypassConfig, BypassEngine, MemoryRef, ProcessImage, ProxyEndpoint, Value};
use pinprobe_core::{PinningConfig, PinningConfigRequest, StackName};
use pinprobe_net::logging::init_logging;
use pinprobe_net::{fetch_peer_pins, HarnessOptions, HttpRequest, PinningHarness, TrustSettings};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pin-harness")]
#[command(about = "TLS certificate pinning test harness", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SPKI and certificate digests of a server's leaf
    Pins {
        /// Host name
        host: String,

        /// Port
        #[arg(short, long, default_value = "443")]
        port: u16,

        /// Timeout in milliseconds
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },

    /// Run one request through a network stack
    Request {
        /// platform, pooled, engine or external
        #[arg(short, long, default_value = "platform")]
        stack: String,

        /// Absolute URL
        #[arg(short, long)]
        url: String,

        /// Pin (repeatable); no pins disables pinning
        #[arg(short, long = "pin")]
        pins: Vec<String>,

        /// publicKey or certHash
        #[arg(short, long, default_value = "publicKey")]
        mode: String,

        /// Technique for every stack that supports it
        #[arg(short, long)]
        technique: Option<String>,

        /// Extra trust anchors (PEM)
        #[arg(long)]
        ca_file: Option<PathBuf>,

        /// Timeout in milliseconds, 0 for the default
        #[arg(long, default_value = "0")]
        timeout_ms: u64,
    },

    /// Rewrite a destination through the connect redirection hook
    Redirect {
        /// Destination, e.g. 93.184.216.34:443 or [2606:4700::1111]:443
        destination: SocketAddr,

        /// Proxy IPv4 address
        #[arg(long, default_value = "127.0.0.1")]
        proxy_host: Ipv4Addr,

        /// Proxy port
        #[arg(long, default_value = "8080")]
        proxy_port: u16,

        /// bsd or linux; the running system's when absent
        #[arg(long)]
        layout: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match cli.command {
        Commands::Pins { host, port, timeout_ms } => {
            run_pins(&host, port, timeout_ms).await?;
        }
        Commands::Request {
            stack,
            url,
            pins,
            mode,
            technique,
            ca_file,
            timeout_ms,
        } => {
            run_request(&stack, &url, pins, &mode, technique, ca_file, timeout_ms).await?;
        }
        Commands::Redirect {
            destination,
            proxy_host,
            proxy_port,
            layout,
        } => {
            run_redirect(destination, proxy_host, proxy_port, layout.as_deref())?;
        }
    }

    Ok(())
}

async fn run_pins(host: &str, port: u16, timeout_ms: u64) -> anyhow::Result<()> {
    let pins = fetch_peer_pins(host, port, Duration::from_millis(timeout_ms))
        .await
        .with_context(|| format!("Failed to read pins from {}:{}", host, port))?;
    println!("spki  sha256/{}", pins.spki_sha256);
    println!("cert  {}", pins.cert_sha256);
    println!("chain {}", pins.chain_len);
    Ok(())
}

async fn run_request(
    stack: &str,
    url: &str,
    pins: Vec<String>,
    mode: &str,
    technique: Option<String>,
    ca_file: Option<PathBuf>,
    timeout_ms: u64,
) -> anyhow::Result<()> {
    let stack: StackName = stack.parse()?;
    let config = pinning_config(pins, mode, technique)?;

    let mut trust = TrustSettings::default();
    if let Some(path) = &ca_file {
        trust = trust
            .with_pem_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
    }
    let harness = PinningHarness::new(HarnessOptions {
        trust,
        ..HarnessOptions::default()
    })?;
    harness.set_config(config);

    let request = HttpRequest::new("GET", url, timeout_ms)?;
    info!(stack = %stack, url, "Running request");
    let outcome = harness.dispatch(stack, request).await;
    harness.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if outcome.is_pin_mismatch() {
        warn!("Peer rejected by pin check");
    }
    Ok(())
}

fn pinning_config(pins: Vec<String>, mode: &str, technique: Option<String>) -> anyhow::Result<PinningConfig> {
    let cert_hash = mode == "certHash";
    let request: PinningConfigRequest = serde_json::from_value(serde_json::json!({
        "enabled": !pins.is_empty(),
        "mode": mode,
        "spkiPins": if cert_hash { Vec::new() } else { pins.clone() },
        "certSha256Pins": if cert_hash { pins } else { Vec::new() },
        "techniques": { "default": technique },
    }))?;
    Ok(PinningConfig::try_from(request)?)
}

fn run_redirect(
    destination: SocketAddr,
    proxy_host: Ipv4Addr,
    proxy_port: u16,
    layout: Option<&str>,
) -> anyhow::Result<()> {
    let layout = match layout {
        None => SockaddrLayout::native(),
        Some("bsd") => SockaddrLayout::Bsd,
        Some("linux") => SockaddrLayout::Linux,
        Some(other) => anyhow::bail!("Unknown sockaddr layout '{}'", other),
    };
    let config = BypassConfig {
        accept_all_certs: false,
        trust_evaluation: false,
        redirect: Some(ProxyEndpoint {
            host: proxy_host,
            port: proxy_port,
        }),
        observe: false,
        sockaddr_layout: Some(layout),
    };
    config.validate()?;

    let image = Arc::new(ProcessImage::new());
    image.define(CONNECT, |_| Value::Int(0));
    let engine = BypassEngine::new(image.clone());
    let report = engine.install(&config);
    if !report.is_complete() {
        anyhow::bail!("Hook installation failed: {:?}", report.failed);
    }

    let bytes = match destination {
        SocketAddr::V4(addr) => sockaddr::encode_v4(addr, layout),
        SocketAddr::V6(addr) => sockaddr::encode_v6(addr, layout),
    };
    let len = i64::try_from(bytes.len())?;
    let memory = MemoryRef::new(bytes);
    image.call(&CONNECT, &mut [Value::Int(3), Value::Memory(memory.clone()), Value::Int(len)])?;

    let rewritten = sockaddr::parse(&memory.to_vec(), layout).context("Rewritten address unreadable")?;
    println!("{} -> {}", destination, rewritten);
    engine.uninstall();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinprobe_core::{PinMode, TechniqueName};

    #[test]
    fn test_pinning_config_from_flags() {
        let config = pinning_config(vec!["abc".into()], "certHash", Some("postConnect".into())).unwrap();
        assert!(config.enabled);
        assert_eq!(config.mode, PinMode::CertHash);
        assert_eq!(config.cert_pins, vec!["abc".to_string()]);
        assert!(config.spki_pins.is_empty());
        assert_eq!(config.techniques.default, Some(TechniqueName::PostConnectVerify));

        let disabled = pinning_config(Vec::new(), "publicKey", None).unwrap();
        assert!(!disabled.enabled);
        assert!(pinning_config(Vec::new(), "bogus", None).is_err());
    }

    #[test]
    fn test_redirect_rejects_unknown_layout() {
        let dest: SocketAddr = "10.0.0.1:443".parse().unwrap();
        assert!(run_redirect(dest, Ipv4Addr::LOCALHOST, 8080, Some("solaris")).is_err());
        assert!(run_redirect(dest, Ipv4Addr::LOCALHOST, 8080, Some("linux")).is_ok());
    }
}
