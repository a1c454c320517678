//! `curl` as the external transport
//!
//! Side-channel headers are stripped from the request and turned into curl
//! options. `sslctx` pins SPKI digests inside curl's own TLS context via
//! `--pinnedpubkey`; `preflight` checks pins on a separate in-process
//! connection before curl runs. Certificate-hash pins have no curl option, so
//! they are always checked by preflight when a technique is active.

use crate::adapters::{
    ExternalTransport, CA_INFO_HEADER, CERT_PINS_HEADER, INSECURE_HEADER, SPKI_PINS_HEADER,
    TECHNIQUE_HEADER,
};
use crate::preflight::check_host_pins;
use crate::tls::{accept_any_client_config, default_client_config};
use crate::{Error, HttpRequest, RequestOutcome, Result, TrustSettings};
use async_trait::async_trait;
use pinprobe_core::{normalize_pin, ExternalTechnique, PIN_MISMATCH_MARKER};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// curl exit code for a `--pinnedpubkey` mismatch
const CURLE_SSL_PINNEDPUBKEYNOTMATCH: i32 = 90;
/// curl exit code for an expired deadline
const CURLE_OPERATION_TIMEDOUT: i32 = 28;

const STATUS_MARKER: &str = "\n__pinprobe_status__:";

/// Side-channel options parsed from a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideChannel {
    /// CA bundle path
    pub ca_info: Option<PathBuf>,
    /// Skip chain verification
    pub insecure: bool,
    /// SPKI pins
    pub spki_pins: Vec<String>,
    /// Whole-certificate pins
    pub cert_pins: Vec<String>,
    /// Requested technique
    pub technique: ExternalTechnique,
}

impl Default for SideChannel {
    fn default() -> Self {
        Self {
            ca_info: None,
            insecure: false,
            spki_pins: Vec::new(),
            cert_pins: Vec::new(),
            technique: ExternalTechnique::None,
        }
    }
}

impl SideChannel {
    /// Remove the side-channel headers from `request` and parse them
    pub fn take_from(request: &mut HttpRequest) -> Self {
        let split = |value: Option<String>| -> Vec<String> {
            value
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        Self {
            ca_info: request.take_header(CA_INFO_HEADER).map(PathBuf::from),
            insecure: request
                .take_header(INSECURE_HEADER)
                .is_some_and(|v| matches!(v.trim(), "true" | "TRUE" | "1")),
            spki_pins: split(request.take_header(SPKI_PINS_HEADER)),
            cert_pins: split(request.take_header(CERT_PINS_HEADER)),
            technique: request
                .take_header(TECHNIQUE_HEADER)
                .and_then(|v| ExternalTechnique::from_header_value(&v))
                .unwrap_or(ExternalTechnique::None),
        }
    }

    fn has_pins(&self) -> bool {
        !self.spki_pins.is_empty() || !self.cert_pins.is_empty()
    }

    /// Whether a preflight connection is needed before the transfer
    pub fn needs_preflight(&self) -> bool {
        if !self.has_pins() {
            return false;
        }
        self.technique.runs_preflight()
            || (self.technique.runs_context_check() && !self.cert_pins.is_empty())
    }

    /// `--pinnedpubkey` argument, if curl should check SPKI pins itself
    pub fn pinned_pubkey_arg(&self) -> Option<String> {
        if !self.technique.runs_context_check() || self.spki_pins.is_empty() {
            return None;
        }
        Some(
            self.spki_pins
                .iter()
                .map(|p| format!("sha256//{}", normalize_pin(p)))
                .collect::<Vec<_>>()
                .join(";"),
        )
    }
}

/// Runs `curl` as a child process per request
#[derive(Debug, Clone)]
pub struct CurlTransport {
    binary: PathBuf,
    trust: TrustSettings,
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl CurlTransport {
    /// `curl` from `PATH`, default trust for preflight
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("curl"),
            trust: TrustSettings::default(),
        }
    }

    /// Use a specific curl binary
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Default trust for preflight connections
    pub fn with_trust(mut self, trust: TrustSettings) -> Self {
        self.trust = trust;
        self
    }

    async fn preflight(&self, request: &HttpRequest, side: &SideChannel) -> Result<()> {
        let tls = if side.insecure {
            accept_any_client_config()?
        } else {
            let mut trust = self.trust.clone();
            if let Some(ca) = &side.ca_info {
                trust = trust.with_pem_file(ca)?;
            }
            default_client_config(&trust)?
        };
        check_host_pins(
            request.host(),
            request.port(),
            &side.spki_pins,
            &side.cert_pins,
            Arc::new(tls),
        )
        .await
    }

    /// Command line for `request` with side-channel options applied
    pub fn build_args(&self, request: &HttpRequest, side: &SideChannel) -> Vec<String> {
        let secs = format!("{:.3}", request.timeout().as_secs_f64());
        let mut args: Vec<String> = vec![
            "--silent".into(),
            "--show-error".into(),
            "--connect-timeout".into(),
            secs.clone(),
            "--max-time".into(),
            secs,
            "--write-out".into(),
            format!("{}%{{http_code}}", STATUS_MARKER),
        ];

        match request.method().as_str() {
            "GET" => {}
            "HEAD" => args.push("--head".into()),
            method => {
                args.push("--request".into());
                args.push(method.into());
            }
        }
        if upload_body(request).is_some() {
            args.push("--data-binary".into());
            args.push("@-".into());
        }
        for (name, value) in request.headers() {
            args.push("--header".into());
            args.push(format!("{}: {}", name, value));
        }

        if side.insecure {
            args.push("--insecure".into());
        }
        if let Some(ca) = &side.ca_info {
            args.push("--cacert".into());
            args.push(ca.to_string_lossy().into_owned());
        }
        if let Some(pinned) = side.pinned_pubkey_arg() {
            args.push("--pinnedpubkey".into());
            args.push(pinned);
        }

        args.push("--".into());
        args.push(request.url());
        args
    }

    async fn run(&self, request: &HttpRequest, side: &SideChannel) -> Result<(u16, String)> {
        if side.needs_preflight() {
            self.preflight(request, side).await?;
            debug!(host = request.host(), "Preflight pin check passed");
        }

        let args = self.build_args(request, side);
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(if upload_body(request).is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Transport(format!("Failed to start {}: {}", self.binary.display(), e))
            })?;

        if let (Some(body), Some(mut stdin)) = (upload_body(request), child.stdin.take()) {
            stdin.write_all(body.as_bytes()).await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => parse_output(&output.stdout),
            Some(CURLE_SSL_PINNEDPUBKEYNOTMATCH) => Err(Error::PinMismatch(format!(
                "{}: curl rc={} ({})",
                PIN_MISMATCH_MARKER, CURLE_SSL_PINNEDPUBKEYNOTMATCH, stderr
            ))),
            Some(CURLE_OPERATION_TIMEDOUT) => Err(Error::Timeout(format!(
                "curl rc={} ({})",
                CURLE_OPERATION_TIMEDOUT, stderr
            ))),
            Some(rc) => Err(Error::Transport(format!("curl rc={} ({})", rc, stderr))),
            None => Err(Error::Transport(format!("curl terminated by signal ({})", stderr))),
        }
    }
}

/// Body sent on the wire; GET and HEAD never carry one
fn upload_body(request: &HttpRequest) -> Option<&str> {
    match request.method().as_str() {
        "GET" | "HEAD" => None,
        _ => request.body(),
    }
}

fn parse_output(stdout: &[u8]) -> Result<(u16, String)> {
    let text = String::from_utf8_lossy(stdout);
    let (body, status) = text
        .rsplit_once(STATUS_MARKER)
        .ok_or_else(|| Error::Transport("curl output carried no status".to_string()))?;
    let status: u16 = status
        .trim()
        .parse()
        .map_err(|_| Error::Transport(format!("curl reported status '{}'", status.trim())))?;
    Ok((status, body.to_string()))
}

#[async_trait]
impl ExternalTransport for CurlTransport {
    async fn perform(&self, request: HttpRequest) -> RequestOutcome {
        let started = Instant::now();
        let mut request = request;
        let side = SideChannel::take_from(&mut request);
        info!(
            host = request.host(),
            technique = ?side.technique,
            spki_pins = side.spki_pins.len(),
            cert_pins = side.cert_pins.len(),
            "Running curl transfer"
        );
        let timeout = request.timeout();
        // preflight plus transfer share one deadline
        let result = tokio::time::timeout(timeout, self.run(&request, &side))
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout(format!(
                    "curl transfer timed out after {} ms",
                    timeout.as_millis()
                )))
            });
        RequestOutcome::from_result(result, started)
    }
}
