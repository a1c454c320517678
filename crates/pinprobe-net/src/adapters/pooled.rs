//! Pooled client adapter (reqwest over rustls)
//!
//! Clients are cached per configuration generation and host so connections
//! are reused between requests under one configuration.

use super::{log_outcome, StackAdapter};
use crate::tls::{default_client_config, host_pinned_client_config};
use crate::{Error, HostPins, HttpRequest, RequestOutcome, Result, TrustSettings};
use async_trait::async_trait;
use parking_lot::Mutex;
use pinprobe_core::{
    ConfigSnapshot, PinMode, PinningConfigStore, PooledTechnique, StackName, StackTechnique,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

struct CachedClient {
    generation: u64,
    host: String,
    pinned: bool,
    client: reqwest::Client,
}

/// Pooled client adapter
pub struct PooledAdapter {
    store: Arc<PinningConfigStore>,
    trust: TrustSettings,
    cached: Mutex<Option<CachedClient>>,
}

impl PooledAdapter {
    /// Adapter reading `store`, trusting `trust` by default
    pub fn new(store: Arc<PinningConfigStore>, trust: TrustSettings) -> Self {
        Self {
            store,
            trust,
            cached: Mutex::new(None),
        }
    }

    fn client_for(&self, snapshot: &ConfigSnapshot, host: &str, pinned: bool) -> Result<reqwest::Client> {
        let mut cached = self.cached.lock();
        if let Some(entry) = cached.as_ref() {
            if entry.generation == snapshot.generation && entry.host == host && entry.pinned == pinned {
                return Ok(entry.client.clone());
            }
        }

        let tls = if pinned {
            let pins = HostPins::new(host, &snapshot.config.spki_pins, false, None)?;
            info!(host, pins = pins.len(), "Registering native pins for pooled client");
            host_pinned_client_config(&self.trust, vec![pins])?
        } else {
            default_client_config(&self.trust)?
        };
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .tls_info(true)
            .build()
            .map_err(|e| Error::Tls(format!("Failed to build pooled client: {}", e)))?;

        *cached = Some(CachedClient {
            generation: snapshot.generation,
            host: host.to_string(),
            pinned,
            client: client.clone(),
        });
        Ok(client)
    }

    async fn execute(&self, request: &HttpRequest, snapshot: &ConfigSnapshot, technique: PooledTechnique) -> Result<(u16, String)> {
        let config = &snapshot.config;
        let https = request.is_https();
        let use_pinner =
            https && technique == PooledTechnique::NativePinner && config.mode == PinMode::PublicKey;
        // certHash cannot be expressed as a native pin, so it falls back to post-verify
        let post_verify = https
            && (technique == PooledTechnique::PostConnectVerify
                || (config.mode == PinMode::CertHash && technique.is_active()));

        let client = self.client_for(snapshot, request.host(), use_pinner)?;
        let mut builder = client
            .request(request.method().clone(), request.url())
            .timeout(request.timeout());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.to_owned());
        }

        let response = builder.send().await?;
        if post_verify {
            let leaf = response
                .extensions()
                .get::<reqwest::tls::TlsInfo>()
                .and_then(|info| info.peer_certificate())
                .map(<[u8]>::to_vec);
            let result = match leaf {
                Some(der) => pinprobe_core::verify(&der, config),
                None => pinprobe_core::verify_chain::<Vec<u8>>(&[], config),
            };
            if !result.accepted {
                // dropping the unread response closes the connection
                drop(response);
                return Err(Error::PinMismatch(result.reason));
            }
            debug!(host = request.host(), "Post-connect pin check passed");
        }

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl StackAdapter for PooledAdapter {
    fn stack(&self) -> StackName {
        StackName::Pooled
    }

    async fn perform_request(&self, request: HttpRequest) -> RequestOutcome {
        let started = Instant::now();
        let snapshot = self.store.get();
        let technique = if snapshot.config.enabled {
            snapshot.config.effective_technique::<PooledTechnique>()
        } else {
            PooledTechnique::None
        };

        let result = tokio::time::timeout(
            request.timeout(),
            self.execute(&request, &snapshot, technique),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::Timeout(format!(
                "Request to {} timed out after {} ms",
                request.url(),
                request.timeout().as_millis()
            )))
        });

        let outcome = RequestOutcome::from_result(result, started);
        log_outcome(self.stack(), technique.name().as_str(), &request, &outcome);
        outcome
    }
}
