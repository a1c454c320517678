//! Platform-default client: one HTTP/1.1 connection per request
//!
//! `trustManagerOverride` swaps the handshake's trust decision for the pin
//! check. `postConnectVerify` completes the handshake under default trust and
//! verifies the negotiated leaf before the request is written.

use super::{log_outcome, StackAdapter};
use crate::tls::{connect_tcp, connect_tls, default_client_config, peer_chain, pin_trust_client_config};
use crate::{Error, HttpRequest, RequestOutcome, Result, TrustSettings};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use pinprobe_core::{
    ConfigSnapshot, PinningConfigStore, PlatformTechnique, StackName, StackTechnique,
};
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Platform-default client adapter
pub struct PlatformAdapter {
    store: Arc<PinningConfigStore>,
    default_tls: Arc<ClientConfig>,
}

impl PlatformAdapter {
    /// Adapter reading `store`, trusting `trust` by default
    pub fn new(store: Arc<PinningConfigStore>, trust: &TrustSettings) -> Result<Self> {
        Ok(Self {
            store,
            default_tls: Arc::new(default_client_config(trust)?),
        })
    }

    async fn execute(
        &self,
        request: &HttpRequest,
        snapshot: &Arc<ConfigSnapshot>,
        technique: PlatformTechnique,
    ) -> Result<(u16, String)> {
        let (host, port, timeout) = (request.host(), request.port(), request.timeout());
        if !request.is_https() {
            let stream = connect_tcp(host, port, timeout).await?;
            return exchange(stream, request).await;
        }

        match technique {
            PlatformTechnique::None => {
                let stream = connect_tls(host, port, self.default_tls.clone(), timeout).await?;
                exchange(stream, request).await
            }
            PlatformTechnique::TrustManagerOverride => {
                let tls = Arc::new(pin_trust_client_config(snapshot.clone())?);
                let stream = connect_tls(host, port, tls, timeout).await?;
                exchange(stream, request).await
            }
            PlatformTechnique::PostConnectVerify => {
                let mut stream = connect_tls(host, port, self.default_tls.clone(), timeout).await?;
                let chain = peer_chain(&stream);
                let result = pinprobe_core::verify_chain(&chain, &snapshot.config);
                if !result.accepted {
                    // nothing has been written yet; close before any request goes out
                    let _ = stream.shutdown().await;
                    return Err(Error::PinMismatch(format!("{} (postConnect)", result.reason)));
                }
                debug!(host, "Post-connect pin check passed: {}", result.reason);
                exchange(stream, request).await
            }
        }
    }
}

#[async_trait]
impl StackAdapter for PlatformAdapter {
    fn stack(&self) -> StackName {
        StackName::Platform
    }

    async fn perform_request(&self, request: HttpRequest) -> RequestOutcome {
        let started = Instant::now();
        let snapshot = self.store.get();
        let technique = if snapshot.config.enabled {
            snapshot.config.effective_technique::<PlatformTechnique>()
        } else {
            PlatformTechnique::None
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

/// Send one request over an established stream and read the whole body
pub(crate) async fn exchange<S>(stream: S, request: &HttpRequest) -> Result<(u16, String)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| Error::from_source("HTTP handshake failed", &e))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("Connection closed with error: {}", e);
        }
    });

    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut builder = http::Request::builder()
        .method(request.method().clone())
        .uri(path);
    if !request.has_header("host") {
        let authority = request
            .uri()
            .authority()
            .map(|a| a.as_str())
            .unwrap_or_else(|| request.host());
        builder = builder.header(http::header::HOST, authority);
    }
    for (name, value) in request.headers() {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let body = Full::new(Bytes::from(request.body().unwrap_or_default().to_owned()));
    let http_request = builder
        .body(body)
        .map_err(|e| Error::InvalidRequest(format!("Failed to build request: {}", e)))?;

    let response = sender
        .send_request(http_request)
        .await
        .map_err(|e| Error::from_source("Request failed", &e))?;
    let status = response.status().as_u16();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::from_source("Reading response body failed", &e))?
        .to_bytes();
    Ok((status, String::from_utf8_lossy(&body).into_owned()))
}
