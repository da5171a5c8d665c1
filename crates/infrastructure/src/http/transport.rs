//! Per-call reqwest client construction.
//!
//! Each call gets a client carrying the effective proxy (a per-request URL
//! overrides the client-level one), the TLS options, the shared cookie jar
//! and fresh timing hooks.

use std::sync::Arc;

use conduit_application::{EngineError, EngineResult, ValidationError};
use conduit_domain::{EngineSettings, ProxyConfig, TlsConfig};
use reqwest::{Certificate, Client, Identity, Proxy};
use tracing::{debug, warn};
use url::Url;

use super::timing::{ConnectTimingLayer, TimingRecorder, TimingResolver};
use crate::cookies::SharedCookieJar;

/// Everything that varies between calls.
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions<'a> {
    /// Client-wide settings.
    pub settings: &'a EngineSettings,
    /// Proxy URL set on the request itself.
    pub proxy_override: Option<&'a str>,
    /// Jar attached when cookies are enabled.
    pub cookies: Option<&'a SharedCookieJar>,
    /// Receives DNS and connect durations.
    pub recorder: &'a TimingRecorder,
}

/// The proxy that applies to a call.
#[must_use]
pub fn effective_proxy(client: &ProxyConfig, proxy_override: Option<&str>) -> ProxyConfig {
    match proxy_override.map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) => client.overridden_by(url),
        None => client.clone(),
    }
}

/// Builds the client for one call.
///
/// # Errors
///
/// Returns a validation error for a malformed proxy and a transport error
/// when certificates cannot be loaded or the client cannot be built.
pub async fn build_client(options: TransportOptions<'_>) -> EngineResult<Client> {
    let settings = options.settings;
    let mut builder = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
        .dns_resolver(Arc::new(TimingResolver::new(options.recorder.clone())))
        .connector_layer(ConnectTimingLayer::new(options.recorder.clone()));

    let proxy = effective_proxy(&settings.proxy, options.proxy_override);
    if let Some(proxy) = build_proxy(&proxy)? {
        builder = builder.proxy(proxy);
    } else {
        builder = builder.no_proxy();
    }

    builder = apply_tls(builder, &settings.tls).await?;

    if settings.cookies_enabled
        && let Some(jar) = options.cookies
    {
        builder = builder.cookie_provider(Arc::new(jar.clone()));
    }

    builder
        .build()
        .map_err(|e| EngineError::transport(format!("failed to build HTTP client: {e}")))
}

fn build_proxy(config: &ProxyConfig) -> EngineResult<Option<Proxy>> {
    if !config.is_active() {
        return Ok(None);
    }
    config
        .validate()
        .map_err(|e| ValidationError::InvalidUrl(format!("proxy: {e}")))?;
    let proxy_url = config
        .url_with_auth()
        .map_err(|e| ValidationError::InvalidUrl(format!("proxy: {e}")))?
        .ok_or_else(|| ValidationError::InvalidUrl(format!("proxy: {}", config.url)))?;

    debug!(proxy = %config.url, bypass = config.no_proxy.len(), "Routing through proxy");
    let config = config.clone();
    Ok(Some(Proxy::custom(move |target: &Url| {
        let bypass = target
            .host_str()
            .is_some_and(|host| config.should_bypass(host));
        (!bypass).then(|| proxy_url.clone())
    })))
}

async fn apply_tls(
    mut builder: reqwest::ClientBuilder,
    tls: &TlsConfig,
) -> EngineResult<reqwest::ClientBuilder> {
    if let Some(path) = &tls.ca_bundle {
        let pem = tokio::fs::read(path).await.map_err(|e| {
            EngineError::transport(format!("failed to read CA bundle {}: {e}", path.display()))
        })?;
        let certificates = Certificate::from_pem_bundle(&pem)
            .map_err(|e| EngineError::transport(format!("invalid CA bundle: {e}")))?;
        for certificate in certificates {
            builder = builder.add_root_certificate(certificate);
        }
    }

    if let Some(client_cert) = &tls.client_certificate {
        let mut pem = tokio::fs::read(&client_cert.cert_path).await.map_err(|e| {
            EngineError::transport(format!(
                "failed to read client certificate {}: {e}",
                client_cert.cert_path.display()
            ))
        })?;
        let key = tokio::fs::read(&client_cert.key_path).await.map_err(|e| {
            EngineError::transport(format!(
                "failed to read client key {}: {e}",
                client_cert.key_path.display()
            ))
        })?;
        pem.push(b'\n');
        pem.extend_from_slice(&key);
        let identity = Identity::from_pem(&pem)
            .map_err(|e| EngineError::transport(format!("invalid client certificate: {e}")))?;
        builder = builder.identity(identity);
    }

    for warning in tls.security_warnings() {
        warn!("{}", warning.message());
    }
    if tls.insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder)
}
