//! TLS configuration domain types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// TLS configuration applied when building a transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM bundle of additional CA certificates to trust.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<PathBuf>,

    /// Client certificate for mTLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<ClientCertificate>,

    /// Skip server certificate and hostname verification (dangerous!).
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    /// Create an insecure config that accepts any certificate.
    /// WARNING: This should only be used for testing!
    #[must_use]
    pub fn insecure() -> Self {
        Self {
            insecure_skip_verify: true,
            ..Default::default()
        }
    }

    /// Trust the CA certificates in a PEM file.
    #[must_use]
    pub fn with_ca_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_bundle = Some(path.into());
        self
    }

    /// Add a client certificate for mTLS.
    #[must_use]
    pub fn with_client_cert(mut self, cert: ClientCertificate) -> Self {
        self.client_certificate = Some(cert);
        self
    }

    /// Returns true when nothing deviates from the platform defaults.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        self.ca_bundle.is_none() && self.client_certificate.is_none() && !self.insecure_skip_verify
    }

    /// Lists the dangerous options in use.
    #[must_use]
    pub fn security_warnings(&self) -> Vec<TlsSecurityWarning> {
        let mut warnings = vec![];
        if self.insecure_skip_verify {
            warnings.push(TlsSecurityWarning::CertificateVerificationDisabled);
        }
        warnings
    }
}

/// Client certificate for mTLS authentication, as PEM files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientCertificate {
    /// PEM certificate chain.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
}

impl ClientCertificate {
    /// Create from PEM files.
    #[must_use]
    pub fn from_pem_files(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }
}

/// Security warnings for TLS configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsSecurityWarning {
    /// Certificate verification is disabled.
    CertificateVerificationDisabled,
}

impl TlsSecurityWarning {
    /// Get the warning message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::CertificateVerificationDisabled => {
                "Certificate verification is disabled. Connections are vulnerable to MITM attacks."
            }
        }
    }
}
