//! HTTP Digest authentication (RFC 7616 / RFC 2617).

use conduit_domain::AuthError;
use md5::Md5;
use sha2::{Digest as _, Sha256};

/// Hash function named by the challenge's `algorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// `MD5` (the default when absent).
    Md5,
    /// `MD5-sess`.
    Md5Sess,
    /// `SHA-256`.
    Sha256,
    /// `SHA-256-sess`.
    Sha256Sess,
}

impl DigestAlgorithm {
    fn parse(value: &str) -> Result<Self, AuthError> {
        match value.to_ascii_uppercase().as_str() {
            "MD5" => Ok(Self::Md5),
            "MD5-SESS" => Ok(Self::Md5Sess),
            "SHA-256" => Ok(Self::Sha256),
            "SHA-256-SESS" => Ok(Self::Sha256Sess),
            other => Err(AuthError::DigestChallenge {
                message: format!("unsupported algorithm {other}"),
            }),
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
        }
    }

    const fn is_session(self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn hash(self, data: &str) -> String {
        match self {
            Self::Md5 | Self::Md5Sess => hex::encode(Md5::digest(data.as_bytes())),
            Self::Sha256 | Self::Sha256Sess => hex::encode(Sha256::digest(data.as_bytes())),
        }
    }
}

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    /// Protection space.
    pub realm: String,
    /// Server nonce.
    pub nonce: String,
    /// Chosen quality of protection (`auth`), if the server offered one.
    pub qop: Option<String>,
    /// Hash algorithm.
    pub algorithm: DigestAlgorithm,
    /// Opaque value echoed back verbatim.
    pub opaque: Option<String>,
}

impl DigestChallenge {
    /// Returns true if a `WWW-Authenticate` value is a Digest challenge.
    #[must_use]
    pub fn is_digest(header: &str) -> bool {
        header
            .trim_start()
            .get(..6)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("digest"))
    }

    /// Parses a `WWW-Authenticate` header value.
    ///
    /// # Errors
    ///
    /// Returns an error when the scheme is not Digest, `nonce` is missing,
    /// or the algorithm or qop is unsupported.
    pub fn parse(header: &str) -> Result<Self, AuthError> {
        let header = header.trim();
        if !Self::is_digest(header) {
            return Err(challenge_error("not a Digest challenge"));
        }
        let params = parse_params(&header[6..]);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone())
        };

        let nonce = get("nonce").ok_or_else(|| challenge_error("missing nonce"))?;
        let algorithm = get("algorithm")
            .map_or(Ok(DigestAlgorithm::Md5), |a| DigestAlgorithm::parse(&a))?;
        let qop = match get("qop") {
            None => None,
            Some(offered) => {
                if offered.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")) {
                    Some("auth".to_string())
                } else {
                    return Err(challenge_error(&format!("unsupported qop {offered}")));
                }
            }
        };

        Ok(Self {
            realm: get("realm").unwrap_or_default(),
            nonce,
            qop,
            algorithm,
            opaque: get("opaque"),
        })
    }

    /// Builds the `Authorization` header value answering this challenge.
    #[must_use]
    pub fn authorization(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
        nonce_count: u32,
    ) -> String {
        let algorithm = self.algorithm;
        let nc = format!("{nonce_count:08x}");

        let mut ha1 = algorithm.hash(&format!("{username}:{}:{password}", self.realm));
        if algorithm.is_session() {
            ha1 = algorithm.hash(&format!("{ha1}:{}:{cnonce}", self.nonce));
        }
        let ha2 = algorithm.hash(&format!("{}:{uri}", method.to_ascii_uppercase()));
        let response = match &self.qop {
            Some(qop) => algorithm.hash(&format!("{ha1}:{}:{nc}:{cnonce}:{qop}:{ha2}", self.nonce)),
            None => algorithm.hash(&format!("{ha1}:{}:{ha2}", self.nonce)),
        };

        let mut parts = vec![
            format!("username=\"{}\"", quote(username)),
            format!("realm=\"{}\"", quote(&self.realm)),
            format!("nonce=\"{}\"", quote(&self.nonce)),
            format!("uri=\"{}\"", quote(uri)),
            format!("algorithm={}", algorithm.name()),
            format!("response=\"{response}\""),
        ];
        if let Some(qop) = &self.qop {
            parts.push(format!("qop={qop}"));
            parts.push(format!("nc={nc}"));
            parts.push(format!("cnonce=\"{cnonce}\""));
        }
        if let Some(opaque) = &self.opaque {
            parts.push(format!("opaque=\"{}\"", quote(opaque)));
        }
        format!("Digest {}", parts.join(", "))
    }
}

/// Random client nonce.
#[must_use]
pub fn generate_cnonce() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

fn challenge_error(message: &str) -> AuthError {
    AuthError::DigestChallenge {
        message: message.to_string(),
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Splits `k=v, k="v, with comma"` into pairs, unescaping quoted values.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let key = key.trim().to_string();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek().copied() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim().to_string();
        }
        params.push((key, value));
    }

    params
}
