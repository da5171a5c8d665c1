//! Command-line arguments and their translation into a [`RequestSpec`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use conduit_domain::{
    AuthConfig, AwsSigV4Config, OAuth2Config, OAuth2GrantType, Protocol, RequestSpec,
};

/// Multi-protocol request engine
#[derive(Parser, Debug)]
#[command(name = "conduit", version, about = "Send HTTP, GraphQL, gRPC and WebSocket requests")]
pub struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Default request timeout in milliseconds
    #[arg(long, global = true, env = "CONDUIT_TIMEOUT_MS")]
    pub default_timeout_ms: Option<u64>,

    /// Client-wide proxy URL
    #[arg(long, global = true, env = "CONDUIT_PROXY")]
    pub proxy: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one request and print the response or stream
    Send(Box<SendArgs>),
    /// List the services a gRPC server exposes through reflection
    Services {
        /// Server address (`host:port`, `http://`, `https://`, `grpc://`, `grpcs://`)
        address: String,
    },
    /// Show or write the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective settings as JSON
    Show,
    /// Print the settings file location
    Path,
    /// Write the effective settings to the settings file
    Init,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProtocolArg {
    #[default]
    Http,
    Graphql,
    Grpc,
    Websocket,
}

impl From<ProtocolArg> for Protocol {
    fn from(value: ProtocolArg) -> Self {
        match value {
            ProtocolArg::Http => Self::Http,
            ProtocolArg::Graphql => Self::GraphQl,
            ProtocolArg::Grpc => Self::Grpc,
            ProtocolArg::Websocket => Self::WebSocket,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GrantArg {
    #[default]
    ClientCredentials,
    Password,
    AuthorizationCode,
}

impl From<GrantArg> for OAuth2GrantType {
    fn from(value: GrantArg) -> Self {
        match value {
            GrantArg::ClientCredentials => Self::ClientCredentials,
            GrantArg::Password => Self::Password,
            GrantArg::AuthorizationCode => Self::AuthorizationCode,
        }
    }
}

/// Arguments of `conduit send`.
#[derive(Args, Debug, Default)]
pub struct SendArgs {
    /// Target URL or gRPC address
    #[arg(long)]
    pub url: String,

    #[arg(long, value_enum, default_value = "http")]
    pub protocol: ProtocolArg,

    /// HTTP method
    #[arg(short = 'X', long = "method", default_value = "GET")]
    pub method: String,

    /// Header as `name:value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Query parameter as `name=value` (repeatable)
    #[arg(short = 'q', long = "query-param")]
    pub params: Vec<String>,

    /// Variable for `{{name}}` placeholders as `name=value` (repeatable)
    #[arg(long = "var")]
    pub vars: Vec<String>,

    /// Inline request body
    #[arg(long, conflicts_with = "body_file")]
    pub body: Option<String>,

    /// Read the request body from a file
    #[arg(long)]
    pub body_file: Option<PathBuf>,

    /// Per-request timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Per-request proxy URL
    #[arg(long)]
    pub request_proxy: Option<String>,

    /// Print response headers
    #[arg(short = 'i', long)]
    pub include: bool,

    #[command(flatten)]
    pub auth: AuthArgs,

    /// GraphQL document
    #[arg(long)]
    pub graphql_query: Option<String>,

    /// GraphQL variables as a JSON object
    #[arg(long)]
    pub graphql_variables: Option<String>,

    /// Fully-qualified gRPC service
    #[arg(long)]
    pub grpc_service: Option<String>,

    /// gRPC method name
    #[arg(long)]
    pub grpc_method: Option<String>,

    /// gRPC metadata as `key=value` (repeatable)
    #[arg(long = "metadata")]
    pub grpc_metadata: Vec<String>,

    /// Open a gRPC stream instead of a unary call
    #[arg(long)]
    pub stream: bool,

    /// Extra message for WebSocket or gRPC client streams (repeatable)
    #[arg(long = "message")]
    pub messages: Vec<String>,

    /// How long to keep listening on a WebSocket, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    pub listen_ms: u64,

    /// Pre-request script file
    #[arg(long)]
    pub pre_script: Option<PathBuf>,

    /// Post-response script file
    #[arg(long)]
    pub post_script: Option<PathBuf>,
}

/// Authentication presets; at most one applies.
#[derive(Args, Debug, Default)]
pub struct AuthArgs {
    /// Basic credentials as `user:password`
    #[arg(long, group = "auth_kind")]
    pub basic: Option<String>,

    /// Bearer token
    #[arg(long, group = "auth_kind")]
    pub bearer: Option<String>,

    /// API key header as `name:value`
    #[arg(long, group = "auth_kind")]
    pub api_key: Option<String>,

    /// API key query parameter as `name=value`
    #[arg(long, group = "auth_kind")]
    pub api_key_query: Option<String>,

    /// Digest credentials as `user:password`
    #[arg(long, group = "auth_kind")]
    pub digest: Option<String>,

    /// AWS credentials as `access_key:secret_key`
    #[arg(long, group = "auth_kind")]
    pub aws: Option<String>,

    #[arg(long)]
    pub aws_region: Option<String>,

    #[arg(long)]
    pub aws_service: Option<String>,

    #[arg(long)]
    pub aws_session_token: Option<String>,

    /// `OAuth2` token endpoint
    #[arg(long, group = "auth_kind", requires = "oauth2_client_id")]
    pub oauth2_token_url: Option<String>,

    #[arg(long, value_enum, default_value = "client-credentials")]
    pub oauth2_grant: GrantArg,

    #[arg(long)]
    pub oauth2_client_id: Option<String>,

    #[arg(long)]
    pub oauth2_client_secret: Option<String>,

    /// Authorization endpoint for the authorization code grant
    #[arg(long)]
    pub oauth2_auth_url: Option<String>,

    #[arg(long)]
    pub oauth2_scope: Option<String>,

    /// Resource owner credentials as `user:password`
    #[arg(long)]
    pub oauth2_user: Option<String>,
}

impl AuthArgs {
    /// Builds the configured preset, or `AuthConfig::None`.
    pub fn to_config(&self) -> Result<AuthConfig> {
        if let Some(basic) = &self.basic {
            let (user, password) = split_pair(basic, ':')?;
            return Ok(AuthConfig::basic(user, password));
        }
        if let Some(token) = &self.bearer {
            return Ok(AuthConfig::bearer(token));
        }
        if let Some(key) = &self.api_key {
            let (name, value) = split_pair(key, ':')?;
            return Ok(AuthConfig::api_key_header(name, value));
        }
        if let Some(key) = &self.api_key_query {
            let (name, value) = split_pair(key, '=')?;
            return Ok(AuthConfig::api_key_query(name, value));
        }
        if let Some(digest) = &self.digest {
            let (user, password) = split_pair(digest, ':')?;
            return Ok(AuthConfig::digest(user, password));
        }
        if let Some(aws) = &self.aws {
            let (access_key, secret_key) = split_pair(aws, ':')?;
            let (Some(region), Some(service)) = (&self.aws_region, &self.aws_service) else {
                bail!("--aws needs --aws-region and --aws-service");
            };
            return Ok(AuthConfig::AwsV4(AwsSigV4Config {
                access_key,
                secret_key,
                session_token: self.aws_session_token.clone(),
                region: region.clone(),
                service: service.clone(),
            }));
        }
        if let Some(token_url) = &self.oauth2_token_url {
            let (username, password) = match &self.oauth2_user {
                Some(user) => split_pair(user, ':')?,
                None => (String::new(), String::new()),
            };
            let config = OAuth2Config {
                grant_type: self.oauth2_grant.into(),
                token_url: token_url.clone(),
                auth_url: self.oauth2_auth_url.clone().unwrap_or_default(),
                client_id: self.oauth2_client_id.clone().unwrap_or_default(),
                client_secret: self.oauth2_client_secret.clone().unwrap_or_default(),
                scope: self.oauth2_scope.clone(),
                username,
                password,
                extra_params: BTreeMap::new(),
            };
            return Ok(AuthConfig::OAuth2 { config, token: None });
        }
        Ok(AuthConfig::None)
    }
}

impl SendArgs {
    /// Assembles the request; files are read here.
    ///
    /// # Errors
    ///
    /// Fails on malformed pairs and unreadable body or script files.
    pub fn to_request(&self, default_timeout_ms: u64) -> Result<RequestSpec> {
        let mut request = RequestSpec::new(&self.url)
            .with_protocol(self.protocol.into())
            .with_method(self.method.to_ascii_uppercase())
            .with_timeout_ms(self.timeout_ms.unwrap_or(default_timeout_ms))
            .with_auth(self.auth.to_config()?);

        for header in &self.headers {
            let (name, value) = split_pair(header, ':')?;
            request.headers.insert(name, value);
        }
        for param in &self.params {
            let (name, value) = split_pair(param, '=')?;
            request.params.insert(name, value);
        }

        if let Some(body) = &self.body {
            request.body = body.clone().into_bytes();
        } else if let Some(path) = &self.body_file {
            request.body = std::fs::read(path)
                .with_context(|| format!("reading body file {}", path.display()))?;
        }

        if let Some(query) = &self.graphql_query {
            request.graphql.query.clone_from(query);
        }
        if let Some(variables) = &self.graphql_variables {
            request.graphql.variables.clone_from(variables);
        }
        if let Some(service) = &self.grpc_service {
            request.grpc.service.clone_from(service);
        }
        if let Some(method) = &self.grpc_method {
            request.grpc.method.clone_from(method);
        }
        for entry in &self.grpc_metadata {
            let (key, value) = split_pair(entry, '=')?;
            request.grpc.metadata.insert(key, value);
        }

        request.pre_script = read_script(self.pre_script.as_ref())?;
        request.post_script = read_script(self.post_script.as_ref())?;
        request.proxy_url.clone_from(&self.request_proxy);
        Ok(request)
    }

    /// `--var` pairs as a map.
    pub fn variables(&self) -> Result<BTreeMap<String, String>> {
        self.vars.iter().map(|pair| split_pair(pair, '=')).collect()
    }
}

fn read_script(path: Option<&PathBuf>) -> Result<Option<String>> {
    path.map(|path| {
        std::fs::read_to_string(path).with_context(|| format!("reading script {}", path.display()))
    })
    .transpose()
}

/// Splits `name<sep>value`, trimming both sides; the name must not be empty.
pub fn split_pair(raw: &str, separator: char) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(separator) else {
        bail!("expected `name{separator}value`, got `{raw}`");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("empty name in `{raw}`");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn parse(args: &[&str]) -> SendArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Send(args) => *args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_split_pair() {
        assert_eq!(
            split_pair("Content-Type: application/json", ':').unwrap(),
            ("Content-Type".to_string(), "application/json".to_string())
        );
        assert_eq!(
            split_pair("url=https://x/?a=b", '=').unwrap(),
            ("url".to_string(), "https://x/?a=b".to_string())
        );
        assert!(split_pair("novalue", ':').is_err());
        assert!(split_pair(" :v", ':').is_err());
    }

    #[test]
    fn test_http_request_from_flags() {
        let args = parse(&[
            "conduit", "send", "--url", "https://api.example.com/users", "-X", "post",
            "-H", "Accept: application/json", "-q", "page=2", "--body", "{}", "--bearer", "t0k",
        ]);
        let request = args.to_request(30_000).unwrap();

        assert_eq!(request.protocol_tag(), "http");
        assert_eq!(request.method, "POST");
        assert_eq!(request.headers.get("accept"), Some("application/json"));
        assert_eq!(request.params.get("page").map(String::as_str), Some("2"));
        assert_eq!(request.body_text(), "{}");
        assert_eq!(request.auth, AuthConfig::bearer("t0k"));
        assert_eq!(request.timeout_ms, 30_000);
    }

    #[test]
    fn test_grpc_request_from_flags() {
        let args = parse(&[
            "conduit", "send", "--protocol", "grpc", "--url", "localhost:50051",
            "--grpc-service", "grpc.health.v1.Health", "--grpc-method", "Check",
            "--metadata", "x-tenant=acme", "--timeout-ms", "900",
        ]);
        let request = args.to_request(30_000).unwrap();

        assert_eq!(request.protocol_tag(), "grpc");
        assert_eq!(request.grpc.full_method(), "/grpc.health.v1.Health/Check");
        assert_eq!(request.grpc.metadata.get("x-tenant").map(String::as_str), Some("acme"));
        assert_eq!(request.timeout_ms, 900);
    }

    #[test]
    fn test_auth_presets() {
        let args = parse(&["conduit", "send", "--url", "https://x", "--digest", "alice:pw"]);
        assert_eq!(args.auth.to_config().unwrap(), AuthConfig::digest("alice", "pw"));

        let args = parse(&[
            "conduit", "send", "--url", "https://x", "--aws", "AKID:secret",
            "--aws-region", "us-east-1", "--aws-service", "s3",
        ]);
        let AuthConfig::AwsV4(aws) = args.auth.to_config().unwrap() else {
            panic!("expected SigV4");
        };
        assert_eq!(aws.region, "us-east-1");
        assert_eq!(aws.service, "s3");

        let args = parse(&[
            "conduit", "send", "--url", "https://x", "--oauth2-token-url", "https://idp/token",
            "--oauth2-client-id", "cli", "--oauth2-grant", "password", "--oauth2-user", "bob:pw",
        ]);
        let AuthConfig::OAuth2 { config, token } = args.auth.to_config().unwrap() else {
            panic!("expected OAuth2");
        };
        assert_eq!(config.grant_type, OAuth2GrantType::Password);
        assert_eq!(config.username, "bob");
        assert!(token.is_none());
    }

    #[test]
    fn test_conflicting_auth_presets_are_rejected() {
        let result = Cli::try_parse_from([
            "conduit", "send", "--url", "https://x", "--bearer", "a", "--basic", "u:p",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_body_and_scripts_from_files() {
        let mut body = tempfile::NamedTempFile::new().unwrap();
        write!(body, "payload").unwrap();
        let mut script = tempfile::NamedTempFile::new().unwrap();
        write!(script, "log(1)").unwrap();

        let body_path = body.path().to_string_lossy().into_owned();
        let script_path = script.path().to_string_lossy().into_owned();
        let args = parse(&[
            "conduit", "send", "--url", "https://x", "--body-file", &body_path,
            "--pre-script", &script_path,
        ]);
        let request = args.to_request(1_000).unwrap();
        assert_eq!(request.body_text(), "payload");
        assert_eq!(request.pre_script.as_deref(), Some("log(1)"));
        assert!(request.post_script.is_none());
    }
}
