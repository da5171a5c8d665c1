//! Map-backed variable resolver.

use std::collections::BTreeMap;

use conduit_domain::{AuthConfig, Headers, QueryParams, RequestSpec};

use super::builtins;
use super::parser::parse_variables;
use crate::ports::{Resolution, VariableResolver};

/// Resolves `{{name}}` against a flat map of environment values.
///
/// Values are substituted once; a value that itself contains `{{...}}` is
/// inserted verbatim.
#[derive(Debug, Clone, Default)]
pub struct MapVariableResolver {
    variables: BTreeMap<String, String>,
}

impl MapVariableResolver {
    /// Creates a resolver over `variables`.
    #[must_use]
    pub const fn new(variables: BTreeMap<String, String>) -> Self {
        Self { variables }
    }

    /// Adds or replaces a variable.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Adds or replaces a variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Applies changes reported by a script run.
    pub fn apply_changes(&mut self, changes: &BTreeMap<String, String>) {
        self.variables
            .extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapVariableResolver {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl VariableResolver for MapVariableResolver {
    fn resolve(&self, input: &str) -> Resolution {
        let references = parse_variables(input);
        if references.is_empty() {
            return Resolution::unchanged(input);
        }

        let mut resolved = String::with_capacity(input.len());
        let mut unresolved = Vec::new();
        let mut last_end = 0;

        for reference in references {
            resolved.push_str(&input[last_end..reference.span.start]);
            let value = if reference.is_builtin() {
                builtins::resolve(&reference.name)
            } else {
                self.variables.get(&reference.name).cloned()
            };
            match value {
                Some(value) => resolved.push_str(&value),
                None => {
                    resolved.push_str(&input[reference.span.clone()]);
                    unresolved.push(reference.name);
                }
            }
            last_end = reference.span.end;
        }
        resolved.push_str(&input[last_end..]);

        Resolution {
            resolved,
            unresolved,
        }
    }

    fn variables(&self) -> BTreeMap<String, String> {
        self.variables.clone()
    }
}

/// Substitutes variables in every text field of `request` that may carry
/// them: URL, headers, params, UTF-8 body, auth fields, GraphQL document,
/// gRPC target and metadata, and the proxy URL.
///
/// Returns the unresolved names, sorted and deduplicated.
pub fn resolve_request(resolver: &dyn VariableResolver, request: &mut RequestSpec) -> Vec<String> {
    let mut unresolved = Vec::new();
    let mut sub = |value: &mut String| {
        let resolution = resolver.resolve(value);
        *value = resolution.resolved;
        unresolved.extend(resolution.unresolved);
    };

    sub(&mut request.url);

    let mut headers = Headers::new();
    for (name, value) in request.headers.iter() {
        let (mut name, mut value) = (name.to_string(), value.to_string());
        sub(&mut name);
        sub(&mut value);
        headers.insert(name, value);
    }
    request.headers = headers;

    let mut params = QueryParams::new();
    for (name, value) in &request.params {
        let (mut name, mut value) = (name.clone(), value.clone());
        sub(&mut name);
        sub(&mut value);
        params.insert(name, value);
    }
    request.params = params;

    if let Ok(text) = std::str::from_utf8(&request.body)
        && text.contains("{{")
    {
        let mut text = text.to_string();
        sub(&mut text);
        request.body = text.into_bytes();
    }

    match &mut request.auth {
        AuthConfig::None => {}
        AuthConfig::Basic { username, password } | AuthConfig::Digest { username, password } => {
            sub(username);
            sub(password);
        }
        AuthConfig::Bearer { token } => sub(token),
        AuthConfig::ApiKey { key, value, .. } => {
            sub(key);
            sub(value);
        }
        AuthConfig::OAuth2 { config, .. } => {
            sub(&mut config.token_url);
            sub(&mut config.auth_url);
            sub(&mut config.client_id);
            sub(&mut config.client_secret);
            sub(&mut config.username);
            sub(&mut config.password);
            if let Some(scope) = config.scope.as_mut() {
                sub(scope);
            }
        }
        AuthConfig::AwsV4(aws) => {
            sub(&mut aws.access_key);
            sub(&mut aws.secret_key);
            sub(&mut aws.region);
            sub(&mut aws.service);
            if let Some(token) = aws.session_token.as_mut() {
                sub(token);
            }
        }
    }

    sub(&mut request.graphql.query);
    sub(&mut request.graphql.variables);
    sub(&mut request.grpc.service);
    sub(&mut request.grpc.method);
    for value in request.grpc.metadata.values_mut() {
        sub(value);
    }
    if let Some(proxy) = request.proxy_url.as_mut() {
        sub(proxy);
    }

    unresolved.sort();
    unresolved.dedup();
    unresolved
}
