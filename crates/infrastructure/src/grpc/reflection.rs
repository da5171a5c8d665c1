//! Descriptor discovery through the gRPC server reflection service (v1).

use std::collections::{BTreeMap, BTreeSet};

use conduit_application::{EngineError, EngineResult};
use prost::Message as _;
use prost_reflect::{DescriptorPool, ServiceDescriptor};
use prost_types::FileDescriptorProto;
use tokio::sync::mpsc;
use tonic::Streaming;
use tonic::transport::Channel;
use tonic_reflection::pb::v1::server_reflection_client::ServerReflectionClient;
use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;
use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;
use tonic_reflection::pb::v1::{ServerReflectionRequest, ServerReflectionResponse};
use tracing::debug;

/// One `ServerReflectionInfo` stream, opened on the first question.
struct Session {
    channel: Channel,
    requests: mpsc::Sender<ServerReflectionRequest>,
    pending: Option<mpsc::Receiver<ServerReflectionRequest>>,
    responses: Option<Streaming<ServerReflectionResponse>>,
}

impl Session {
    fn new(channel: Channel) -> Self {
        let (requests, pending) = mpsc::channel(4);
        Self {
            channel,
            requests,
            pending: Some(pending),
            responses: None,
        }
    }

    async fn ask(&mut self, request: MessageRequest) -> EngineResult<MessageResponse> {
        self.requests
            .send(ServerReflectionRequest {
                host: String::new(),
                message_request: Some(request),
            })
            .await
            .map_err(|_| closed())?;

        if let Some(pending) = self.pending.take() {
            let outbound = futures_util::stream::unfold(pending, |mut rx| async move {
                rx.recv().await.map(|request| (request, rx))
            });
            let mut client = ServerReflectionClient::new(self.channel.clone());
            let response = client
                .server_reflection_info(outbound)
                .await
                .map_err(|status| EngineError::Reflection(status.message().to_string()))?;
            self.responses = Some(response.into_inner());
        }

        let responses = self.responses.as_mut().ok_or_else(closed)?;
        let response = responses
            .message()
            .await
            .map_err(|status| EngineError::Reflection(status.message().to_string()))?
            .ok_or_else(closed)?;

        match response.message_response {
            Some(MessageResponse::ErrorResponse(error)) => Err(EngineError::Reflection(format!(
                "{} (code {})",
                error.error_message, error.error_code
            ))),
            Some(other) => Ok(other),
            None => Err(EngineError::Reflection("empty reflection response".to_string())),
        }
    }
}

fn closed() -> EngineError {
    EngineError::Reflection("reflection stream closed".to_string())
}

/// Lists the fully-qualified services the server exposes.
///
/// # Errors
///
/// Returns `Reflection` when the server does not answer the listing.
pub async fn list_services(channel: Channel) -> EngineResult<Vec<String>> {
    let mut session = Session::new(channel);
    match session.ask(MessageRequest::ListServices(String::new())).await? {
        MessageResponse::ListServicesResponse(list) => {
            let mut names: Vec<String> = list.service.into_iter().map(|s| s.name).collect();
            names.sort();
            Ok(names)
        }
        _ => Err(EngineError::Reflection("unexpected reply to list_services".to_string())),
    }
}

/// Fetches the file defining `service` plus all its transitive imports
/// and returns the service descriptor.
///
/// # Errors
///
/// Returns `Reflection` when the symbol is unknown, a file cannot be
/// decoded, or the descriptors do not link.
pub async fn resolve_service(channel: Channel, service: &str) -> EngineResult<ServiceDescriptor> {
    let mut session = Session::new(channel);
    let mut files: BTreeMap<String, FileDescriptorProto> = BTreeMap::new();
    let mut requested: BTreeSet<String> = BTreeSet::new();
    let mut queue = vec![MessageRequest::FileContainingSymbol(service.to_string())];

    while let Some(request) = queue.pop() {
        let MessageResponse::FileDescriptorResponse(response) = session.ask(request).await? else {
            return Err(EngineError::Reflection(
                "unexpected reply to a file request".to_string(),
            ));
        };
        for bytes in response.file_descriptor_proto {
            let file = FileDescriptorProto::decode(bytes.as_slice())
                .map_err(|e| EngineError::Reflection(format!("bad file descriptor: {e}")))?;
            files.entry(file.name().to_string()).or_insert(file);
        }
        for missing in missing_dependencies(&files) {
            if requested.insert(missing.clone()) {
                queue.push(MessageRequest::FileByFilename(missing));
            }
        }
    }
    debug!(service = %service, files = files.len(), "Resolved descriptors via reflection");

    let mut pool = DescriptorPool::new();
    pool.add_file_descriptor_protos(files.into_values())
        .map_err(|e| EngineError::Reflection(e.to_string()))?;
    pool.get_service_by_name(service)
        .ok_or_else(|| EngineError::Reflection(format!("service not found: {service}")))
}

fn missing_dependencies(files: &BTreeMap<String, FileDescriptorProto>) -> Vec<String> {
    files
        .values()
        .flat_map(|file| file.dependency.iter())
        .filter(|dependency| !files.contains_key(*dependency))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn file(name: &str, dependencies: &[&str]) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(name.to_string()),
            dependency: dependencies.iter().map(|d| (*d).to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_dependencies() {
        let mut files = BTreeMap::new();
        files.insert("a.proto".to_string(), file("a.proto", &["b.proto", "c.proto"]));
        files.insert("b.proto".to_string(), file("b.proto", &["c.proto"]));
        let mut missing = missing_dependencies(&files);
        missing.dedup();
        assert_eq!(missing, vec!["c.proto".to_string()]);

        files.insert("c.proto".to_string(), file("c.proto", &[]));
        assert!(missing_dependencies(&files).is_empty());
    }
}
