//! Descriptor-driven codec for calls without generated stubs.

use prost::Message as _;
use prost_reflect::{DynamicMessage, MessageDescriptor, SerializeOptions};
use serde_json::Value;
use tonic::Status;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};

/// Encodes [`DynamicMessage`] requests and decodes responses of `output`.
#[derive(Debug, Clone)]
pub struct DynamicCodec {
    output: MessageDescriptor,
}

impl DynamicCodec {
    /// Creates a codec decoding responses as `output`.
    #[must_use]
    pub const fn new(output: MessageDescriptor) -> Self {
        Self { output }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder {
            output: self.output.clone(),
        }
    }
}

/// Encoder half of [`DynamicCodec`].
#[derive(Debug, Clone, Copy)]
pub struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| Status::internal(format!("failed to encode request: {e}")))
    }
}

/// Decoder half of [`DynamicCodec`].
#[derive(Debug, Clone)]
pub struct DynamicDecoder {
    output: MessageDescriptor,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        DynamicMessage::decode(self.output.clone(), src)
            .map(Some)
            .map_err(|e| Status::internal(format!("failed to decode response: {e}")))
    }
}

/// Parses a JSON body as a `descriptor` message; an empty body is `{}`.
///
/// # Errors
///
/// Returns a message naming the type when the JSON does not fit it.
pub fn message_from_json(descriptor: &MessageDescriptor, body: &str) -> Result<DynamicMessage, String> {
    let body = body.trim();
    let body = if body.is_empty() { "{}" } else { body };
    let mut deserializer = serde_json::Deserializer::from_str(body);
    let message = DynamicMessage::deserialize(descriptor.clone(), &mut deserializer)
        .map_err(|e| format!("{}: {e}", descriptor.full_name()))?;
    deserializer
        .end()
        .map_err(|e| format!("{}: {e}", descriptor.full_name()))?;
    Ok(message)
}

/// Converts a message to JSON, keeping fields that hold default values.
#[must_use]
pub fn message_to_json(message: &DynamicMessage) -> Value {
    let options = SerializeOptions::new().skip_default_fields(false);
    message
        .serialize_with_options(serde_json::value::Serializer, &options)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use prost_reflect::DescriptorPool;
    use serde_json::json;

    fn health_request() -> MessageDescriptor {
        let pool = DescriptorPool::decode(tonic_health::pb::FILE_DESCRIPTOR_SET).unwrap();
        pool.get_message_by_name("grpc.health.v1.HealthCheckRequest")
            .unwrap()
    }

    #[test]
    fn test_json_round_trip_keeps_defaults() {
        let descriptor = health_request();
        let message = message_from_json(&descriptor, r#"{"service": "orders"}"#).unwrap();
        assert_eq!(message_to_json(&message), json!({"service": "orders"}));

        let empty = message_from_json(&descriptor, "  ").unwrap();
        assert_eq!(message_to_json(&empty), json!({"service": ""}));
    }

    #[test]
    fn test_unknown_field_names_the_type() {
        let err = message_from_json(&health_request(), r#"{"nope": 1}"#).unwrap_err();
        assert!(err.starts_with("grpc.health.v1.HealthCheckRequest"));
    }
}
