//! Encoding of node attribute maps stored as node payloads.

use std::collections::BTreeMap;

use crate::SerializationError;

pub type Attributes = BTreeMap<String, String>;

/// Converts an attribute map to and from a node payload.
///
/// An empty map is never written as a body, so an empty payload must decode
/// to an empty map.
pub trait AttributeSerializer: Send + Sync + 'static {
    fn serialize(
        &self,
        attributes: &Attributes,
    ) -> Result<Vec<u8>, SerializationError>;

    fn deserialize(
        &self,
        bytes: &[u8],
    ) -> Result<Attributes, SerializationError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeAttributeSerializer;

impl AttributeSerializer for BincodeAttributeSerializer {
    fn serialize(
        &self,
        attributes: &Attributes,
    ) -> Result<Vec<u8>, SerializationError> {
        if attributes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(bincode::serialize(attributes)?)
    }

    fn deserialize(
        &self,
        bytes: &[u8],
    ) -> Result<Attributes, SerializationError> {
        if bytes.is_empty() {
            return Ok(Attributes::new());
        }
        Ok(bincode::deserialize(bytes)?)
    }
}
