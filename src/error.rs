use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

use crate::{
    entitykey::EntityKey,
    properties::{DataType, EntityId, ManagerId},
    state::EntityState,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum CacheError {
    #[error("Cannot {operation} entity {entity} in state {from}. Only setDetached and re-attach are legal for a detached entity")]
    InvalidStateTransition {
        entity: EntityId,
        from: EntityState,
        operation: String,
    },
    #[error("Entity {entity} belongs to {owner} and cannot be linked or attached to {target}. One of the two entities must be detached from its EntityManager first")]
    CrossCacheAttach {
        entity: EntityId,
        owner: ManagerId,
        target: ManagerId,
    },
    #[error("An entity with this key is already in the cache: {key}")]
    DuplicateKey { key: EntityKey },
    #[error("Cannot attach an entity of type '{entity_type}' without first setting its key or giving the type an auto-generated key")]
    MissingKey { entity_type: String },
    #[error("Temp key generation is not supported for multipart keys (type '{entity_type}')")]
    UnsupportedTempKeyForCompositeKey { entity_type: String },
    #[error("Cannot generate a temp key for '{entity_type}': key data type {data_type} has no temp key strategy")]
    UnsupportedTempKeyType {
        entity_type: String,
        data_type: DataType,
    },
    #[error("Collection navigation property '{property}' on '{entity_type}' cannot be assigned; mutate the collection instead")]
    IllegalNavigationAssignment {
        entity_type: String,
        property: String,
    },
    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("Unknown {0}")]
    UnknownManager(ManagerId),
    #[error("Unknown entity type '{0}'")]
    UnknownEntityType(String),
    #[error("Entity type '{entity_type}' has no property '{property}'")]
    UnknownProperty {
        entity_type: String,
        property: String,
    },
    #[error("Invalid value for '{entity_type}.{property}': {reason}")]
    InvalidPropertyValue {
        entity_type: String,
        property: String,
        reason: String,
    },
    #[error("Index {index} is out of range for navigation '{property}' of length {len}")]
    IndexOutOfRange {
        property: String,
        index: usize,
        len: usize,
    },
    #[error("Metadata error: {0}")]
    Metadata(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    pub(crate) fn detached(entity: EntityId, operation: &str) -> Self {
        CacheError::InvalidStateTransition {
            entity,
            from: EntityState::Detached,
            operation: operation.to_string(),
        }
    }

    pub(crate) fn invalid_value(
        entity_type: &str,
        property: &str,
        reason: impl Into<String>,
    ) -> Self {
        CacheError::InvalidPropertyValue {
            entity_type: entity_type.to_string(),
            property: property.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for CacheError {
    fn from(src: toml::de::Error) -> CacheError {
        CacheError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for CacheError {
    fn from(src: toml::ser::Error) -> CacheError {
        CacheError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for CacheError {
    fn from(src: JsonError) -> CacheError {
        CacheError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for CacheError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => CacheError::Io(format!("Not found: {x}")),
            _ => CacheError::Io(format!("IOError: {}", x.kind())),
        }
    }
}
