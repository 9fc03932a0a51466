//! Temp key generation.
//!
//! Newly added entities whose store assigns the real key get a placeholder ("temp") key so they
//! can be indexed and referenced by FK before they are saved. Integer temp keys are negative and
//! drawn from one process-wide counter, so two caches never hand out the same temp value.

use std::{
    collections::BTreeSet,
    sync::atomic::{AtomicI64, Ordering},
};

use crate::{
    entitykey::EntityKey,
    error::CacheError,
    metadata::EntityType,
    properties::{DataType, DataValue, Uuid},
};

static NEXT_TEMP_INT: AtomicI64 = AtomicI64::new(-1);

#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    string_prefix: String,
    issued: BTreeSet<EntityKey>,
}

impl KeyGenerator {
    pub fn new(string_prefix: &str) -> Self {
        KeyGenerator {
            string_prefix: string_prefix.to_string(),
            issued: BTreeSet::new(),
        }
    }

    /// Produce a temp value for the single key property of `entity_type`.
    ///
    /// Composite keys are rejected before anything is generated.
    pub fn generate(&mut self, entity_type: &EntityType) -> Result<DataValue, CacheError> {
        if entity_type.has_composite_key() {
            return Err(CacheError::UnsupportedTempKeyForCompositeKey {
                entity_type: entity_type.name.clone(),
            });
        }
        let Some(key_property) = entity_type.key_properties().next() else {
            return Err(CacheError::Metadata(format!(
                "'{}' has no key property",
                entity_type.name
            )));
        };
        let value = match key_property.data_type {
            DataType::Int32 | DataType::Int64 => {
                DataValue::Int(NEXT_TEMP_INT.fetch_sub(1, Ordering::Relaxed))
            }
            DataType::Guid => DataValue::Guid(Uuid::new_v4()),
            DataType::String => DataValue::String(format!(
                "{}{}",
                self.string_prefix,
                Uuid::new_v4().as_simple()
            )),
            data_type => {
                return Err(CacheError::UnsupportedTempKeyType {
                    entity_type: entity_type.name.clone(),
                    data_type,
                })
            }
        };
        tracing::trace!(
            "[KeyGenerator::generate] {}.{} <- {value}",
            entity_type.name,
            key_property.name
        );
        self.issued
            .insert(EntityKey::new(entity_type.name.clone(), [value.clone()]));
        Ok(value)
    }

    /// Whether `key` was handed out by this generator and is still in use as a temp key.
    pub fn is_temp_key(&self, key: &EntityKey) -> bool {
        self.issued.contains(key)
    }

    pub fn temp_keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.issued.iter()
    }

    pub(crate) fn forget(&mut self, key: &EntityKey) -> bool {
        self.issued.remove(key)
    }

    pub(crate) fn remember(&mut self, key: EntityKey) {
        self.issued.insert(key);
    }

    pub(crate) fn clear(&mut self) {
        self.issued.clear();
    }
}
