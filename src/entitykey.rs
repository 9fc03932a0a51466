/// [crate::entitykey] contains [EntityKey], the identity-map key of a tracked entity.
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::properties::DataValue;

/// Identifies an entity instance by its type name and its ordered key-property values.
///
/// Equality is structural. A key never changes in place: when a key property is edited the
/// entity is re-indexed under a freshly built key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct EntityKey {
    entity_type: String,
    values: Vec<DataValue>,
}

impl EntityKey {
    pub fn new<S, I, V>(entity_type: S, values: I) -> EntityKey
    where
        S: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<DataValue>,
    {
        EntityKey {
            entity_type: entity_type.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn values(&self) -> &[DataValue] {
        &self.values
    }

    pub fn is_composite(&self) -> bool {
        self.values.len() > 1
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let values = self
            .values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}:({})", self.entity_type, values)
    }
}
