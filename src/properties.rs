/// [crate::properties] contains the value-level building blocks shared by the metadata, the
/// entity records and the [crate::cache::EntityGraph]: identifiers, data types and data values.
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering as AtomicOrdering},
};

pub use uuid::Uuid;

use crate::error::CacheError;

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Entity handle
///
/// Identifies one entity record inside an [crate::cache::EntityGraph]. Handles are allocated from
/// a process-wide counter so a handle minted by one graph is never mistaken for an entity of
/// another graph; it is simply unknown there.
///
/// An `EntityId` is *not* the entity's key. Keys live in the entity's data properties and may
/// change (temp keys, key edits); the handle never does.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntityId(u64);

impl EntityId {
    pub(crate) fn next() -> Self {
        EntityId(NEXT_ENTITY_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one [crate::cache::EntityManager] (one cache) inside an
/// [crate::cache::EntityGraph].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ManagerId(Uuid);

impl ManagerId {
    pub(crate) fn new() -> Self {
        ManagerId(Uuid::new_v4())
    }
}

impl AsRef<Uuid> for ManagerId {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl Display for ManagerId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "EntityManager({})",
            &self.0.as_simple().encode_lower(&mut Uuid::encode_buffer())[..8]
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Double,
    String,
    Guid,
}

impl DataType {
    /// The value a non-nullable property of this type holds before anything is written to it.
    pub fn default_value(&self) -> DataValue {
        match self {
            DataType::Boolean => DataValue::Boolean(false),
            DataType::Int32 | DataType::Int64 => DataValue::Int(0),
            DataType::Double => DataValue::Double(0.0),
            DataType::String => DataValue::String(String::new()),
            DataType::Guid => DataValue::Guid(Uuid::nil()),
        }
    }

    /// Whether `value` may be stored in a property of this type. `Null` is accepted here;
    /// nullability is a property-level concern.
    pub fn accepts(&self, value: &DataValue) -> bool {
        match (self, value) {
            (_, DataValue::Null) => true,
            (DataType::Boolean, DataValue::Boolean(_)) => true,
            (DataType::Int32, DataValue::Int(v)) => i32::try_from(*v).is_ok(),
            (DataType::Int64, DataValue::Int(_)) => true,
            (DataType::Double, DataValue::Double(_)) => true,
            (DataType::String, DataValue::String(_)) => true,
            (DataType::Guid, DataValue::Guid(_)) => true,
            _ => false,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A scalar property value.
///
/// `Double` compares and hashes by bit pattern so that any `DataValue` can take part in an
/// [crate::entitykey::EntityKey].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum DataValue {
    #[default]
    Null,
    Boolean(bool),
    Int(i64),
    Double(f64),
    String(String),
    Guid(Uuid),
}

impl DataValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            DataValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            DataValue::Guid(v) => Some(*v),
            _ => None,
        }
    }

    fn discriminant(&self) -> u8 {
        match self {
            DataValue::Null => 0,
            DataValue::Boolean(_) => 1,
            DataValue::Int(_) => 2,
            DataValue::Double(_) => 3,
            DataValue::String(_) => 4,
            DataValue::Guid(_) => 5,
        }
    }
}

impl PartialEq for DataValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DataValue {}

impl PartialOrd for DataValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (DataValue::Null, DataValue::Null) => Ordering::Equal,
            (DataValue::Boolean(l), DataValue::Boolean(r)) => l.cmp(r),
            (DataValue::Int(l), DataValue::Int(r)) => l.cmp(r),
            (DataValue::Double(l), DataValue::Double(r)) => l.total_cmp(r),
            (DataValue::String(l), DataValue::String(r)) => l.cmp(r),
            (DataValue::Guid(l), DataValue::Guid(r)) => l.cmp(r),
            _ => self.discriminant().cmp(&other.discriminant()),
        }
    }
}

impl Hash for DataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discriminant().hash(state);
        match self {
            DataValue::Null => {}
            DataValue::Boolean(v) => v.hash(state),
            DataValue::Int(v) => v.hash(state),
            DataValue::Double(v) => v.to_bits().hash(state),
            DataValue::String(v) => v.hash(state),
            DataValue::Guid(v) => v.hash(state),
        }
    }
}

impl Display for DataValue {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            DataValue::Null => write!(f, "null"),
            DataValue::Boolean(v) => write!(f, "{v}"),
            DataValue::Int(v) => write!(f, "{v}"),
            DataValue::Double(v) => write!(f, "{v}"),
            DataValue::String(v) => write!(f, "{v:?}"),
            DataValue::Guid(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        DataValue::Boolean(v)
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        DataValue::Int(v.into())
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Int(v)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Double(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::String(v.to_string())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::String(v)
    }
}

impl From<Uuid> for DataValue {
    fn from(v: Uuid) -> Self {
        DataValue::Guid(v)
    }
}

impl<T: Into<DataValue>> From<Option<T>> for DataValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(DataValue::Null)
    }
}

impl TryFrom<&DataValue> for i64 {
    type Error = CacheError;

    fn try_from(value: &DataValue) -> Result<Self, Self::Error> {
        value
            .as_int()
            .ok_or_else(|| CacheError::Serialization(format!("{value} is not an integer")))
    }
}

/// The value of any property, data or navigation, as seen through the generic
/// `get_property`/`set_property` interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    Data(DataValue),
    /// A scalar navigation property: the related entity, if any.
    Entity(Option<EntityId>),
    /// A snapshot of a collection navigation property's members.
    Collection(Vec<EntityId>),
}

impl PropertyValue {
    pub fn as_data(&self) -> Option<&DataValue> {
        match self {
            PropertyValue::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<Option<EntityId>> {
        match self {
            PropertyValue::Entity(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<DataValue> for PropertyValue {
    fn from(v: DataValue) -> Self {
        PropertyValue::Data(v)
    }
}

impl From<Option<EntityId>> for PropertyValue {
    fn from(v: Option<EntityId>) -> Self {
        PropertyValue::Entity(v)
    }
}

impl From<EntityId> for PropertyValue {
    fn from(v: EntityId) -> Self {
        PropertyValue::Entity(Some(v))
    }
}

impl Display for PropertyValue {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            PropertyValue::Data(v) => write!(f, "{v}"),
            PropertyValue::Entity(Some(id)) => write!(f, "{id}"),
            PropertyValue::Entity(None) => write!(f, "none"),
            PropertyValue::Collection(ids) => write!(f, "[{} entities]", ids.len()),
        }
    }
}
