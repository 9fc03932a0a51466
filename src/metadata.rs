//! Schema descriptions consumed by the cache.
//!
//! A [MetadataStore] is built once, up front, through [MetadataBuilder] and then shared
//! (`Arc`) by every [crate::cache::EntityGraph] that uses it. Relationships are declared as
//! [Association]s; the builder derives each side's [NavigationProperty] from them so the two
//! descriptors of one relationship can never disagree.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::CacheError,
    properties::{DataType, DataValue},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoGeneratedKeyType {
    /// The caller must supply every key value.
    #[default]
    None,
    /// The store assigns the key on save; a temp key stands in until then.
    Identity,
    /// A client-side generator assigns the key; a temp key stands in until then.
    KeyGenerator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProperty {
    pub name: String,
    pub data_type: DataType,
    pub is_nullable: bool,
    pub is_part_of_key: bool,
    pub default_value: DataValue,
}

impl DataProperty {
    /// A key value is unset when it is null or still holds the property default. Only an Added
    /// entity's own key is judged this way; foreign keys are unset only when null.
    pub fn is_empty_value(&self, value: &DataValue) -> bool {
        value.is_null() || *value == self.default_value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationProperty {
    pub name: String,
    /// Name of the related entity type.
    pub entity_type_name: String,
    /// `true` for the "one" end seen from the child (a reference), `false` for the collection
    /// end seen from the parent.
    pub is_scalar: bool,
    /// Name of the navigation property on the other end, if the relationship is bidirectional.
    pub inverse: Option<String>,
    /// FK property names on the child type.
    pub foreign_key_names: Vec<String>,
    /// Index into [MetadataStore::associations].
    pub association: usize,
}

/// One one-to-many relationship.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Association {
    pub name: String,
    pub parent_type: String,
    pub child_type: String,
    pub parent_navigation: Option<String>,
    pub child_navigation: Option<String>,
    pub foreign_keys: Vec<String>,
    #[serde(skip)]
    pub(crate) resolved: ResolvedAssociation,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ResolvedAssociation {
    pub(crate) parent_type: usize,
    pub(crate) child_type: usize,
    pub(crate) parent_navigation: Option<usize>,
    pub(crate) child_navigation: Option<usize>,
    pub(crate) foreign_keys: Vec<usize>,
}

impl Association {
    pub fn new<I, S>(name: &str, parent_type: &str, child_type: &str, foreign_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Association {
            name: name.to_string(),
            parent_type: parent_type.to_string(),
            child_type: child_type.to_string(),
            parent_navigation: None,
            child_navigation: None,
            foreign_keys: foreign_keys.into_iter().map(Into::into).collect(),
            resolved: ResolvedAssociation::default(),
        }
    }

    /// Name the collection navigation on the parent type.
    pub fn parent_navigation(mut self, name: &str) -> Self {
        self.parent_navigation = Some(name.to_string());
        self
    }

    /// Name the scalar navigation on the child type.
    pub fn child_navigation(mut self, name: &str) -> Self {
        self.child_navigation = Some(name.to_string());
        self
    }
}

/// Resolves a property name on an [EntityType].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyRef {
    Data(usize),
    Navigation(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityType {
    pub name: String,
    pub auto_generated_key_type: AutoGeneratedKeyType,
    pub data_properties: Vec<DataProperty>,
    pub navigation_properties: Vec<NavigationProperty>,
    #[serde(skip)]
    pub(crate) key_properties: Vec<usize>,
    /// Associations in which this type is the child (holds the FK).
    #[serde(skip)]
    pub(crate) child_associations: Vec<usize>,
    /// Associations in which this type is the parent (owns the collection).
    #[serde(skip)]
    pub(crate) parent_associations: Vec<usize>,
    /// Data property index -> associations that use it as a FK.
    #[serde(skip)]
    pub(crate) foreign_key_associations: BTreeMap<usize, Vec<usize>>,
}

impl EntityType {
    pub fn key_properties(&self) -> impl Iterator<Item = &DataProperty> {
        self.key_properties
            .iter()
            .map(move |idx| &self.data_properties[*idx])
    }

    pub fn has_composite_key(&self) -> bool {
        self.key_properties.len() > 1
    }

    pub fn property(&self, name: &str) -> Option<PropertyRef> {
        if let Some(idx) = self.data_properties.iter().position(|p| p.name == name) {
            return Some(PropertyRef::Data(idx));
        }
        self.navigation_properties
            .iter()
            .position(|p| p.name == name)
            .map(PropertyRef::Navigation)
    }

    pub fn data_property(&self, name: &str) -> Option<&DataProperty> {
        self.data_properties.iter().find(|p| p.name == name)
    }

    pub fn navigation_property(&self, name: &str) -> Option<&NavigationProperty> {
        self.navigation_properties.iter().find(|p| p.name == name)
    }

    pub(crate) fn resolve(&self, name: &str) -> Result<PropertyRef, CacheError> {
        self.property(name).ok_or_else(|| CacheError::UnknownProperty {
            entity_type: self.name.clone(),
            property: name.to_string(),
        })
    }

    pub(crate) fn is_key_property(&self, idx: usize) -> bool {
        self.data_properties[idx].is_part_of_key
    }

    pub(crate) fn initial_values(&self) -> Vec<DataValue> {
        self.data_properties
            .iter()
            .map(|p| p.default_value.clone())
            .collect()
    }
}

/// Builder for one [EntityType].
#[derive(Debug, Clone)]
pub struct EntityTypeBuilder {
    name: String,
    auto_generated_key_type: AutoGeneratedKeyType,
    properties: Vec<(String, DataType, bool, bool)>,
}

impl EntityTypeBuilder {
    pub fn new(name: &str) -> Self {
        EntityTypeBuilder {
            name: name.to_string(),
            auto_generated_key_type: AutoGeneratedKeyType::None,
            properties: vec![],
        }
    }

    /// Append a key property. Key properties are never nullable; call repeatedly for a
    /// composite key, in key order.
    pub fn key(mut self, name: &str, data_type: DataType) -> Self {
        self.properties
            .push((name.to_string(), data_type, false, true));
        self
    }

    pub fn property(mut self, name: &str, data_type: DataType) -> Self {
        self.properties
            .push((name.to_string(), data_type, false, false));
        self
    }

    pub fn nullable(mut self, name: &str, data_type: DataType) -> Self {
        self.properties
            .push((name.to_string(), data_type, true, false));
        self
    }

    pub fn auto_generated(mut self, kind: AutoGeneratedKeyType) -> Self {
        self.auto_generated_key_type = kind;
        self
    }

    fn build(self) -> Result<EntityType, CacheError> {
        let mut seen = BTreeSet::new();
        let mut data_properties = Vec::with_capacity(self.properties.len());
        let mut key_properties = vec![];
        for (idx, (name, data_type, is_nullable, is_part_of_key)) in
            self.properties.into_iter().enumerate()
        {
            if !seen.insert(name.clone()) {
                return Err(CacheError::Metadata(format!(
                    "'{}' declares property '{name}' twice",
                    self.name
                )));
            }
            if is_part_of_key {
                key_properties.push(idx);
            }
            let default_value = if is_nullable {
                DataValue::Null
            } else {
                data_type.default_value()
            };
            data_properties.push(DataProperty {
                name,
                data_type,
                is_nullable,
                is_part_of_key,
                default_value,
            });
        }
        if key_properties.is_empty() {
            return Err(CacheError::Metadata(format!(
                "'{}' has no key properties",
                self.name
            )));
        }
        if self.auto_generated_key_type != AutoGeneratedKeyType::None && key_properties.len() > 1
        {
            return Err(CacheError::Metadata(format!(
                "'{}' has a multipart key and cannot use auto-generated keys",
                self.name
            )));
        }
        Ok(EntityType {
            name: self.name,
            auto_generated_key_type: self.auto_generated_key_type,
            data_properties,
            navigation_properties: vec![],
            key_properties,
            child_associations: vec![],
            parent_associations: vec![],
            foreign_key_associations: BTreeMap::new(),
        })
    }
}

#[derive(Debug, Default)]
pub struct MetadataBuilder {
    types: Vec<EntityTypeBuilder>,
    associations: Vec<Association>,
}

impl MetadataBuilder {
    pub fn entity_type(mut self, builder: EntityTypeBuilder) -> Self {
        self.types.push(builder);
        self
    }

    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    pub fn build(self) -> Result<MetadataStore, CacheError> {
        let mut types = Vec::with_capacity(self.types.len());
        let mut by_name = BTreeMap::new();
        for builder in self.types {
            let entity_type = builder.build()?;
            if by_name
                .insert(entity_type.name.clone(), types.len())
                .is_some()
            {
                return Err(CacheError::Metadata(format!(
                    "entity type '{}' is declared twice",
                    entity_type.name
                )));
            }
            types.push(entity_type);
        }

        let mut associations = Vec::with_capacity(self.associations.len());
        for (assoc_idx, mut assoc) in self.associations.into_iter().enumerate() {
            let parent_idx = *by_name
                .get(&assoc.parent_type)
                .ok_or_else(|| CacheError::UnknownEntityType(assoc.parent_type.clone()))?;
            let child_idx = *by_name
                .get(&assoc.child_type)
                .ok_or_else(|| CacheError::UnknownEntityType(assoc.child_type.clone()))?;
            if assoc.parent_navigation.is_none() && assoc.child_navigation.is_none() {
                return Err(CacheError::Metadata(format!(
                    "association '{}' declares no navigation property",
                    assoc.name
                )));
            }

            let parent_key: Vec<DataType> = types[parent_idx]
                .key_properties()
                .map(|p| p.data_type)
                .collect();
            if parent_key.len() != assoc.foreign_keys.len() {
                return Err(CacheError::Metadata(format!(
                    "association '{}' has {} foreign keys but '{}' has {} key properties",
                    assoc.name,
                    assoc.foreign_keys.len(),
                    assoc.parent_type,
                    parent_key.len()
                )));
            }
            let mut fk_indices = vec![];
            for (fk_name, key_type) in assoc.foreign_keys.iter().zip(parent_key.iter()) {
                let child = &types[child_idx];
                let fk_idx = child
                    .data_properties
                    .iter()
                    .position(|p| &p.name == fk_name)
                    .ok_or_else(|| CacheError::UnknownProperty {
                        entity_type: child.name.clone(),
                        property: fk_name.clone(),
                    })?;
                if !same_key_domain(child.data_properties[fk_idx].data_type, *key_type) {
                    return Err(CacheError::Metadata(format!(
                        "foreign key '{}.{fk_name}' is {} but the key it references is {key_type}",
                        child.name, child.data_properties[fk_idx].data_type
                    )));
                }
                fk_indices.push(fk_idx);
            }

            let parent_nav_idx = match &assoc.parent_navigation {
                Some(name) => Some(push_navigation(
                    &mut types[parent_idx],
                    NavigationProperty {
                        name: name.clone(),
                        entity_type_name: assoc.child_type.clone(),
                        is_scalar: false,
                        inverse: assoc.child_navigation.clone(),
                        foreign_key_names: assoc.foreign_keys.clone(),
                        association: assoc_idx,
                    },
                )?),
                None => None,
            };
            let child_nav_idx = match &assoc.child_navigation {
                Some(name) => Some(push_navigation(
                    &mut types[child_idx],
                    NavigationProperty {
                        name: name.clone(),
                        entity_type_name: assoc.parent_type.clone(),
                        is_scalar: true,
                        inverse: assoc.parent_navigation.clone(),
                        foreign_key_names: assoc.foreign_keys.clone(),
                        association: assoc_idx,
                    },
                )?),
                None => None,
            };

            types[parent_idx].parent_associations.push(assoc_idx);
            let child = &mut types[child_idx];
            child.child_associations.push(assoc_idx);
            for fk_idx in fk_indices.iter() {
                child
                    .foreign_key_associations
                    .entry(*fk_idx)
                    .or_default()
                    .push(assoc_idx);
            }

            assoc.resolved = ResolvedAssociation {
                parent_type: parent_idx,
                child_type: child_idx,
                parent_navigation: parent_nav_idx,
                child_navigation: child_nav_idx,
                foreign_keys: fk_indices,
            };
            associations.push(assoc);
        }

        tracing::debug!(
            "[MetadataBuilder::build] {} entity types, {} associations",
            types.len(),
            associations.len()
        );
        Ok(MetadataStore {
            types,
            by_name,
            associations,
        })
    }
}

fn same_key_domain(lhs: DataType, rhs: DataType) -> bool {
    let int = |t: DataType| matches!(t, DataType::Int32 | DataType::Int64);
    lhs == rhs || (int(lhs) && int(rhs))
}

fn push_navigation(
    entity_type: &mut EntityType,
    navigation: NavigationProperty,
) -> Result<usize, CacheError> {
    if entity_type.property(&navigation.name).is_some() {
        return Err(CacheError::Metadata(format!(
            "'{}' already has a property named '{}'",
            entity_type.name, navigation.name
        )));
    }
    entity_type.navigation_properties.push(navigation);
    Ok(entity_type.navigation_properties.len() - 1)
}

/// The schema for every entity type a cache can hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataStore {
    types: Vec<EntityType>,
    by_name: BTreeMap<String, usize>,
    associations: Vec<Association>,
}

impl MetadataStore {
    pub fn builder() -> MetadataBuilder {
        MetadataBuilder::default()
    }

    pub fn entity_type(&self, name: &str) -> Result<&EntityType, CacheError> {
        self.type_index(name).map(|idx| &self.types[idx])
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.types.iter()
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    /// Pretty JSON snapshot of the resolved schema, navigation descriptors included.
    pub fn to_json(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub(crate) fn type_index(&self, name: &str) -> Result<usize, CacheError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| CacheError::UnknownEntityType(name.to_string()))
    }

    pub(crate) fn type_at(&self, idx: usize) -> &EntityType {
        &self.types[idx]
    }

    pub(crate) fn association(&self, idx: usize) -> &Association {
        &self.associations[idx]
    }
}
