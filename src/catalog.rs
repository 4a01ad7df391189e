//! Attribute catalog: ids, display names, and descriptive tag lists.
//!
//! The catalog keeps attributes in input order; that order becomes the row
//! order of every affinity matrix built from it. When read from JSON the
//! object key order is preserved.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Attribute definition as it appears in the catalog JSON (keyed by id).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    #[serde(rename = "attribute_name", alias = "name", default)]
    pub name: String,
    #[serde(
        rename = "attribute_meta_tags",
        alias = "tags",
        default,
        deserialize_with = "lenient_tags"
    )]
    pub tags: Vec<String>,
    #[serde(
        rename = "attribute_definition",
        alias = "definition",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub definition: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub definition: Option<String>,
}

impl Attribute {
    pub fn new(id: impl Into<String>, name: impl Into<String>, tags: &[&str]) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            definition: None,
        }
    }

    fn from_record(id: String, record: AttributeRecord) -> Self {
        Self {
            id,
            name: record.name,
            tags: record.tags,
            definition: record.definition,
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("duplicate attribute id: {id}")]
    DuplicateId { id: String },
    #[error("failed to read attribute catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse attribute catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct AttributeCatalog {
    attributes: Vec<Attribute>,
    index: HashMap<String, usize>,
}

impl AttributeCatalog {
    pub fn new(attributes: Vec<Attribute>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(attributes.len());
        for (idx, attr) in attributes.iter().enumerate() {
            if index.insert(attr.id.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateId {
                    id: attr.id.clone(),
                });
            }
        }
        Ok(Self { attributes, index })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Attribute ids in input order (the canonical matrix row order).
    pub fn ids(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.attributes.iter().map(|a| a.id.as_str())
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Attribute> + '_ {
        self.attributes.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Attribute> {
        self.index.get(id).map(|&idx| &self.attributes[idx])
    }

    /// Tags for `id`; empty when the attribute is unknown or has none.
    pub fn tags_of(&self, id: &str) -> &[String] {
        self.get(id).map(|a| a.tags.as_slice()).unwrap_or(&[])
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.get(id).map(|a| a.name.as_str())
    }

    /// Total tag occurrences across all attributes (duplicates counted).
    pub fn tag_count(&self) -> usize {
        self.attributes.iter().map(|a| a.tags.len()).sum()
    }
}

impl<'de> Deserialize<'de> for AttributeCatalog {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CatalogVisitor;

        impl<'de> Visitor<'de> for CatalogVisitor {
            type Value = AttributeCatalog;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping attribute id to attribute definition")
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut attributes = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((id, record)) = map.next_entry::<String, AttributeRecord>()? {
                    attributes.push(Attribute::from_record(id, record));
                }
                AttributeCatalog::new(attributes).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_map(CatalogVisitor)
    }
}

/// Accepts a list of tags of any scalar type; anything else becomes empty.
fn lenient_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect())
}
