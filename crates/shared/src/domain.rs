use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(EntityId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Beverage,
    Producer,
    Region,
    Varietal,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Beverage,
        EntityKind::Producer,
        EntityKind::Region,
        EntityKind::Varietal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Beverage => "beverage",
            EntityKind::Producer => "producer",
            EntityKind::Region => "region",
            EntityKind::Varietal => "varietal",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lower = raw.trim().to_ascii_lowercase();
        let lower = lower.strip_suffix('s').unwrap_or(&lower);
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| format!("unknown entity kind '{raw}'"))
    }
}

/// What a search is run against: the free-text index or a single entity page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SearchScope {
    #[default]
    FreeText,
    Entity { kind: EntityKind, id: EntityId },
}

impl SearchScope {
    pub fn entity(kind: EntityKind, id: impl Into<String>) -> Self {
        SearchScope::Entity {
            kind,
            id: EntityId(id.into()),
        }
    }

    pub fn entity_id(&self) -> Option<&EntityId> {
        match self {
            SearchScope::FreeText => None,
            SearchScope::Entity { id, .. } => Some(id),
        }
    }

    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            SearchScope::FreeText => None,
            SearchScope::Entity { kind, .. } => Some(*kind),
        }
    }
}

/// A single filter toggle as selected in the UI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveFilter {
    pub field: String,
    pub value: String,
}

impl ActiveFilter {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

impl FromStr for ActiveFilter {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (field, value) = raw
            .split_once('=')
            .ok_or_else(|| format!("filter '{raw}' must look like field=value"))?;
        let (field, value) = (field.trim(), value.trim());
        if field.is_empty() || value.is_empty() {
            return Err(format!("filter '{raw}' has an empty field or value"));
        }
        Ok(Self::new(field, value))
    }
}

/// A filter as the backend expects it: one field, any of its values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub field: String,
    pub direction: SortDirection,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (field, direction) = match raw.split_once(':') {
            Some((field, direction)) => (field.trim(), direction.trim()),
            None => (raw.trim(), "asc"),
        };
        if field.is_empty() {
            return Err(format!("sort '{raw}' has an empty field"));
        }
        let direction = if direction.eq_ignore_ascii_case("asc") {
            SortDirection::Asc
        } else if direction.eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            return Err(format!("sort direction '{direction}' must be asc or desc"));
        };
        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// One search hit. Only the id is interpreted; everything else is carried through.
///
/// The id is read from `entityUuid`, falling back to `id`; both keys are
/// consumed so a hit carrying both still decodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ResultItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            attributes: Map::new(),
        }
    }
}

impl<'de> Deserialize<'de> for ResultItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut attributes = Map::<String, Value>::deserialize(deserializer)?;
        let entity_uuid = attributes.remove("entityUuid").filter(|v| !v.is_null());
        let plain_id = attributes.remove("id").filter(|v| !v.is_null());

        let id = match entity_uuid.or(plain_id) {
            Some(Value::String(id)) => id,
            Some(Value::Number(id)) => id.to_string(),
            Some(other) => {
                return Err(de::Error::custom(format!(
                    "result id must be a string or number, got {other}"
                )))
            }
            None => return Err(de::Error::missing_field("entityUuid")),
        };
        let name = match attributes.remove("name") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name),
            Some(other) => {
                return Err(de::Error::custom(format!(
                    "result name must be a string, got {other}"
                )))
            }
        };

        Ok(Self {
            id,
            name,
            attributes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityDetail {
    pub entity_match: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buying_modalities: Option<Value>,
    #[serde(default)]
    pub similar: Vec<ResultItem>,
    #[serde(default)]
    pub curated_collections: Vec<ResultItem>,
}

/// Normalised output of one fetch, whatever the backend response looked like.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageResult {
    pub page: Vec<ResultItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_results: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_detail: Option<EntityDetail>,
}

impl PageResult {
    pub fn from_items(page: Vec<ResultItem>) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
