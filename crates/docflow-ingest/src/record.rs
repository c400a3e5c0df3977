//! Record model flowing through the ingestion pipeline
//!
//! A [`Record`] maps field names to either a single scalar or an ordered
//! list of scalars. Single-valued fields stay single-valued until a caller
//! explicitly appends with [`Record::add_value`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field holding the record identifier used in logs and errors
pub const ID_FIELD: &str = "id";

/// Placeholder used in logs when a record has no identifier
pub const UNKNOWN_ID: &str = "<unidentified>";

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Borrow the text if this is a string scalar
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Integer(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

/// Value of a record field: one scalar, or several in insertion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(Scalar),
    Multi(Vec<Scalar>),
}

impl FieldValue {
    /// The scalar of a single-valued field
    pub fn as_single(&self) -> Option<&Scalar> {
        match self {
            FieldValue::Single(s) => Some(s),
            FieldValue::Multi(_) => None,
        }
    }

    /// All values, in order
    pub fn values(&self) -> &[Scalar] {
        match self {
            FieldValue::Single(s) => std::slice::from_ref(s),
            FieldValue::Multi(values) => values,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, FieldValue::Multi(_))
    }
}

impl From<Scalar> for FieldValue {
    fn from(value: Scalar) -> Self {
        FieldValue::Single(value)
    }
}

macro_rules! single_value_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::Single(Scalar::from(value))
                }
            }
        )*
    };
}

single_value_from!(&str, String, i64, f64);

/// Mutable field mapping handed from stage to stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Record::set_field`]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Replace the field with the given value
    ///
    /// Empty names are ignored and logged; no field may have an empty name.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        if name.is_empty() {
            tracing::debug!(record_id = %self.identifier(), "Ignoring field with empty name");
            return;
        }
        self.fields.insert(name, value.into());
    }

    /// Append a value, converting a single-valued field to multi-valued
    pub fn add_value(&mut self, name: impl Into<String>, value: impl Into<Scalar>) {
        let name = name.into();
        if name.is_empty() {
            return;
        }
        let value = value.into();
        match self.fields.remove(&name) {
            None => {
                self.fields.insert(name, FieldValue::Single(value));
            },
            Some(FieldValue::Single(existing)) => {
                self.fields.insert(name, FieldValue::Multi(vec![existing, value]));
            },
            Some(FieldValue::Multi(mut values)) => {
                values.push(value);
                self.fields.insert(name, FieldValue::Multi(values));
            },
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Text of a single-valued string field
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_single()?.as_str()
    }

    pub fn remove_field(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Identifier for logs and error attribution
    pub fn identifier(&self) -> String {
        match self.get(ID_FIELD) {
            Some(FieldValue::Single(id)) => id.to_string(),
            Some(FieldValue::Multi(ids)) if !ids.is_empty() => ids[0].to_string(),
            _ => UNKNOWN_ID.to_string(),
        }
    }
}
