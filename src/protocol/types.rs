//! Result-set data model.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Named query parameters, substituted for `:name` tokens.
pub type Params = HashMap<String, Value>;

/// Column metadata reported by the worker in a `FIELDS` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    #[serde(rename = "Name")]
    pub name: String,
    /// ADO `DataTypeEnum` value.
    #[serde(rename = "Type")]
    pub type_code: u16,
    #[serde(rename = "Precision", default)]
    pub precision: u32,
    #[serde(rename = "NumericScale", default)]
    pub numeric_scale: u32,
}

impl Field {
    pub fn new(name: impl Into<String>, type_code: u16) -> Self {
        Self {
            name: name.into(),
            type_code,
            precision: 255,
            numeric_scale: 255,
        }
    }

    pub fn kind(&self) -> FieldKind {
        FieldKind::from_type_code(self.type_code)
    }
}

/// How a column's raw text is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    /// Exact numerics (currency, decimal, numeric), kept as text.
    Decimal,
    Boolean,
    DateTime,
    Text,
}

impl FieldKind {
    pub fn from_type_code(code: u16) -> Self {
        match code {
            // adSmallInt, adInteger, adTinyInt, adUnsignedTinyInt,
            // adUnsignedSmallInt, adUnsignedInt, adBigInt, adUnsignedBigInt
            2 | 3 | 16 | 17 | 18 | 19 | 20 | 21 => FieldKind::Integer,
            // adSingle, adDouble
            4 | 5 => FieldKind::Float,
            // adCurrency, adDecimal, adNumeric, adVarNumeric
            6 | 14 | 131 | 139 => FieldKind::Decimal,
            11 => FieldKind::Boolean,
            // adDate, adFileTime, adDBDate, adDBTime, adDBTimeStamp
            7 | 64 | 133 | 134 | 135 => FieldKind::DateTime,
            _ => FieldKind::Text,
        }
    }
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numeric in canonical form (`.` as decimal point).
    Decimal(String),
    Text(String),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Decimal(v) => v.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) | Value::Decimal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(v) | Value::Text(v) => f.write_str(v),
            Value::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Decimal(v) | Value::Text(v) => serializer.serialize_str(v),
            Value::DateTime(v) => {
                serializer.collect_str(&v.format("%Y-%m-%dT%H:%M:%S%.f"))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One row of a result set. Values are positional; names come from the
/// field list shared by every record of the same result.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Arc<[Field]>,
    values: Vec<Value>,
}

impl Record {
    pub(crate) fn new(fields: Arc<[Field]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(fields.len(), values.len());
        Self { fields, values }
    }

    /// Look up a value by field name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .map(|i| &self.values[i])
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(name, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.values.iter())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Records and field descriptors produced by one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    pub fields: Arc<[Field]>,
    pub records: Vec<Record>,
}

/// Session settings sent once per connection in the `LOCALS` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLocale {
    #[serde(rename = "sShortDate")]
    pub short_date_format: String,
    #[serde(rename = "sTimeFormat")]
    pub time_format: String,
    #[serde(rename = "sDecimal")]
    pub decimal_separator: String,
    #[serde(rename = "ACP", deserialize_with = "codepage")]
    pub ansi_codepage: u16,
    #[serde(rename = "OEMCP", deserialize_with = "codepage")]
    pub oem_codepage: u16,
}

impl Default for SessionLocale {
    fn default() -> Self {
        Self {
            short_date_format: "yyyy-MM-dd".to_string(),
            time_format: "HH:mm:ss".to_string(),
            decimal_separator: ".".to_string(),
            ansi_codepage: 1251,
            oem_codepage: 866,
        }
    }
}

/// Codepages arrive as numbers or as registry strings (`"1251"`).
fn codepage<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u16),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid codepage: {s}"))),
    }
}
