//! Named-field state records exchanged by the synchroniser.

use serde::{Deserialize, Serialize};

use cadence_message::EntityKey;

use crate::error::{SyncError, SyncResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SyncValue {
    Bool(bool),
    Int(i64),
    #[serde(rename = "uint")]
    UInt(u64),
    Float(f32),
    Double(f64),
    Key(Option<EntityKey>),
    List(Vec<SyncValue>),
    Record(StateRecord),
}

impl SyncValue {
    fn type_name(&self) -> &'static str {
        match self {
            SyncValue::Bool(_) => "bool",
            SyncValue::Int(_) => "int",
            SyncValue::UInt(_) => "uint",
            SyncValue::Float(_) => "float",
            SyncValue::Double(_) => "double",
            SyncValue::Key(_) => "key",
            SyncValue::List(_) => "list",
            SyncValue::Record(_) => "record",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncField {
    pub name: String,
    pub value: SyncValue,
}

/// Ordered set of named fields describing one component's state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    name: String,
    #[serde(default)]
    fields: Vec<SyncField>,
}

macro_rules! typed_getter {
    ($fn_name:ident, $variant:ident, $ty:ty, $expected:literal) => {
        pub fn $fn_name(&self, field: &str) -> SyncResult<$ty> {
            match self.require(field)? {
                SyncValue::$variant(v) => Ok(*v),
                other => Err(self.wrong_type(field, other, $expected)),
            }
        }
    };
}

impl StateRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[SyncField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set `field`, replacing an existing value in place.
    pub fn set(&mut self, field: &str, value: SyncValue) {
        match self.fields.iter_mut().find(|f| f.name == field) {
            Some(f) => f.value = value,
            None => self.fields.push(SyncField {
                name: field.to_string(),
                value,
            }),
        }
    }

    pub fn get(&self, field: &str) -> Option<&SyncValue> {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| &f.value)
    }

    fn require(&self, field: &str) -> SyncResult<&SyncValue> {
        self.get(field).ok_or_else(|| SyncError::MissingField {
            record: self.name.clone(),
            field: field.to_string(),
        })
    }

    fn wrong_type(&self, field: &str, found: &SyncValue, expected: &'static str) -> SyncError {
        tracing::trace!(
            target: "cadence::sync",
            record = %self.name,
            field,
            found = found.type_name(),
            expected,
            "field type mismatch"
        );
        SyncError::WrongType {
            field: field.to_string(),
            expected,
        }
    }

    typed_getter!(bool, Bool, bool, "bool");
    typed_getter!(int, Int, i64, "int");
    typed_getter!(uint, UInt, u64, "uint");
    typed_getter!(float, Float, f32, "float");
    typed_getter!(double, Double, f64, "double");
    typed_getter!(key, Key, Option<EntityKey>, "key");

    pub fn list(&self, field: &str) -> SyncResult<&[SyncValue]> {
        match self.require(field)? {
            SyncValue::List(v) => Ok(v),
            other => Err(self.wrong_type(field, other, "list")),
        }
    }

    pub fn record(&self, field: &str) -> SyncResult<&StateRecord> {
        match self.require(field)? {
            SyncValue::Record(r) => Ok(r),
            other => Err(self.wrong_type(field, other, "record")),
        }
    }

    /// Like [`StateRecord::float`], but an absent field reads as `None`.
    pub fn opt_float(&self, field: &str) -> SyncResult<Option<f32>> {
        match self.get(field) {
            None => Ok(None),
            Some(_) => self.float(field).map(Some),
        }
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
