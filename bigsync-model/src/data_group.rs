//! Data-group documents
//!
//! A data-group is an ordered list of name/value records with a type tag. Locally it
//! is stored as a JSON document shaped like the device representation so that the
//! same bytes can be written from a GET response and sent back on PATCH.

use serde::{Deserialize, Serialize};

use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataGroupType {
    #[default]
    String,
    Ip,
    Integer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataGroupRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl DataGroupRecord {
    pub fn new(name: impl Into<String>, data: Option<String>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataGroup {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(rename = "type", default)]
    pub group_type: DataGroupType,
    #[serde(default)]
    pub records: Vec<DataGroupRecord>,
}

impl DataGroup {
    pub fn new(
        name: impl Into<String>,
        partition: Option<String>,
        group_type: DataGroupType,
    ) -> Self {
        Self {
            name: name.into(),
            partition,
            group_type,
            records: Vec::new(),
        }
    }

    /// Insert or update a record, keeping insertion order for new names
    pub fn upsert(&mut self, name: &str, data: Option<String>) {
        match self.records.iter_mut().find(|r| r.name == name) {
            Some(record) => record.data = data,
            None => self.records.push(DataGroupRecord::new(name, data)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<DataGroupRecord> {
        let index = self.records.iter().position(|r| r.name == name)?;
        Some(self.records.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<&DataGroupRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Body for PATCH: only the mutable part of the document
    pub fn records_body(&self) -> serde_json::Value {
        serde_json::json!({ "records": self.records })
    }
}
