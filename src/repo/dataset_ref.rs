//! Dataset references and the repository event log

use super::ProfileId;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pointer to one version of a dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatasetRef {
    pub peername: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<ProfileId>,

    pub name: String,

    /// Store path of this version
    pub path: String,

    /// Store path of the version this one replaces
    #[serde(skip_serializing_if = "String::is_empty")]
    pub previous: String,

    pub published: bool,

    /// Opaque dataset descriptor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<serde_json::Value>,
}

impl DatasetRef {
    pub fn new(peername: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            peername: peername.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// `peername/name`
    pub fn alias(&self) -> String {
        format!("{}/{}", self.peername, self.name)
    }

    pub fn is_empty(&self) -> bool {
        self.peername.is_empty() && self.name.is_empty() && self.path.is_empty()
    }

}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.alias())?;
        if !self.path.is_empty() {
            write!(f, "@{}", self.path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DatasetCreated,
    DatasetUpdated,
}

/// Entry in the repository event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(rename = "ref")]
    pub reference: DatasetRef,
}
