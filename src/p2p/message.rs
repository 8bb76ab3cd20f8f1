//! Protocol messages

use super::P2PError;

use chrono::{DateTime, Utc};
use libp2p::PeerId;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Message type, used as the key of the dispatch table
///
/// Names not known to this node decode to [`MsgType::Unknown`] so the
/// receive loop can reject them instead of failing to decode the frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MsgType {
    Ping,
    Profile,
    DatasetInfo,
    DatasetsList,
    Events,
    Connected,
    ResolveDatasetRef,
    DatasetLog,
    QriPeers,
    Unknown(String),
}

impl MsgType {
    pub fn as_str(&self) -> &str {
        match self {
            MsgType::Ping => "ping",
            MsgType::Profile => "profile",
            MsgType::DatasetInfo => "dataset_info",
            MsgType::DatasetsList => "datasets",
            MsgType::Events => "events",
            MsgType::Connected => "connected",
            MsgType::ResolveDatasetRef => "resolve_dataset_ref",
            MsgType::DatasetLog => "dataset_log",
            MsgType::QriPeers => "qri_peers",
            MsgType::Unknown(name) => name,
        }
    }
}

impl From<String> for MsgType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "ping" => MsgType::Ping,
            "profile" => MsgType::Profile,
            "dataset_info" => MsgType::DatasetInfo,
            "datasets" => MsgType::DatasetsList,
            "events" => MsgType::Events,
            "connected" => MsgType::Connected,
            "resolve_dataset_ref" => MsgType::ResolveDatasetRef,
            "dataset_log" => MsgType::DatasetLog,
            "qri_peers" => MsgType::QriPeers,
            _ => MsgType::Unknown(name),
        }
    }
}

impl From<MsgType> for String {
    fn from(t: MsgType) -> Self {
        match t {
            MsgType::Unknown(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed envelope exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Shared by a request and all of its replies
    pub id: String,

    pub created: DateTime<Utc>,

    /// Peer that started the exchange
    pub initiator: PeerId,

    #[serde(rename = "type")]
    pub msg_type: MsgType,

    #[serde(default)]
    pub body: serde_json::Value,

    /// Sender closes the stream after this message
    #[serde(default)]
    pub hang_up: bool,
}

impl Message {
    pub fn new(initiator: PeerId, msg_type: MsgType, body: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created: Utc::now(),
            initiator,
            msg_type,
            body,
            hang_up: false,
        }
    }

    /// Build a message from any serializable body
    pub fn encode<T: Serialize>(
        initiator: PeerId,
        msg_type: MsgType,
        body: &T,
    ) -> Result<Self, P2PError> {
        let body = serde_json::to_value(body).map_err(|e| P2PError::Codec(e.to_string()))?;
        Ok(Self::new(initiator, msg_type, body))
    }

    /// Reply to this message: same id, initiator and type, new body
    pub fn update(&self, body: serde_json::Value) -> Self {
        Self {
            id: self.id.clone(),
            created: Utc::now(),
            initiator: self.initiator,
            msg_type: self.msg_type.clone(),
            body,
            hang_up: false,
        }
    }

    /// Serializing variant of [`Message::update`]
    pub fn reply<T: Serialize + ?Sized>(&self, body: &T) -> Result<Self, P2PError> {
        let body = serde_json::to_value(body).map_err(|e| P2PError::Codec(e.to_string()))?;
        Ok(self.update(body))
    }

    pub fn with_hang_up(mut self) -> Self {
        self.hang_up = true;
        self
    }

    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, P2PError> {
        serde_json::from_value(self.body.clone()).map_err(|e| P2PError::Codec(e.to_string()))
    }

    /// True when `local` started the exchange this message belongs to
    pub fn is_reply_for(&self, local: &PeerId) -> bool {
        self.initiator == *local
    }
}
