use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum ClusterInfoError {
    #[error("The cluster record is not valid: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Registration record of one downstream cluster, as kept in the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ClusterInfo {
    /// Identity discovered from the downstream cluster itself.
    #[schema(example = "5c0b3f52-5a5d-4b4c-9b7e-1f3c1b2a9d10")]
    pub id: String,
    /// Routing key assigned to the cluster.
    #[schema(example = "prod")]
    pub code: String,
    /// Serialized kubeconfig used to reach the cluster, base64 encoded in JSON.
    #[serde(
        alias = "kubeconfig",
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64"
    )]
    #[schema(value_type = String, format = Byte)]
    pub credentials: Vec<u8>,
}

impl ClusterInfo {
    pub fn from_bytes(bytes: &[u8]) -> Result<ClusterInfo, ClusterInfoError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ClusterInfoError> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn serialize_base64<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
}

fn deserialize_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    BASE64_STANDARD
        .decode(encoded)
        .map_err(serde::de::Error::custom)
}
