//! Replicated command encoding
//!
//! A `Command` is the unit of mutation carried in `EntryPayload::Command`.
//! It is JSON encoded; decoding is strict so that every node either applies
//! the same mutation or rejects the same payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub op: Op,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub key: Vec<u8>,
    #[serde(
        default,
        with = "crate::encoding::base64_bytes_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid encoding: {0}")]
    Json(String),
    #[error("put command without a value")]
    MissingValue,
    #[error("delete command with a value")]
    UnexpectedValue,
}

impl Command {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Command {
            op: Op::Put,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Command {
            op: Op::Delete,
            key: key.into(),
            value: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Serializing plain structs of bytes into a Vec cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let command: Command =
            serde_json::from_slice(payload).map_err(|e| DecodeError::Json(e.to_string()))?;
        match (command.op, &command.value) {
            (Op::Put, None) => Err(DecodeError::MissingValue),
            (Op::Delete, Some(_)) => Err(DecodeError::UnexpectedValue),
            _ => Ok(command),
        }
    }
}
