//! Client command parsing and validation
//!
//! Only `GET`, `SET` and `DEL` exist. Names are case-insensitive and the
//! arity counts the command name itself.

use bytes::Bytes;
use thiserror::Error;

use super::resp::Frame;

/// Validation failures, rendered as the text after `ERR `
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("Protocol error: expected an array of bulk strings")]
    InvalidRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Get { key: Bytes },
    Set { key: Bytes, value: Bytes },
    Del { key: Bytes },
}

/// Expected argument count (including the name) per command
fn arity(name: &str) -> Option<usize> {
    match name {
        "GET" => Some(2),
        "SET" => Some(3),
        "DEL" => Some(2),
        _ => None,
    }
}

impl ClientCommand {
    /// Validate a decoded request frame
    pub fn parse(frame: Frame) -> Result<Self, CommandError> {
        let Frame::Array(items) = frame else {
            return Err(CommandError::InvalidRequest);
        };
        let mut args = items
            .into_iter()
            .map(|item| match item {
                Frame::Bulk(b) => Ok(b),
                _ => Err(CommandError::InvalidRequest),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let Some(name_bytes) = args.first() else {
            return Err(CommandError::WrongArity(String::new()));
        };
        let name = String::from_utf8_lossy(name_bytes).into_owned();
        let upper = name.to_ascii_uppercase();

        let expected = arity(&upper).ok_or_else(|| CommandError::UnknownCommand(name.clone()))?;
        if args.len() != expected {
            return Err(CommandError::WrongArity(name));
        }

        let mut rest = args.drain(1..);
        let mut next = || rest.next().unwrap_or_default();
        Ok(match upper.as_str() {
            "GET" => ClientCommand::Get { key: next() },
            "SET" => {
                let key = next();
                ClientCommand::Set { key, value: next() }
            }
            _ => ClientCommand::Del { key: next() },
        })
    }

    /// True for commands that must go through consensus
    pub fn is_write(&self) -> bool {
        !matches!(self, ClientCommand::Get { .. })
    }
}
