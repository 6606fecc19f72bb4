//! Node ID -> client address mapping kept in the stable store

use super::ClusterError;
use crate::storage::StableStore;

/// Reserved key prefix; the node ID follows it verbatim
pub const CLIENT_ADDR_PREFIX: &str = "__client_addr/";

fn key_for(node_id: &str) -> Vec<u8> {
    format!("{}{}", CLIENT_ADDR_PREFIX, node_id).into_bytes()
}

pub fn set_client_addr(stable: &dyn StableStore, node_id: &str, addr: &str) -> Result<(), ClusterError> {
    stable.set(&key_for(node_id), addr.as_bytes())?;
    Ok(())
}

/// Look up the client address of `node_id`
pub fn client_addr(stable: &dyn StableStore, node_id: &str) -> Result<String, ClusterError> {
    let raw = stable
        .get(&key_for(node_id))?
        .ok_or_else(|| ClusterError::UnknownNode(node_id.to_string()))?;
    String::from_utf8(raw).map_err(|_| ClusterError::InvalidAddress(node_id.to_string()))
}
