//! Default serializer: MessagePack payloads, xxh3-128 conflict hashes

use crate::error::Result;
use crate::traits::Serializer;
use crate::types::ConflictHash;
use crate::value::Value;
use xxhash_rust::xxh3::xxh3_128;

/// MessagePack argument encoding with xxh3-128 key hashing
///
/// Keys are hashed over their MessagePack encoding, so two keys hash equal
/// exactly when they encode equal. `Value::Object` is ordered, which keeps
/// the encoding (and therefore the hash) deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackSerializer;

impl Serializer for MsgPackSerializer {
    fn encode(&self, args: &[Value]) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(args)?)
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<Value>> {
        Ok(rmp_serde::from_slice(payload)?)
    }

    fn hash(&self, key: &Value) -> Result<ConflictHash> {
        let bytes = rmp_serde::to_vec(key)?;
        Ok(xxh3_128(&bytes).to_le_bytes())
    }
}
