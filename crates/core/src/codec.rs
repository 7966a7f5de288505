//! Serialization contract between a command and its queued bytes.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::command::Command;
use crate::error::CodecError;

/// Converts commands to and from the bytes stored in a shard.
///
/// Implementations must round-trip a command's id, job type and run info.
/// Registering concrete job types is the deployment's business; the worker
/// only ever sees [`Codec::Command`].
pub trait Codec: Send + Sync + 'static {
    type Command: Command;

    fn marshal(&self, cmd: &Self::Command) -> Result<Vec<u8>, CodecError>;

    fn unmarshal(&self, bytes: &[u8]) -> Result<Self::Command, CodecError>;
}

/// JSON codec for any serde-serializable command type.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Command + Serialize + DeserializeOwned,
{
    type Command = T;

    fn marshal(&self, cmd: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(cmd).map_err(CodecError::Encode)
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}
