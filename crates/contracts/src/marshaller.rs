//! Marshaller trait - command and response encoding

use bytes::Bytes;

use crate::{ContractError, Response};

/// Encodes commands and responses for the wire.
///
/// Encoding a command must be repeatable: the same bytes are reused for every
/// destination of a round and for replay.
pub trait Marshaller<C>: Send + Sync {
    /// # Errors
    /// `ContractError::Marshal` if the command cannot be encoded
    fn encode_command(&self, command: &C) -> Result<Bytes, ContractError>;

    /// # Errors
    /// `ContractError::Unmarshal` if the bytes are not a valid command
    fn decode_command(&self, bytes: &[u8]) -> Result<C, ContractError>;

    /// # Errors
    /// `ContractError::Marshal` if the response cannot be encoded
    fn encode_response(&self, response: &Response) -> Result<Bytes, ContractError>;

    /// # Errors
    /// `ContractError::Unmarshal` if the bytes are not a valid response
    fn decode_response(&self, bytes: &[u8]) -> Result<Response, ContractError>;
}
