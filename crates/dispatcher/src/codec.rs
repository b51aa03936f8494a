//! Wire codecs for commands and responses
//!
//! Commands are framed as `[command_id][body]` so the receiver can reject a
//! body whose declared type does not match before trusting it.

use std::marker::PhantomData;

use bytes::{BufMut, Bytes, BytesMut};
use contracts::{ContractError, Marshaller, ReplicableCommand, Response, WireFormat};
use serde::de::DeserializeOwned;
use serde::Serialize;

const RESPONSE_TYPE: &str = "Response";

fn frame<C: ReplicableCommand>(command: &C, body: Vec<u8>) -> Bytes {
    let mut buf = BytesMut::with_capacity(body.len() + 1);
    buf.put_u8(command.command_id());
    buf.put_slice(&body);
    buf.freeze()
}

fn unframe(bytes: &[u8]) -> Result<(u8, &[u8]), ContractError> {
    match bytes.split_first() {
        Some((id, body)) => Ok((*id, body)),
        None => Err(ContractError::unmarshal("command", "empty buffer")),
    }
}

fn check_id<C: ReplicableCommand>(command: C, expected: u8) -> Result<C, ContractError> {
    if command.command_id() == expected {
        Ok(command)
    } else {
        Err(ContractError::unmarshal(
            command.type_name(),
            format!(
                "frame declares command id {expected} but body decodes as id {}",
                command.command_id()
            ),
        ))
    }
}

/// Bincode (binary, compact)
#[derive(Debug)]
pub struct BincodeMarshaller<C> {
    _command: PhantomData<fn() -> C>,
}

impl<C> BincodeMarshaller<C> {
    pub fn new() -> Self {
        Self {
            _command: PhantomData,
        }
    }
}

impl<C> Default for BincodeMarshaller<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Marshaller<C> for BincodeMarshaller<C>
where
    C: ReplicableCommand + Serialize + DeserializeOwned,
{
    fn encode_command(&self, command: &C) -> Result<Bytes, ContractError> {
        let body = bincode::serialize(command)
            .map_err(|e| ContractError::marshal(command.type_name(), e.to_string()))?;
        Ok(frame(command, body))
    }

    fn decode_command(&self, bytes: &[u8]) -> Result<C, ContractError> {
        let (id, body) = unframe(bytes)?;
        let command: C = bincode::deserialize(body)
            .map_err(|e| ContractError::unmarshal(format!("command id {id}"), e.to_string()))?;
        check_id(command, id)
    }

    fn encode_response(&self, response: &Response) -> Result<Bytes, ContractError> {
        bincode::serialize(response)
            .map(Bytes::from)
            .map_err(|e| ContractError::marshal(RESPONSE_TYPE, e.to_string()))
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Response, ContractError> {
        bincode::deserialize(bytes).map_err(|e| ContractError::unmarshal(RESPONSE_TYPE, e.to_string()))
    }
}

/// JSON (human-readable, larger)
#[derive(Debug)]
pub struct JsonMarshaller<C> {
    _command: PhantomData<fn() -> C>,
}

impl<C> JsonMarshaller<C> {
    pub fn new() -> Self {
        Self {
            _command: PhantomData,
        }
    }
}

impl<C> Default for JsonMarshaller<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Marshaller<C> for JsonMarshaller<C>
where
    C: ReplicableCommand + Serialize + DeserializeOwned,
{
    fn encode_command(&self, command: &C) -> Result<Bytes, ContractError> {
        let body = serde_json::to_vec(command)
            .map_err(|e| ContractError::marshal(command.type_name(), e.to_string()))?;
        Ok(frame(command, body))
    }

    fn decode_command(&self, bytes: &[u8]) -> Result<C, ContractError> {
        let (id, body) = unframe(bytes)?;
        let command: C = serde_json::from_slice(body)
            .map_err(|e| ContractError::unmarshal(format!("command id {id}"), e.to_string()))?;
        check_id(command, id)
    }

    fn encode_response(&self, response: &Response) -> Result<Bytes, ContractError> {
        serde_json::to_vec(response)
            .map(Bytes::from)
            .map_err(|e| ContractError::marshal(RESPONSE_TYPE, e.to_string()))
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Response, ContractError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ContractError::unmarshal(RESPONSE_TYPE, e.to_string()))
    }
}

/// Marshaller selected from configuration
#[derive(Debug)]
pub enum WireMarshaller<C> {
    Json(JsonMarshaller<C>),
    Bincode(BincodeMarshaller<C>),
}

impl<C> WireMarshaller<C> {
    pub fn for_format(format: WireFormat) -> Self {
        match format {
            WireFormat::Json => Self::Json(JsonMarshaller::new()),
            WireFormat::Bincode => Self::Bincode(BincodeMarshaller::new()),
        }
    }
}

impl<C> Marshaller<C> for WireMarshaller<C>
where
    C: ReplicableCommand + Serialize + DeserializeOwned,
{
    fn encode_command(&self, command: &C) -> Result<Bytes, ContractError> {
        match self {
            Self::Json(m) => m.encode_command(command),
            Self::Bincode(m) => m.encode_command(command),
        }
    }

    fn decode_command(&self, bytes: &[u8]) -> Result<C, ContractError> {
        match self {
            Self::Json(m) => m.decode_command(bytes),
            Self::Bincode(m) => m.decode_command(bytes),
        }
    }

    fn encode_response(&self, response: &Response) -> Result<Bytes, ContractError> {
        match self {
            Self::Json(m) => m.encode_response(response),
            Self::Bincode(m) => m.encode_response(response),
        }
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Response, ContractError> {
        match self {
            Self::Json(m) => m.decode_response(bytes),
            Self::Bincode(m) => m.decode_response(bytes),
        }
    }
}
