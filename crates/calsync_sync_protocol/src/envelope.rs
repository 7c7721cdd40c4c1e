//! Versioned CBOR envelope around every message.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::{
    ErrorResponse, RecoveryFetchRequest, RecoveryFetchResponse, SyncRequest, SyncResponse,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Protocol version written by this build.
pub const PROTOCOL_VERSION: u16 = 1;

/// Discriminates envelope bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// [`SyncRequest`]
    SyncRequest,
    /// [`SyncResponse`]
    SyncResponse,
    /// [`RecoveryFetchRequest`]
    RecoveryFetchRequest,
    /// [`RecoveryFetchResponse`]
    RecoveryFetchResponse,
    /// [`ErrorResponse`]
    Error,
}

/// A message that travels inside an envelope.
pub trait Message: Serialize + DeserializeOwned {
    /// Envelope discriminator of this message.
    const KIND: MessageKind;
}

impl Message for SyncRequest {
    const KIND: MessageKind = MessageKind::SyncRequest;
}

impl Message for SyncResponse {
    const KIND: MessageKind = MessageKind::SyncResponse;
}

impl Message for RecoveryFetchRequest {
    const KIND: MessageKind = MessageKind::RecoveryFetchRequest;
}

impl Message for RecoveryFetchResponse {
    const KIND: MessageKind = MessageKind::RecoveryFetchResponse;
}

impl Message for ErrorResponse {
    const KIND: MessageKind = MessageKind::Error;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u16,
    kind: MessageKind,
    body: &'a T,
}

#[derive(Deserialize)]
struct Header {
    version: u16,
    kind: MessageKind,
}

#[derive(Deserialize)]
struct Envelope<T> {
    body: T,
}

/// Encodes `message` with the current protocol version.
pub fn encode<M: Message>(message: &M) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(
        &EnvelopeRef {
            version: PROTOCOL_VERSION,
            kind: M::KIND,
            body: message,
        },
        &mut bytes,
    )
    .map_err(ProtocolError::encode)?;
    Ok(bytes)
}

/// Reads the kind of an encoded message without decoding its body.
pub fn peek_kind(bytes: &[u8]) -> ProtocolResult<MessageKind> {
    let header: Header = ciborium::from_reader(bytes).map_err(ProtocolError::decode)?;
    check_version(header.version)?;
    Ok(header.kind)
}

/// Decodes a message of type `M`.
pub fn decode<M: Message>(bytes: &[u8]) -> ProtocolResult<M> {
    let kind = peek_kind(bytes)?;
    if kind != M::KIND {
        return Err(ProtocolError::UnexpectedMessage {
            expected: M::KIND,
            found: kind,
        });
    }
    let envelope: Envelope<M> = ciborium::from_reader(bytes).map_err(ProtocolError::decode)?;
    Ok(envelope.body)
}

fn check_version(found: u16) -> ProtocolResult<()> {
    if found == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(ProtocolError::UnsupportedVersion {
            found,
            supported: PROTOCOL_VERSION,
        })
    }
}
