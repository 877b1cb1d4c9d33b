use std::{error::Error, fmt};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::packet::{self, PacketError, UnitError};

/// The failure type a chunk may return.
pub type ChunkError = Box<dyn Error + Send + Sync>;

/// A checkpointable unit of work.
///
/// Work advances in bounded chunks, and all the state needed to resume it lives in
/// the object itself, so it can be shipped to a node, stopped, shipped back and
/// resumed somewhere else.
pub trait WorkUnit: Send + 'static {
    /// Advances the work by one bounded chunk. Calling it on a finished unit must
    /// be harmless.
    fn run_chunk(&mut self) -> Result<(), ChunkError>;

    fn has_finished(&self) -> bool;

    /// Completion percentage in `[0, 100]`.
    fn progress(&self) -> f32;
}

/// A work unit type that can travel as a packet.
pub trait UnitType: WorkUnit + Serialize + DeserializeOwned {
    /// The name stored in the packet header, unique within a `UnitRegistry`.
    const TYPE_NAME: &'static str;
}

/// Object-safe view of any `UnitType`, used wherever the concrete type is only known
/// at runtime.
pub trait AnyUnit: WorkUnit {
    fn type_name(&self) -> &'static str;

    fn encode_body(&self) -> serde_json::Result<Vec<u8>>;
}

impl<U: UnitType> AnyUnit for U {
    fn type_name(&self) -> &'static str {
        U::TYPE_NAME
    }

    fn encode_body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Why a remote job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The unit returned an error from `run_chunk`.
    Chunk,
    /// The unit panicked while running a chunk.
    Panic,
    /// The worker could not reconstruct the unit it was sent.
    Decode,
    /// The worker could not encode the unit state.
    Encode,
}

/// A failure that happened on a remote node, carried back inside an `ErrorUnit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub cause: FailureCause,
    /// The type name of the unit that failed, if it was known.
    pub unit_type: Option<String>,
    pub message: String,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.unit_type.as_deref().unwrap_or("<unknown>");
        write!(f, "remote {:?} failure in `{unit}`: {}", self.cause, self.message)
    }
}

impl Error for RemoteError {}

/// A unit that carries a packaged remote failure instead of work.
///
/// It is returned through the same channel as a finished result; its packet type
/// name is what tells the receiver it got an error instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorUnit {
    error: RemoteError,
}

impl ErrorUnit {
    pub fn new(cause: FailureCause, unit_type: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            error: RemoteError {
                cause,
                unit_type: unit_type.map(str::to_owned),
                message: message.into(),
            },
        }
    }

    pub fn error(&self) -> &RemoteError {
        &self.error
    }

    pub fn into_error(self) -> RemoteError {
        self.error
    }

    /// Whether `bytes` is the packet of an `ErrorUnit`.
    pub fn is_error_packet(bytes: &[u8]) -> bool {
        packet::peek_type(bytes).is_ok_and(|name| name == Self::TYPE_NAME)
    }
}

impl WorkUnit for ErrorUnit {
    fn run_chunk(&mut self) -> Result<(), ChunkError> {
        Ok(())
    }

    fn has_finished(&self) -> bool {
        true
    }

    fn progress(&self) -> f32 {
        100.
    }
}

impl UnitType for ErrorUnit {
    const TYPE_NAME: &'static str = "error";
}

/// Encodes any unit into a packet.
///
/// # Arguments
/// * `unit` - The unit to encode.
///
/// # Returns
/// The packet bytes, or the codec error of the unit's body.
pub fn encode_unit(unit: &dyn AnyUnit) -> Result<Vec<u8>, PacketError> {
    let body = unit.encode_body()?;
    packet::encode(unit.type_name(), &body)
}

/// Decodes a packet into the concrete unit type `U`.
///
/// # Arguments
/// * `bytes` - The packet bytes.
///
/// # Returns
/// The unit, `UnitError::Remote` if the packet carries an `ErrorUnit`, or the
/// packet failure otherwise.
pub fn decode_as<U: UnitType>(bytes: &[u8]) -> Result<U, UnitError> {
    let packet = packet::decode(bytes)?;

    if packet.type_name == ErrorUnit::TYPE_NAME && U::TYPE_NAME != ErrorUnit::TYPE_NAME {
        let unit: ErrorUnit = serde_json::from_slice(packet.body).map_err(PacketError::from)?;
        return Err(UnitError::Remote(unit.into_error()));
    }

    if packet.type_name != U::TYPE_NAME {
        return Err(PacketError::TypeMismatch {
            expected: U::TYPE_NAME,
            got: packet.type_name.to_owned(),
        }
        .into());
    }

    serde_json::from_slice(packet.body)
        .map_err(PacketError::from)
        .map_err(UnitError::from)
}
