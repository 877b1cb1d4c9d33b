//! Self-describing byte packets for work units.
//!
//! A packet carries the name of the unit type that produced it, so a receiver with
//! no prior knowledge of the payload can find the right constructor. The layout is:
//!
//! | field        | size            |
//! |--------------|-----------------|
//! | magic        | 4               |
//! | major, minor | 2 + 2           |
//! | name length  | 2               |
//! | type name    | name length     |
//! | body length  | 8               |
//! | checksum     | 32 (BLAKE3)     |
//! | body         | body length     |
//!
//! All integers are big endian.

use std::{error::Error, fmt, str};

use crate::unit::RemoteError;

pub const MAGIC: [u8; 4] = *b"RXWU";
pub const VERSION: Version = Version { major: 1, minor: 0 };

const CHECKSUM_SIZE: usize = blake3::OUT_LEN;

/// Producer/consumer compatibility marker. Packets are only accepted when the major
/// versions match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub fn is_compatible(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A decoded, verified packet borrowing from its source buffer.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub version: Version,
    pub type_name: &'a str,
    pub body: &'a [u8],
}

/// Failures found while encoding or decoding a packet.
#[derive(Debug)]
pub enum PacketError {
    Truncated {
        needed: usize,
        got: usize,
    },
    BadMagic([u8; 4]),
    Incompatible {
        got: Version,
        expected: Version,
    },
    Corrupt,
    InvalidTypeName,
    TypeNameTooLong(usize),
    UnknownType(String),
    TypeMismatch {
        expected: &'static str,
        got: String,
    },
    Codec(serde_json::Error),
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::Truncated { needed, got } => {
                write!(f, "truncated packet: needed {needed} bytes, got {got}")
            }
            PacketError::BadMagic(magic) => write!(f, "bad packet magic {magic:?}"),
            PacketError::Incompatible { got, expected } => write!(
                f,
                "incompatible packet version {got}, this build understands {expected}"
            ),
            PacketError::Corrupt => f.write_str("packet checksum mismatch"),
            PacketError::InvalidTypeName => f.write_str("packet type name is not valid utf-8"),
            PacketError::TypeNameTooLong(len) => {
                write!(f, "type name of {len} bytes does not fit a packet header")
            }
            PacketError::UnknownType(name) => write!(f, "no work unit registered as `{name}`"),
            PacketError::TypeMismatch { expected, got } => {
                write!(f, "expected a `{expected}` packet, got `{got}`")
            }
            PacketError::Codec(e) => write!(f, "packet body codec error: {e}"),
        }
    }
}

impl Error for PacketError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PacketError::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PacketError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

/// Failures when decoding a packet into a concrete unit type.
#[derive(Debug)]
pub enum UnitError {
    Packet(PacketError),
    Remote(RemoteError),
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitError::Packet(e) => write!(f, "{e}"),
            UnitError::Remote(e) => write!(f, "{e}"),
        }
    }
}

impl Error for UnitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UnitError::Packet(e) => Some(e),
            UnitError::Remote(e) => Some(e),
        }
    }
}

impl From<PacketError> for UnitError {
    fn from(value: PacketError) -> Self {
        Self::Packet(value)
    }
}

/// Wraps `body` into a packet tagged with `type_name`.
///
/// # Arguments
/// * `type_name` - The registered name of the unit type.
/// * `body` - The encoded unit state.
///
/// # Returns
/// The packet bytes.
///
/// # Errors
/// `TypeNameTooLong` if the name length does not fit its `u16` header field.
pub fn encode(type_name: &str, body: &[u8]) -> Result<Vec<u8>, PacketError> {
    let name = type_name.as_bytes();
    let name_len =
        u16::try_from(name.len()).map_err(|_| PacketError::TypeNameTooLong(name.len()))?;
    let checksum = blake3::hash(body);

    let mut buf = Vec::with_capacity(header_len(name.len()) + body.len());
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.major.to_be_bytes());
    buf.extend_from_slice(&VERSION.minor.to_be_bytes());
    buf.extend_from_slice(&name_len.to_be_bytes());
    buf.extend_from_slice(name);
    buf.extend_from_slice(&(body.len() as u64).to_be_bytes());
    buf.extend_from_slice(checksum.as_bytes());
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Reads the type name of a packet without verifying its body.
pub fn peek_type(bytes: &[u8]) -> Result<&str, PacketError> {
    let mut cursor = Cursor::new(bytes);
    read_preamble(&mut cursor)?;
    read_name(&mut cursor)
}

/// Decodes and verifies a packet.
///
/// Checks run in order: length, magic, version compatibility and then the body
/// checksum.
///
/// # Arguments
/// * `bytes` - The packet bytes.
///
/// # Returns
/// The verified packet or the first failed check.
pub fn decode(bytes: &[u8]) -> Result<Packet<'_>, PacketError> {
    let mut cursor = Cursor::new(bytes);
    let version = read_preamble(&mut cursor)?;
    let type_name = read_name(&mut cursor)?;

    let body_len = u64::from_be_bytes(cursor.array()?) as usize;
    let checksum: [u8; CHECKSUM_SIZE] = cursor.array()?;
    let body = cursor.take(body_len)?;

    if blake3::hash(body) != blake3::Hash::from(checksum) {
        return Err(PacketError::Corrupt);
    }

    Ok(Packet {
        version,
        type_name,
        body,
    })
}

fn header_len(name_len: usize) -> usize {
    MAGIC.len() + 2 + 2 + 2 + name_len + 8 + CHECKSUM_SIZE
}

fn read_preamble(cursor: &mut Cursor<'_>) -> Result<Version, PacketError> {
    let magic: [u8; 4] = cursor.array()?;
    if magic != MAGIC {
        return Err(PacketError::BadMagic(magic));
    }

    let version = Version {
        major: u16::from_be_bytes(cursor.array()?),
        minor: u16::from_be_bytes(cursor.array()?),
    };

    if !VERSION.is_compatible(&version) {
        return Err(PacketError::Incompatible {
            got: version,
            expected: VERSION,
        });
    }

    Ok(version)
}

fn read_name<'a>(cursor: &mut Cursor<'a>) -> Result<&'a str, PacketError> {
    let len = u16::from_be_bytes(cursor.array()?) as usize;
    let name = cursor.take(len)?;
    str::from_utf8(name).map_err(|_| PacketError::InvalidTypeName)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        let end = self.pos.saturating_add(n);
        let slice = self.buf.get(self.pos..end).ok_or(PacketError::Truncated {
            needed: end,
            got: self.buf.len(),
        })?;

        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        let slice = self.take(N)?;

        // SAFETY: `take` returned exactly `N` bytes.
        Ok(slice.try_into().unwrap())
    }
}
