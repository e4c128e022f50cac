//! # Self-Describing Value Codec
//!
//! The only boundary where typed user values cross the wire. The encoder
//! wraps the bincode representation of a value in an envelope that names the
//! value's concrete type, so the receiving side can verify that the bytes it
//! is about to decode actually carry the shape the caller pre-declared.
//!
//! ## Envelope layout
//!
//! ```text
//! bincode(Envelope { type_tag: String, bytes: Vec<u8> })
//!                    │                 └── bincode(value)
//!                    └── std::any::type_name of the encoded value
//! ```
//!
//! Type tags are produced by `std::any::type_name`, which is stable across
//! the identical binaries a launched world runs. Decoding into a target of a
//! different concrete type is reported as a codec error rather than
//! producing garbage.
//!
//! ## Type registry
//!
//! Scalar numeric types, `bool`, `String`, and vectors of those are known to
//! the codec out of the box. Composite element types that the codec cannot
//! know a priori must be announced at runtime with [`register_type`] before
//! they are encoded or decoded; an unregistered tag on either side is a
//! codec error. Registration is process-wide and append-only.

use crate::error::{MeshError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Wire envelope carrying the type tag alongside the encoded value.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    type_tag: String,
    bytes: Vec<u8>,
}

fn registry() -> &'static RwLock<HashSet<String>> {
    static REGISTRY: OnceLock<RwLock<HashSet<String>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(builtin_tags()))
}

macro_rules! seed_tags {
    ($set:expr, $($ty:ty),+ $(,)?) => {
        $(
            $set.insert(type_name::<$ty>().to_string());
            $set.insert(type_name::<Vec<$ty>>().to_string());
        )+
    };
}

fn builtin_tags() -> HashSet<String> {
    let mut tags = HashSet::new();
    seed_tags!(
        tags, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64, bool, String
    );
    tags
}

/// Announce a composite type to the codec.
///
/// Required once per process for any element type that is not a built-in
/// scalar or a vector of one. Registering a type twice is harmless.
pub fn register_type<T: ?Sized>() {
    registry().write().insert(type_name::<T>().to_string());
}

fn is_registered(tag: &str) -> bool {
    registry().read().contains(tag)
}

/// Encode a value into a self-describing payload.
///
/// Failure here indicates a program bug (an unregistered composite type or
/// a value bincode cannot represent) and callers should treat it as fatal.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let tag = type_name::<T>();
    if !is_registered(tag) {
        return Err(MeshError::Codec(format!(
            "type {tag} is not registered; call register_type::<{tag}>() before encoding"
        )));
    }
    let bytes = bincode::serialize(value)
        .map_err(|e| MeshError::Codec(format!("failed to encode {tag}: {e}")))?;
    let envelope = Envelope {
        type_tag: tag.to_string(),
        bytes,
    };
    bincode::serialize(&envelope)
        .map_err(|e| MeshError::Codec(format!("failed to encode envelope for {tag}: {e}")))
}

/// Decode a payload into a pre-shaped target.
///
/// The target must be an addressable placeholder of the same concrete type
/// the sender encoded. Empty payloads are an explicit error, never a silent
/// zero value. Decode failures are recoverable and returned to the caller.
pub fn decode<T: DeserializeOwned>(payload: &[u8], target: &mut T) -> Result<()> {
    let envelope = open_envelope(payload)?;
    let expected = type_name::<T>();
    if envelope.type_tag != expected {
        return Err(MeshError::Codec(format!(
            "payload carries {}, target expects {expected}",
            envelope.type_tag
        )));
    }
    *target = bincode::deserialize(&envelope.bytes)
        .map_err(|e| MeshError::Codec(format!("failed to decode {expected}: {e}")))?;
    Ok(())
}

/// Read the type tag of a payload without decoding the value.
///
/// Used by the collectives to fail fast on element-type mismatches before
/// committing to a decode.
pub fn wire_type_tag(payload: &[u8]) -> Result<String> {
    Ok(open_envelope(payload)?.type_tag)
}

fn open_envelope(payload: &[u8]) -> Result<Envelope> {
    if payload.is_empty() {
        return Err(MeshError::Codec("empty payload".to_string()));
    }
    let envelope: Envelope = bincode::deserialize(payload)
        .map_err(|e| MeshError::Codec(format!("malformed payload envelope: {e}")))?;
    if !is_registered(&envelope.type_tag) {
        return Err(MeshError::Codec(format!(
            "payload carries unregistered type {}",
            envelope.type_tag
        )));
    }
    Ok(envelope)
}
