use std::{collections::HashMap, fmt};

use crate::{
    packet::{self, PacketError},
    unit::{AnyUnit, ErrorUnit, UnitType},
};

type Decoder = fn(&[u8]) -> serde_json::Result<Box<dyn AnyUnit>>;

fn decode_boxed<U: UnitType>(body: &[u8]) -> serde_json::Result<Box<dyn AnyUnit>> {
    let unit: U = serde_json::from_slice(body)?;
    Ok(Box::new(unit))
}

/// Maps packet type names to the constructors of their unit types.
///
/// A registry is built explicitly by whoever starts the workers and shared with
/// them, there is no process-wide registration.
#[derive(Clone)]
pub struct UnitRegistry {
    decoders: HashMap<&'static str, Decoder>,
}

impl UnitRegistry {
    /// Creates a new `UnitRegistry` that only knows about `ErrorUnit`.
    pub fn new() -> Self {
        let mut registry = Self {
            decoders: HashMap::new(),
        };

        registry.register::<ErrorUnit>();
        registry
    }

    /// Registers the unit type `U` under its `TYPE_NAME`, replacing any previous
    /// registration for that name.
    pub fn register<U: UnitType>(&mut self) -> &mut Self {
        self.decoders.insert(U::TYPE_NAME, decode_boxed::<U>);
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.decoders.contains_key(type_name)
    }

    /// Reconstructs a unit of whatever registered type produced `bytes`.
    ///
    /// # Arguments
    /// * `bytes` - A packet produced by `encode_unit`.
    ///
    /// # Returns
    /// The boxed unit or the reason it couldn't be reconstructed.
    pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn AnyUnit>, PacketError> {
        let packet = packet::decode(bytes)?;

        let decoder = self
            .decoders
            .get(packet.type_name)
            .ok_or_else(|| PacketError::UnknownType(packet.type_name.to_owned()))?;

        Ok(decoder(packet.body)?)
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::unit::{ChunkError, FailureCause, WorkUnit, encode_unit};

    #[derive(Debug, Serialize, Deserialize)]
    struct Sleeper {
        naps: u8,
    }

    impl WorkUnit for Sleeper {
        fn run_chunk(&mut self) -> Result<(), ChunkError> {
            self.naps += 1;
            Ok(())
        }

        fn has_finished(&self) -> bool {
            self.naps >= 3
        }

        fn progress(&self) -> f32 {
            self.naps as f32 / 3. * 100.
        }
    }

    impl UnitType for Sleeper {
        const TYPE_NAME: &'static str = "sleeper";
    }

    #[test]
    fn test_decodes_registered_type() {
        let mut registry = UnitRegistry::new();
        registry.register::<Sleeper>();

        let bytes = encode_unit(&Sleeper { naps: 2 }).unwrap();
        let mut unit = registry.decode(&bytes).unwrap();

        assert_eq!(unit.type_name(), "sleeper");
        assert!(!unit.has_finished());
        unit.run_chunk().unwrap();
        assert!(unit.has_finished());
    }

    #[test]
    fn test_unknown_type_is_reported() {
        let registry = UnitRegistry::new();
        let bytes = encode_unit(&Sleeper { naps: 0 }).unwrap();

        match registry.decode(&bytes) {
            Err(PacketError::UnknownType(name)) => assert_eq!(name, "sleeper"),
            other => panic!("expected an unknown type, got {:?}", other.map(|u| u.type_name())),
        }
    }

    #[test]
    fn test_error_unit_is_always_registered() {
        let registry = UnitRegistry::default();
        let bytes = encode_unit(&ErrorUnit::new(FailureCause::Decode, None, "nope")).unwrap();

        assert!(registry.contains("error"));
        assert!(registry.decode(&bytes).unwrap().has_finished());
    }
}
