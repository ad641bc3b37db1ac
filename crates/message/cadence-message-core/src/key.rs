//! Identifiers for keyed entities and animation instances.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identity of an entity that can send or receive messages.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EntityKey(pub u32);

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key#{}", self.0)
    }
}

/// Stable arena index of an animation instance inside its blend manager.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

/// Monotonic allocator for entity keys, instance ids and callback tokens.
#[derive(Default, Debug)]
pub struct KeyAllocator {
    next_key: u32,
    next_inst: u32,
    next_token: u64,
}

impl KeyAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn alloc_key(&mut self) -> EntityKey {
        let id = EntityKey(self.next_key);
        self.next_key = self.next_key.wrapping_add(1);
        id
    }

    #[inline]
    pub fn alloc_instance(&mut self) -> InstanceId {
        let id = InstanceId(self.next_inst);
        self.next_inst = self.next_inst.wrapping_add(1);
        id
    }

    /// Tokens start at 1 so that 0 can mean "unassigned" on the wire.
    #[inline]
    pub fn alloc_token(&mut self) -> u64 {
        self.next_token = self.next_token.wrapping_add(1);
        self.next_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_monotonic() {
        let mut alloc = KeyAllocator::new();
        assert_eq!(alloc.alloc_key(), EntityKey(0));
        assert_eq!(alloc.alloc_key(), EntityKey(1));
        assert_eq!(alloc.alloc_instance(), InstanceId(0));
        assert_eq!(alloc.alloc_token(), 1);
        assert_eq!(alloc.alloc_token(), 2);
    }
}
