//! Ownership table for VMX regions.
//!
//! Every region allocated by the driver is parked in a [`RegionArena`] and
//! addressed by a [`RegionHandle`]. Taking a region out of the arena bumps
//! the slot generation, so a stale handle can never reach a frame twice.

use alloc::vec::Vec;

use crate::hal::MmHal;
use crate::vmx::VmxRegion;
use crate::{Result, VmxError};

/// Stable identifier of a region inside a [`RegionArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<H: MmHal> {
    generation: u32,
    region: Option<VmxRegion<H>>,
}

#[derive(Debug)]
pub struct RegionArena<H: MmHal> {
    slots: Vec<Slot<H>>,
}

impl<H: MmHal> RegionArena<H> {
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Takes ownership of `region`, reusing a vacant slot when there is one.
    pub fn insert(&mut self, region: VmxRegion<H>) -> RegionHandle {
        if let Some((index, slot)) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.region.is_none())
        {
            slot.region = Some(region);
            return RegionHandle {
                index: index as u32,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            region: Some(region),
        });
        RegionHandle {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    pub fn get(&self, handle: RegionHandle) -> Option<&VmxRegion<H>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.region.as_ref())
    }

    pub fn contains(&self, handle: RegionHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Moves the region out of the arena, invalidating `handle`.
    pub fn take(&mut self, handle: RegionHandle) -> Result<VmxRegion<H>> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(VmxError::InvalidRegionHandle)?;
        let region = slot.region.take().ok_or(VmxError::InvalidRegionHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        Ok(region)
    }

    /// Frees the region named by `handle`.
    pub fn release(&mut self, handle: RegionHandle) -> Result {
        self.take(handle).map(drop)
    }

    /// Number of live regions.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.region.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<H: MmHal> Default for RegionArena<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock::{MOCK_REVISION_ID, MockMachine, MockMmHal};

    fn region() -> VmxRegion<MockMmHal> {
        VmxRegion::new(MOCK_REVISION_ID).unwrap()
    }

    #[test]
    fn test_release_frees_exactly_once() {
        MockMachine::reset();
        let mut arena = RegionArena::new();
        let handle = arena.insert(region());
        let paddr = arena.get(handle).unwrap().phys_addr();

        assert_eq!(arena.release(handle), Ok(()));
        assert_eq!(arena.release(handle), Err(VmxError::InvalidRegionHandle));
        assert_eq!(MockMachine::dealloc_count(paddr), 1);
        assert!(arena.is_empty());
    }

    #[test]
    fn test_reused_slot_rejects_stale_handle() {
        MockMachine::reset();
        let mut arena = RegionArena::new();
        let first = arena.insert(region());
        arena.release(first).unwrap();

        let second = arena.insert(region());
        assert_ne!(first, second);
        assert!(!arena.contains(first));
        assert!(arena.contains(second));
        assert_eq!(arena.take(first).unwrap_err(), VmxError::InvalidRegionHandle);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_handles_are_independent() {
        MockMachine::reset();
        let mut arena = RegionArena::new();
        let a = arena.insert(region());
        let b = arena.insert(region());
        assert_ne!(
            arena.get(a).unwrap().phys_addr(),
            arena.get(b).unwrap().phys_addr()
        );

        let taken = arena.take(a).unwrap();
        assert_eq!(taken.revision_id(), MOCK_REVISION_ID);
        assert!(arena.contains(b));
        drop(taken);
        assert_eq!(MockMachine::with(|m| m.live_frames.len()), 1);
    }

    #[test]
    fn test_dropping_arena_frees_everything() {
        MockMachine::reset();
        let mut arena = RegionArena::new();
        arena.insert(region());
        arena.insert(region());
        drop(arena);
        assert!(MockMachine::with(|m| m.live_frames.is_empty()));
    }
}
