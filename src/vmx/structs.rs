use bit_field::BitField;
use bitflags::bitflags;
use memory_addr::PAGE_SIZE_4K as PAGE_SIZE;

use crate::hal::{CpuHal, MmHal};
use crate::mem::PhysFrame;
use crate::msr::Msr;
use crate::{HostPhysAddr, Result};

/// Mask of the 31-bit VMCS revision identifier. Bit 31 is the shadow-VMCS
/// indicator and is always clear in regions allocated here.
pub const REVISION_ID_MASK: u32 = 0x7fff_ffff;

/// A VMXON or VMCS region: one zeroed 4 KiB frame whose first four bytes hold
/// the VMCS revision identifier.
#[derive(Debug)]
pub struct VmxRegion<H: MmHal> {
    frame: PhysFrame<H>,
}

impl<H: MmHal> VmxRegion<H> {
    pub fn new(revision_id: u32) -> Result<Self> {
        let frame = PhysFrame::alloc_zero()?;
        let revision_id = revision_id & REVISION_ID_MASK;
        unsafe { (frame.as_mut_ptr() as *mut u32).write_volatile(revision_id) };
        trace!(
            "[vtx] stamped region {:#x} with revision {revision_id:#x}",
            frame.start_paddr()
        );
        Ok(Self { frame })
    }

    pub fn phys_addr(&self) -> HostPhysAddr {
        self.frame.start_paddr()
    }

    /// The revision identifier stored in the region header.
    pub fn revision_id(&self) -> u32 {
        unsafe { (self.frame.as_mut_ptr() as *const u32).read_volatile() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.frame.as_bytes()
    }
}

bitflags! {
    /// IA32_FEATURE_CONTROL flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureControlFlags: u64 {
        /// Lock bit: when set, locks this MSR from being written. when clear,
        /// VMXON causes a #GP.
        const LOCKED = 1 << 0;
        /// Enable VMX inside SMX operation.
        const VMXON_ENABLED_INSIDE_SMX = 1 << 1;
        /// Enable VMX outside SMX operation.
        const VMXON_ENABLED_OUTSIDE_SMX = 1 << 2;
    }
}

/// Control Features in Intel 64 Processor: MSR IA32_FEATURE_CONTROL
pub struct FeatureControl;

impl FeatureControl {
    /// Read the current IA32_FEATURE_CONTROL flags.
    pub fn read<C: CpuHal>() -> FeatureControlFlags {
        FeatureControlFlags::from_bits_truncate(Msr::IA32_FEATURE_CONTROL.read::<C>())
    }

    /// Write IA32_FEATURE_CONTROL flags, preserving reserved values.
    ///
    /// # Safety
    ///
    /// The register must not be locked yet.
    pub unsafe fn write<C: CpuHal>(flags: FeatureControlFlags) {
        let old_value = Msr::IA32_FEATURE_CONTROL.read::<C>();
        let reserved = old_value & !(FeatureControlFlags::all().bits());
        let new_value = reserved | flags.bits();
        unsafe { Msr::IA32_FEATURE_CONTROL.write::<C>(new_value) };
    }
}

/// What firmware left in IA32_FEATURE_CONTROL for VMXON outside SMX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureLock {
    /// Locked with VMXON disabled: VMX is off until the next reset.
    LockedDisabled,
    /// Locked with VMXON enabled outside SMX.
    LockedEnabled,
    /// Not locked yet; software may still program and lock it.
    Unlocked,
}

impl FeatureLock {
    pub fn from_flags(flags: FeatureControlFlags) -> Self {
        if !flags.contains(FeatureControlFlags::LOCKED) {
            Self::Unlocked
        } else if flags.contains(FeatureControlFlags::VMXON_ENABLED_OUTSIDE_SMX) {
            Self::LockedEnabled
        } else {
            Self::LockedDisabled
        }
    }

    pub fn check<C: CpuHal>() -> Self {
        Self::from_flags(FeatureControl::read::<C>())
    }

    pub fn permits_vmxon(self) -> bool {
        self != Self::LockedDisabled
    }
}

/// Reporting Register of Basic VMX Capabilities: MSR IA32_VMX_BASIC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmxBasic {
    /// The 31-bit VMCS revision identifier used by the processor.
    pub revision_id: u32,
    /// The number of bytes that software should allocate for the VMXON region
    /// and any VMCS region.
    pub region_size: u16,
    /// The width of the physical addresses that may be used for the VMXON
    /// region, each VMCS, and data structures referenced by pointers in a VMCS.
    pub is_32bit_address: bool,
    /// The memory type that should be used for the VMCS, for data structures
    /// referenced by pointers in the VMCS.
    pub mem_type: u8,
}

impl VmxBasic {
    pub const VMX_MEMORY_TYPE_WRITE_BACK: u8 = 6;

    pub fn from_raw(msr: u64) -> Self {
        Self {
            revision_id: msr.get_bits(0..31) as u32,
            region_size: msr.get_bits(32..45) as u16,
            is_32bit_address: msr.get_bit(48),
            mem_type: msr.get_bits(50..54) as u8,
        }
    }

    /// Read the current IA32_VMX_BASIC flags.
    pub fn read<C: CpuHal>() -> Self {
        Self::from_raw(Msr::IA32_VMX_BASIC.read::<C>())
    }

    /// Rejects implementations whose VMX structures do not fit the single
    /// write-back 4 KiB frame this crate allocates.
    pub fn validate(&self) -> core::result::Result<(), &'static str> {
        if self.region_size as usize != PAGE_SIZE {
            return Err("VMX region size is not 4K");
        }
        if self.mem_type != Self::VMX_MEMORY_TYPE_WRITE_BACK {
            return Err("VMX memory type is not write-back");
        }
        if self.is_32bit_address {
            return Err("32-bit VMX not supported");
        }
        Ok(())
    }
}
