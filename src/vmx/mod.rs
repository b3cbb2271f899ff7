mod percpu;
mod structs;
mod vmcs;

cfg_if::cfg_if! {
    if #[cfg(all(feature = "vmx", target_arch = "x86_64"))] {
        mod instructions;
        pub use self::instructions::X86Cpu;
    }
}

use alloc::format;

pub use self::percpu::{RootOperationState, VmxPerCpuState};
pub use self::structs::{
    FeatureControl, FeatureControlFlags, FeatureLock, REVISION_ID_MASK, VmxBasic, VmxRegion,
};
pub use self::vmcs::VmcsProvisioner;

use crate::hal::{CpuHal, Hal, VmFail};
use crate::{Result, VmxError};

/// Return if current platform support virtualization extension.
pub fn has_hardware_support<C: CpuHal>() -> bool {
    C::has_vmx()
}

pub fn read_vmcs_revision_id<C: CpuHal>() -> u32 {
    VmxBasic::read::<C>().revision_id
}

/// Allocates one zeroed frame and stamps it with the revision identifier the
/// processor currently reports. The caller owns the returned region.
pub fn allocate_region<H: Hal>() -> Result<VmxRegion<H::MmHal>> {
    VmxRegion::new(read_vmcs_revision_id::<H::CpuHal>())
}

fn as_vmx_err(instruction: &str, err: VmFail) -> VmxError {
    VmxError::VmxInstructionError(format!("VMX instruction {instruction} failed: {err:?}"))
}
