#![no_std]
#![doc = include_str!("../README.md")]

#[macro_use]
extern crate log;

extern crate alloc;

mod arena;
mod config;
mod control;
mod driver;
mod error;
mod hal;
mod mem;
mod msr;
mod vmx;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

/// Host physical address.
pub type HostPhysAddr = memory_addr::PhysAddr;
/// Host virtual address.
pub type HostVirtAddr = memory_addr::VirtAddr;

pub use arena::{RegionArena, RegionHandle};
pub use config::BootstrapConfig;
pub use control::{
    ControlRequest, DEFAULT_GUEST_MEM_SIZE, DEVICE_NAME, VM_NAME_LEN, VTX_IOCTL_CREATE_VM,
    VmCreateRequest, iow,
};
pub use driver::{VmxDriver, VtxDevice};
pub use error::{ErrorKind, ExitCode, Result, VmxError};
pub use hal::{CpuHal, Hal, MmHal, VmFail};
pub use mem::PhysFrame;
pub use msr::Msr;
pub use vmx::{
    FeatureControl, FeatureControlFlags, FeatureLock, REVISION_ID_MASK, RootOperationState,
    VmcsProvisioner, VmxBasic, VmxPerCpuState, VmxRegion, allocate_region, has_hardware_support,
    read_vmcs_revision_id,
};

#[cfg(all(feature = "vmx", target_arch = "x86_64"))]
pub use vmx::X86Cpu;
