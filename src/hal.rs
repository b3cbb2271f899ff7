use crate::msr::Msr;
use crate::{HostPhysAddr, HostVirtAddr};

pub use x86::vmx::VmFail;

/// The interfaces which the underlying memory subsystem must implement.
pub trait MmHal {
    /// Allocates a 4 KiB, 4 KiB-aligned physical frame.
    fn alloc_frame() -> Option<HostPhysAddr>;
    /// Returns a frame obtained from [`MmHal::alloc_frame`].
    fn dealloc_frame(paddr: HostPhysAddr);
    /// Converts a physical address to a virtual address the host can access.
    fn phys_to_virt(paddr: HostPhysAddr) -> HostVirtAddr;
}

/// Privileged operations on the current logical processor.
///
/// Every method acts on whichever processor executes it.
pub trait CpuHal {
    /// Whether CPUID.1:ECX.VMX\[bit 5\] is set.
    fn has_vmx() -> bool;

    /// Reads a model-specific register.
    fn read_msr(msr: Msr) -> u64;

    /// # Safety
    ///
    /// Writing a locked or reserved MSR faults.
    unsafe fn write_msr(msr: Msr, value: u64);

    /// Whether CR4.VMXE is set.
    fn vmxe_enabled() -> bool;

    /// Sets CR4.VMXE. It is never cleared by this crate.
    ///
    /// # Safety
    ///
    /// The processor must support VMX.
    unsafe fn set_vmxe();

    /// Executes `VMXON` with the given VMXON region.
    ///
    /// # Safety
    ///
    /// `paddr` must point to a 4 KiB-aligned region stamped with the VMCS
    /// revision identifier that stays alive until `VMXOFF`.
    unsafe fn vmxon(paddr: HostPhysAddr) -> Result<(), VmFail>;

    /// Executes `VMXOFF`.
    ///
    /// # Safety
    ///
    /// The processor must be in VMX root operation.
    unsafe fn vmxoff() -> Result<(), VmFail>;
}

/// Bundles the memory and processor backends a driver runs on.
pub trait Hal {
    type MmHal: MmHal;
    type CpuHal: CpuHal;
}
