use raw_cpuid::CpuId;
use x86::bits64::vmx;
use x86_64::registers::control::{Cr4, Cr4Flags};

use crate::HostPhysAddr;
use crate::hal::{CpuHal, VmFail};
use crate::msr::Msr;

/// [`CpuHal`] backed by the real instructions of the executing processor.
pub struct X86Cpu;

impl CpuHal for X86Cpu {
    fn has_vmx() -> bool {
        if let Some(feature) = CpuId::new().get_feature_info() {
            feature.has_vmx()
        } else {
            false
        }
    }

    fn read_msr(msr: Msr) -> u64 {
        unsafe { x86::msr::rdmsr(msr as u32) }
    }

    unsafe fn write_msr(msr: Msr, value: u64) {
        unsafe { x86::msr::wrmsr(msr as u32, value) }
    }

    fn vmxe_enabled() -> bool {
        Cr4::read().contains(Cr4Flags::VIRTUAL_MACHINE_EXTENSIONS)
    }

    unsafe fn set_vmxe() {
        unsafe { Cr4::update(|cr4| cr4.insert(Cr4Flags::VIRTUAL_MACHINE_EXTENSIONS)) }
    }

    unsafe fn vmxon(paddr: HostPhysAddr) -> Result<(), VmFail> {
        unsafe { vmx::vmxon(paddr.as_usize() as u64) }
    }

    unsafe fn vmxoff() -> Result<(), VmFail> {
        unsafe { vmx::vmxoff() }
    }
}
