use crate::hal::CpuHal;

numeric_enum_macro::numeric_enum! {
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[allow(non_camel_case_types)]
pub enum Msr {
    IA32_FEATURE_CONTROL = 0x3a,
    IA32_VMX_BASIC = 0x480,
}
}

impl Msr {
    /// Read 64 bits msr register through the given processor backend.
    #[inline(always)]
    pub fn read<C: CpuHal>(self) -> u64 {
        C::read_msr(self)
    }

    /// Writes 64 bits to msr register.
    ///
    /// # Safety
    ///
    /// The caller must ensure that this write operation has no unsafe side
    /// effects.
    #[inline(always)]
    pub unsafe fn write<C: CpuHal>(self, value: u64) {
        unsafe { C::write_msr(self, value) }
    }
}
