use crate::control::DEFAULT_GUEST_MEM_SIZE;

/// Knobs of the bootstrap sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Program and lock IA32_FEATURE_CONTROL when firmware left it unlocked.
    /// When off, an unlocked register is treated like a locked-enabled one.
    pub lock_feature_control: bool,
    /// Refuse processors whose IA32_VMX_BASIC layout does not fit one
    /// write-back 4 KiB frame.
    pub check_vmx_basic: bool,
    /// Accept "create VM" control requests. The enable-only driver leaves
    /// this off.
    pub accept_create_vm: bool,
    /// Guest memory size used when a request does not carry one.
    pub default_guest_mem_size: u64,
}

impl BootstrapConfig {
    /// Root operation only; control requests are refused.
    pub fn enable_only() -> Self {
        Self {
            accept_create_vm: false,
            ..Self::default()
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            lock_feature_control: true,
            check_vmx_basic: true,
            accept_create_vm: true,
            default_guest_mem_size: DEFAULT_GUEST_MEM_SIZE,
        }
    }
}
