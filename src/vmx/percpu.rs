use core::marker::PhantomData;

use crate::arena::{RegionArena, RegionHandle};
use crate::config::BootstrapConfig;
use crate::hal::{CpuHal, Hal};
use crate::vmx::structs::{FeatureControl, FeatureControlFlags, FeatureLock, VmxBasic};
use crate::vmx::{allocate_region, as_vmx_err, has_hardware_support};
use crate::{HostPhysAddr, Result, VmxError};

/// Virtualization mode of the processor handled by a [`VmxPerCpuState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootOperationState {
    /// No VMXON region is held. CR4.VMXE may still be set.
    Disabled,
    /// CR4.VMXE is set and a VMXON region is allocated, VMXON not yet done.
    ModeBitSet,
    /// The processor is in VMX root operation on the held VMXON region.
    RootActive,
}

/// Represents the per-CPU state for Virtual Machine Extensions (VMX).
///
/// This structure holds the state information specific to a CPU core
/// when operating in VMX mode, including the VMCS revision identifier and
/// the handle of the VMXON region the processor is using.
#[derive(Debug)]
pub struct VmxPerCpuState<H: Hal> {
    /// The VMCS (Virtual Machine Control Structure) revision identifier.
    pub(crate) vmcs_revision_id: u32,
    state: RootOperationState,
    /// The VMXON region, owned from a successful `VMXON` until `VMXOFF`.
    vmxon_region: Option<RegionHandle>,
    _marker: PhantomData<H>,
}

type Regions<H> = RegionArena<<H as Hal>::MmHal>;

impl<H: Hal> VmxPerCpuState<H> {
    pub fn new() -> Self {
        Self {
            vmcs_revision_id: 0,
            state: RootOperationState::Disabled,
            vmxon_region: None,
            _marker: PhantomData,
        }
    }

    pub fn state(&self) -> RootOperationState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == RootOperationState::RootActive
    }

    pub fn vmcs_revision_id(&self) -> u32 {
        self.vmcs_revision_id
    }

    pub fn vmxon_region(&self) -> Option<RegionHandle> {
        self.vmxon_region
    }

    /// Physical address of the VMXON region while in root operation.
    pub fn vmxon_paddr(&self, regions: &Regions<H>) -> Option<HostPhysAddr> {
        self.vmxon_region
            .and_then(|handle| regions.get(handle))
            .map(|region| region.phys_addr())
    }

    /// Runs the whole bring-up: [`Self::activate`] followed by
    /// [`Self::enter`] on the region it allocated.
    pub fn hardware_enable(&mut self, regions: &mut Regions<H>, config: &BootstrapConfig) -> Result {
        let handle = self.activate(regions, config)?;
        self.enter(regions, handle)
    }

    /// Probes the processor, checks IA32_FEATURE_CONTROL and IA32_VMX_BASIC,
    /// sets CR4.VMXE and allocates a VMXON region.
    ///
    /// Nothing is written to the processor before every check passes. On
    /// success the state is [`RootOperationState::ModeBitSet`] and the
    /// returned region is meant for [`Self::enter`].
    pub fn activate(
        &mut self,
        regions: &mut Regions<H>,
        config: &BootstrapConfig,
    ) -> Result<RegionHandle> {
        if self.state != RootOperationState::Disabled {
            return Err(VmxError::VmxAlreadyEnabled);
        }
        if !has_hardware_support::<H::CpuHal>() {
            error!("[vtx] CPU does not support VMX");
            return Err(VmxError::Unsupported(
                "CPU does not support feature VMX".into(),
            ));
        }

        let lock = FeatureLock::check::<H::CpuHal>();
        if lock == FeatureLock::LockedDisabled {
            error!("[vtx] VMX not enabled in BIOS (IA32_FEATURE_CONTROL MSR)");
            return Err(VmxError::PermissionDenied);
        }

        let vmx_basic = VmxBasic::read::<H::CpuHal>();
        if config.check_vmx_basic {
            if let Err(reason) = vmx_basic.validate() {
                error!("[vtx] {reason}");
                return Err(VmxError::Unsupported(reason.into()));
            }
        }

        if lock == FeatureLock::Unlocked && config.lock_feature_control {
            let ctrl = FeatureControl::read::<H::CpuHal>();
            unsafe {
                FeatureControl::write::<H::CpuHal>(
                    ctrl | FeatureControlFlags::LOCKED
                        | FeatureControlFlags::VMXON_ENABLED_OUTSIDE_SMX,
                )
            };
            debug!("[vtx] locked IA32_FEATURE_CONTROL with VMXON enabled outside SMX");
        }
        self.vmcs_revision_id = vmx_basic.revision_id;

        // Enable VMX using the VMXE bit. It stays set for the rest of the session.
        unsafe { H::CpuHal::set_vmxe() };

        let region = allocate_region::<H>().inspect_err(|_| {
            error!("[vtx] failed to allocate VMXON region");
        })?;
        self.state = RootOperationState::ModeBitSet;
        Ok(regions.insert(region))
    }

    /// Executes `VMXON` on `region`.
    ///
    /// On success the region stays owned until [`Self::leave`]. On any
    /// failure after the handle is validated the region is released and the
    /// state returns to [`RootOperationState::Disabled`].
    pub fn enter(&mut self, regions: &mut Regions<H>, region: RegionHandle) -> Result {
        if self.is_enabled() {
            return Err(VmxError::VmxAlreadyEnabled);
        }
        let paddr = regions
            .get(region)
            .ok_or(VmxError::InvalidRegionHandle)?
            .phys_addr();

        if !H::CpuHal::vmxe_enabled() {
            regions.release(region)?;
            self.state = RootOperationState::Disabled;
            return Err(VmxError::VmxNotEnabled);
        }
        self.state = RootOperationState::ModeBitSet;

        match unsafe { H::CpuHal::vmxon(paddr) } {
            Ok(()) => {
                self.vmxon_region = Some(region);
                self.state = RootOperationState::RootActive;
                info!("[vtx] succeeded to turn on VMX (VMXON region @ {paddr:#x}).");
                Ok(())
            }
            Err(err) => {
                error!("[vtx] VMXON failed: {err:?}");
                regions.release(region)?;
                self.state = RootOperationState::Disabled;
                Err(as_vmx_err("vmxon", err))
            }
        }
    }

    /// Executes `VMXOFF` and frees the VMXON region. Does nothing when no
    /// region is held.
    pub fn leave(&mut self, regions: &mut Regions<H>) {
        let Some(region) = self.vmxon_region.take() else {
            return;
        };

        match unsafe { H::CpuHal::vmxoff() } {
            Ok(()) => info!("[vtx] succeeded to turn off VMX."),
            Err(err) => error!("[vtx] VMXOFF failed: {err:?}"),
        }
        if let Err(err) = regions.release(region) {
            warn!("[vtx] VMXON region already gone: {err}");
        }
        self.state = RootOperationState::Disabled;
    }
}

impl<H: Hal> Default for VmxPerCpuState<H> {
    fn default() -> Self {
        Self::new()
    }
}
