use core::marker::PhantomData;

use crate::arena::{RegionArena, RegionHandle};
use crate::control::VmCreateRequest;
use crate::hal::Hal;
use crate::vmx::{VmxPerCpuState, allocate_region};
use crate::{Result, VmxError};

/// Prepares the VMCS region for a "create VM" request.
///
/// The region is stamped but never loaded with `VMPTRLD`; it stays inert. At
/// most one is outstanding: a new request releases the previous region once
/// its replacement is allocated, and only then installs the replacement.
#[derive(Debug)]
pub struct VmcsProvisioner<H: Hal> {
    vmcs_region: Option<RegionHandle>,
    last_request: Option<VmCreateRequest>,
    _marker: PhantomData<H>,
}

impl<H: Hal> VmcsProvisioner<H> {
    pub const fn new() -> Self {
        Self {
            vmcs_region: None,
            last_request: None,
            _marker: PhantomData,
        }
    }

    pub fn vmcs_region(&self) -> Option<RegionHandle> {
        self.vmcs_region
    }

    /// The request that produced the current VMCS region.
    pub fn last_request(&self) -> Option<&VmCreateRequest> {
        self.last_request.as_ref()
    }

    pub fn provision(
        &mut self,
        percpu: &VmxPerCpuState<H>,
        regions: &mut RegionArena<H::MmHal>,
        request: &VmCreateRequest,
    ) -> Result<RegionHandle> {
        if !percpu.is_enabled() {
            return Err(VmxError::VmxNotEnabled);
        }
        info!(
            "[vtx] creating VM: {} with mem {:#x}",
            request.name(),
            request.guest_mem_size()
        );

        let region = allocate_region::<H>().inspect_err(|_| {
            error!("[vtx] failed to allocate VMCS region for {}", request.name());
        })?;
        if let Some(old) = self.vmcs_region.take() {
            warn!("[vtx] replacing the VMCS region of the previous VM");
            if let Err(err) = regions.release(old) {
                warn!("[vtx] previous VMCS region already gone: {err}");
            }
        }

        let handle = regions.insert(region);
        self.vmcs_region = Some(handle);
        self.last_request = Some(request.clone());
        Ok(handle)
    }

    /// Frees the VMCS region, if any.
    pub fn release(&mut self, regions: &mut RegionArena<H::MmHal>) {
        if let Some(handle) = self.vmcs_region.take() {
            if let Err(err) = regions.release(handle) {
                warn!("[vtx] VMCS region already gone: {err}");
            }
        }
        self.last_request = None;
    }
}

impl<H: Hal> Default for VmcsProvisioner<H> {
    fn default() -> Self {
        Self::new()
    }
}
