use spin::Mutex;

use crate::arena::{RegionArena, RegionHandle};
use crate::config::BootstrapConfig;
use crate::control::{ControlRequest, VmCreateRequest};
use crate::error::ExitCode;
use crate::hal::Hal;
use crate::vmx::{RootOperationState, VmcsProvisioner, VmxPerCpuState, VmxRegion};
use crate::{Result, VmxError};

/// The VMX driver context for one logical processor.
///
/// Owns every region it allocates. Dropping it runs [`Self::on_unload`].
#[derive(Debug)]
pub struct VmxDriver<H: Hal> {
    config: BootstrapConfig,
    regions: RegionArena<H::MmHal>,
    percpu: VmxPerCpuState<H>,
    provisioner: VmcsProvisioner<H>,
}

impl<H: Hal> VmxDriver<H> {
    pub fn new(config: BootstrapConfig) -> Self {
        Self {
            config,
            regions: RegionArena::new(),
            percpu: VmxPerCpuState::new(),
            provisioner: VmcsProvisioner::new(),
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub fn state(&self) -> RootOperationState {
        self.percpu.state()
    }

    pub fn percpu(&self) -> &VmxPerCpuState<H> {
        &self.percpu
    }

    pub fn vmcs_region(&self) -> Option<RegionHandle> {
        self.provisioner.vmcs_region()
    }

    pub fn last_request(&self) -> Option<&VmCreateRequest> {
        self.provisioner.last_request()
    }

    pub fn region(&self, handle: RegionHandle) -> Option<&VmxRegion<H::MmHal>> {
        self.regions.get(handle)
    }

    /// Number of regions currently held.
    pub fn live_regions(&self) -> usize {
        self.regions.len()
    }

    /// Brings the processor into VMX root operation.
    pub fn load(&mut self) -> Result {
        self.percpu.hardware_enable(&mut self.regions, &self.config)
    }

    /// Load hook: [`Self::load`] folded into a status code.
    pub fn on_load(&mut self) -> ExitCode {
        let code = ExitCode::from(self.load());
        if code.is_success() {
            info!("[vtx] driver loaded");
        }
        code
    }

    /// Unload hook: leaves root operation, then frees the VMCS region.
    /// Safe to call any number of times.
    pub fn on_unload(&mut self) {
        let was_loaded = self.percpu.vmxon_region().is_some();
        self.percpu.leave(&mut self.regions);
        self.provisioner.release(&mut self.regions);
        if was_loaded {
            info!("[vtx] driver unloaded");
        }
    }

    /// Handles a "create VM" request.
    pub fn create_vm(&mut self, request: &VmCreateRequest) -> Result<RegionHandle> {
        if !self.config.accept_create_vm {
            return Err(VmxError::Unsupported("create VM requests are disabled".into()));
        }
        self.provisioner
            .provision(&self.percpu, &mut self.regions, request)
    }

    /// Creates a VM with the configured default guest memory size.
    pub fn create_vm_named(&mut self, name: &str) -> Result<RegionHandle> {
        let request = VmCreateRequest::new(name, self.config.default_guest_mem_size);
        self.create_vm(&request)
    }

    /// Decodes and handles a raw control request.
    pub fn dispatch(&mut self, cmd: u32, payload: &[u8]) -> Result {
        match ControlRequest::decode(cmd, payload)? {
            ControlRequest::CreateVm(request) => self.create_vm(&request).map(drop),
        }
    }
}

impl<H: Hal> Drop for VmxDriver<H> {
    fn drop(&mut self) {
        self.on_unload();
    }
}

/// A [`VmxDriver`] shared between the lifecycle manager and the control
/// front end. Every entry point takes the lock, so requests never interleave.
pub struct VtxDevice<H: Hal> {
    driver: Mutex<VmxDriver<H>>,
}

impl<H: Hal> VtxDevice<H> {
    pub fn new(config: BootstrapConfig) -> Self {
        Self {
            driver: Mutex::new(VmxDriver::new(config)),
        }
    }

    pub fn on_load(&self) -> ExitCode {
        self.driver.lock().on_load()
    }

    pub fn on_unload(&self) {
        self.driver.lock().on_unload()
    }

    /// Control-request entry point. Returns 0 or a negated errno.
    pub fn ioctl(&self, cmd: u32, payload: &[u8]) -> i32 {
        let result = self.driver.lock().dispatch(cmd, payload);
        if let Err(err) = &result {
            warn!("[vtx] ioctl {cmd:#x} failed: {err}");
        }
        ExitCode::from(result).into()
    }

    /// Runs `f` with exclusive access to the driver.
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut VmxDriver<H>) -> R) -> R {
        f(&mut self.driver.lock())
    }
}
