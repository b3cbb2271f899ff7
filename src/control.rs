//! Control-request interface between a user-space front end and the driver.
//!
//! The payload layout matches `struct vtx_vm_config { char name[32];
//! unsigned long guest_mem_size; }` on x86_64.

use alloc::format;
use core::fmt;

use crate::{Result, VmxError};

/// Name of the character device the front end opens.
pub const DEVICE_NAME: &str = "vtx";

/// Size of the NUL-padded name field, terminator included.
pub const VM_NAME_LEN: usize = 32;

/// Guest memory size the control tool sends by default.
pub const DEFAULT_GUEST_MEM_SIZE: u64 = 0x20_0000;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;
const IOC_WRITE: u32 = 1;

/// Linux `_IOW(ty, nr, size)`.
pub const fn iow(ty: u8, nr: u8, size: usize) -> u32 {
    (IOC_WRITE << IOC_DIRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
}

pub const VTX_IOCTL_CREATE_VM: u32 = iow(b'v', 1, VmCreateRequest::WIRE_SIZE);

/// Opaque "create VM" payload. Only logged and echoed back.
#[derive(Clone, PartialEq, Eq)]
pub struct VmCreateRequest {
    name: [u8; VM_NAME_LEN],
    guest_mem_size: u64,
}

impl VmCreateRequest {
    pub const WIRE_SIZE: usize = VM_NAME_LEN + 8;

    /// Builds a request, truncating `name` to at most 31 bytes on a
    /// character boundary.
    pub fn new(name: &str, guest_mem_size: u64) -> Self {
        let mut len = name.len().min(VM_NAME_LEN - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut buf = [0u8; VM_NAME_LEN];
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            name: buf,
            guest_mem_size,
        }
    }

    pub fn with_default_mem(name: &str) -> Self {
        Self::new(name, DEFAULT_GUEST_MEM_SIZE)
    }

    /// The name up to the first NUL, cut before any invalid UTF-8.
    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(VM_NAME_LEN);
        match core::str::from_utf8(&self.name[..end]) {
            Ok(name) => name,
            Err(err) => core::str::from_utf8(&self.name[..err.valid_up_to()]).unwrap_or_default(),
        }
    }

    pub fn guest_mem_size(&self) -> u64 {
        self.guest_mem_size
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::WIRE_SIZE {
            return Err(VmxError::BadAddress);
        }
        let mut name = [0u8; VM_NAME_LEN];
        name.copy_from_slice(&bytes[..VM_NAME_LEN]);
        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[VM_NAME_LEN..Self::WIRE_SIZE]);
        Ok(Self {
            name,
            guest_mem_size: u64::from_le_bytes(size),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut bytes = [0u8; Self::WIRE_SIZE];
        bytes[..VM_NAME_LEN].copy_from_slice(&self.name);
        bytes[VM_NAME_LEN..].copy_from_slice(&self.guest_mem_size.to_le_bytes());
        bytes
    }
}

impl fmt::Debug for VmCreateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmCreateRequest")
            .field("name", &self.name())
            .field("guest_mem_size", &format_args!("{:#x}", self.guest_mem_size))
            .finish()
    }
}

/// A decoded control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    CreateVm(VmCreateRequest),
}

impl ControlRequest {
    pub fn decode(cmd: u32, payload: &[u8]) -> Result<Self> {
        match cmd {
            VTX_IOCTL_CREATE_VM => Ok(Self::CreateVm(VmCreateRequest::from_bytes(payload)?)),
            _ => Err(VmxError::InvalidInput(format!("unknown command {cmd:#x}"))),
        }
    }
}
