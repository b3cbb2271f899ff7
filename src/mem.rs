use core::marker::PhantomData;

use memory_addr::{MemoryAddr, PAGE_SIZE_4K as PAGE_SIZE};

use crate::hal::MmHal;
use crate::{HostPhysAddr, Result, VmxError};

/// A physical frame which will be automatically deallocated when dropped.
///
/// The frame is allocated using the [`MmHal`] implementation and is always
/// 4 KiB in size and alignment.
#[derive(Debug)]
pub struct PhysFrame<H: MmHal> {
    start_paddr: HostPhysAddr,
    _marker: PhantomData<H>,
}

impl<H: MmHal> PhysFrame<H> {
    /// Allocate a [`PhysFrame`].
    pub fn alloc() -> Result<Self> {
        let start_paddr = H::alloc_frame().ok_or(VmxError::MemoryAllocationFailed)?;
        assert_ne!(start_paddr.as_usize(), 0);
        assert!(
            start_paddr.is_aligned_4k(),
            "frame {start_paddr:#x} is not page aligned"
        );
        debug!("[vtx] allocated PhysFrame({start_paddr:#x})");
        Ok(Self {
            start_paddr,
            _marker: PhantomData,
        })
    }

    /// Allocate a [`PhysFrame`] and fill it with zeros.
    pub fn alloc_zero() -> Result<Self> {
        let mut f = Self::alloc()?;
        f.fill(0);
        Ok(f)
    }

    /// Get the starting physical address of the frame.
    pub fn start_paddr(&self) -> HostPhysAddr {
        self.start_paddr
    }

    /// Get a mutable pointer to the frame.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        H::phys_to_virt(self.start_paddr).as_mut_ptr()
    }

    /// The whole frame as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.as_mut_ptr(), PAGE_SIZE) }
    }

    /// Fill the frame with a byte.
    pub fn fill(&mut self, byte: u8) {
        unsafe { core::ptr::write_bytes(self.as_mut_ptr(), byte, PAGE_SIZE) }
    }
}

impl<H: MmHal> Drop for PhysFrame<H> {
    fn drop(&mut self) {
        H::dealloc_frame(self.start_paddr);
        debug!("[vtx] deallocated PhysFrame({:#x})", self.start_paddr);
    }
}
