//! A simulated processor and frame allocator.
//!
//! State is thread-local, so every test (each runs on its own thread) sees an
//! independent machine. Call [`MockMachine::reset`] at the start of a test.

extern crate std;

use alloc::collections::BTreeSet;
use alloc::vec::Vec;
use core::cell::RefCell;
use std::alloc::Layout;

use memory_addr::PAGE_SIZE_4K as PAGE_SIZE;

use crate::hal::{CpuHal, Hal, MmHal, VmFail};
use crate::msr::Msr;
use crate::vmx::{FeatureControlFlags, REVISION_ID_MASK};
use crate::{HostPhysAddr, HostVirtAddr};

pub const MOCK_REVISION_ID: u32 = 0x12;

/// Revision 0x12, 4 KiB regions, write-back, 64-bit addresses.
pub const MOCK_VMX_BASIC: u64 =
    MOCK_REVISION_ID as u64 | (0x1000u64 << 32) | (6u64 << 50) | (1u64 << 54) | (1u64 << 55);

/// Fresh frames are filled with this byte so zeroing is observable.
pub const GARBAGE: u8 = 0xa5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEvent {
    AllocFrame(usize),
    DeallocFrame(usize),
    WriteMsr(Msr, u64),
    SetVmxe,
    Vmxon(usize),
    Vmxoff,
}

#[derive(Debug)]
pub struct MockMachine {
    pub has_vmx: bool,
    pub feature_control: u64,
    pub vmx_basic: u64,
    pub vmxe: bool,
    pub in_root_operation: bool,
    /// Allocations left before the allocator reports exhaustion.
    pub alloc_budget: Option<usize>,
    /// Upcoming `VMXON`s that fail with VMfailInvalid.
    pub vmxon_failures: usize,
    pub vmxon_calls: usize,
    pub live_frames: BTreeSet<usize>,
    pub events: Vec<MockEvent>,
}

impl Default for MockMachine {
    fn default() -> Self {
        Self {
            has_vmx: true,
            feature_control: (FeatureControlFlags::LOCKED
                | FeatureControlFlags::VMXON_ENABLED_OUTSIDE_SMX)
                .bits(),
            vmx_basic: MOCK_VMX_BASIC,
            vmxe: false,
            in_root_operation: false,
            alloc_budget: None,
            vmxon_failures: 0,
            vmxon_calls: 0,
            live_frames: BTreeSet::new(),
            events: Vec::new(),
        }
    }
}

std::thread_local! {
    static MACHINE: RefCell<MockMachine> = RefCell::new(MockMachine::default());
}

fn frame_layout() -> Layout {
    Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap()
}

impl MockMachine {
    pub fn reset() {
        MACHINE.with(|m| *m.borrow_mut() = Self::default());
    }

    pub fn with<R>(f: impl FnOnce(&mut MockMachine) -> R) -> R {
        MACHINE.with(|m| f(&mut m.borrow_mut()))
    }

    pub fn events() -> Vec<MockEvent> {
        Self::with(|m| m.events.clone())
    }

    pub fn clear_events() {
        Self::with(|m| m.events.clear());
    }

    pub fn dealloc_count(paddr: HostPhysAddr) -> usize {
        let paddr = paddr.as_usize();
        Self::with(|m| {
            m.events
                .iter()
                .filter(|e| **e == MockEvent::DeallocFrame(paddr))
                .count()
        })
    }

    /// Whether any privileged write reached the processor.
    pub fn touched_processor(&self) -> bool {
        self.events.iter().any(|e| {
            matches!(
                e,
                MockEvent::WriteMsr(..) | MockEvent::SetVmxe | MockEvent::Vmxon(_)
            )
        })
    }
}

#[derive(Debug)]
pub struct MockMmHal;

impl MmHal for MockMmHal {
    fn alloc_frame() -> Option<HostPhysAddr> {
        MockMachine::with(|m| {
            if let Some(budget) = m.alloc_budget.as_mut() {
                if *budget == 0 {
                    return None;
                }
                *budget -= 1;
            }
            let ptr = unsafe { std::alloc::alloc(frame_layout()) };
            if ptr.is_null() {
                return None;
            }
            unsafe { core::ptr::write_bytes(ptr, GARBAGE, PAGE_SIZE) };
            let addr = ptr as usize;
            m.live_frames.insert(addr);
            m.events.push(MockEvent::AllocFrame(addr));
            Some(HostPhysAddr::from_usize(addr))
        })
    }

    fn dealloc_frame(paddr: HostPhysAddr) {
        let addr = paddr.as_usize();
        MockMachine::with(|m| {
            assert!(m.live_frames.remove(&addr), "double free of frame {addr:#x}");
            m.events.push(MockEvent::DeallocFrame(addr));
        });
        unsafe { std::alloc::dealloc(addr as *mut u8, frame_layout()) };
    }

    fn phys_to_virt(paddr: HostPhysAddr) -> HostVirtAddr {
        HostVirtAddr::from_usize(paddr.as_usize())
    }
}

#[derive(Debug)]
pub struct MockCpuHal;

impl CpuHal for MockCpuHal {
    fn has_vmx() -> bool {
        MockMachine::with(|m| m.has_vmx)
    }

    fn read_msr(msr: Msr) -> u64 {
        MockMachine::with(|m| match msr {
            Msr::IA32_FEATURE_CONTROL => m.feature_control,
            Msr::IA32_VMX_BASIC => m.vmx_basic,
        })
    }

    unsafe fn write_msr(msr: Msr, value: u64) {
        MockMachine::with(|m| {
            match msr {
                Msr::IA32_FEATURE_CONTROL => {
                    assert_eq!(
                        m.feature_control & FeatureControlFlags::LOCKED.bits(),
                        0,
                        "write to a locked IA32_FEATURE_CONTROL"
                    );
                    m.feature_control = value;
                }
                Msr::IA32_VMX_BASIC => panic!("IA32_VMX_BASIC is read-only"),
            }
            m.events.push(MockEvent::WriteMsr(msr, value));
        })
    }

    fn vmxe_enabled() -> bool {
        MockMachine::with(|m| m.vmxe)
    }

    unsafe fn set_vmxe() {
        MockMachine::with(|m| {
            m.vmxe = true;
            m.events.push(MockEvent::SetVmxe);
        })
    }

    unsafe fn vmxon(paddr: HostPhysAddr) -> Result<(), VmFail> {
        let addr = paddr.as_usize();
        MockMachine::with(|m| {
            m.vmxon_calls += 1;
            m.events.push(MockEvent::Vmxon(addr));
            if m.vmxon_failures > 0 {
                m.vmxon_failures -= 1;
                return Err(VmFail::VmFailInvalid);
            }
            let enabled =
                FeatureControlFlags::LOCKED | FeatureControlFlags::VMXON_ENABLED_OUTSIDE_SMX;
            let feature_control = FeatureControlFlags::from_bits_truncate(m.feature_control);
            if !m.vmxe || !feature_control.contains(enabled) {
                return Err(VmFail::VmFailInvalid);
            }
            if m.in_root_operation {
                return Err(VmFail::VmFailValid);
            }
            if addr % PAGE_SIZE != 0 || !m.live_frames.contains(&addr) {
                return Err(VmFail::VmFailInvalid);
            }
            let revision = unsafe { (addr as *const u32).read_volatile() };
            if revision != m.vmx_basic as u32 & REVISION_ID_MASK {
                return Err(VmFail::VmFailInvalid);
            }
            m.in_root_operation = true;
            Ok(())
        })
    }

    unsafe fn vmxoff() -> Result<(), VmFail> {
        MockMachine::with(|m| {
            m.events.push(MockEvent::Vmxoff);
            if !m.in_root_operation {
                return Err(VmFail::VmFailInvalid);
            }
            m.in_root_operation = false;
            Ok(())
        })
    }
}

#[derive(Debug)]
pub struct MockHal;

impl Hal for MockHal {
    type MmHal = MockMmHal;
    type CpuHal = MockCpuHal;
}
