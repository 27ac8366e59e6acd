//! Linux KVM harness.
//!
//! Owns the VM and VCPU file descriptors, installs the guest memory
//! slots, and classifies raw exits into an owned [`VcpuExit`] so the run
//! loop never holds a borrow of the shared `kvm_run` page.
//!
//! The slot layout is the arena's to define; the harness installs
//! whatever [`GuestArena::as_physical_slots`] reports. A guest store
//! through a read-only slot surfaces as an MMIO exit.

use std::path::Path;

use kvm_bindings::{kvm_userspace_memory_region, KVM_MEM_READONLY};
use kvm_ioctls::{Kvm, VcpuExit as RawExit, VcpuFd, VmFd};

use crate::arena::GuestArena;
use crate::error::{Error, Result};
use crate::regs::GuestCpu;

/// Check if KVM is available on this host.
pub fn is_available() -> bool {
    Path::new("/dev/kvm").exists()
}

/// Exit reason from VCPU execution, decoupled from the `kvm_run` page.
#[derive(Debug, Clone)]
pub enum VcpuExit {
    /// Guest executed HLT.
    Hlt,
    /// I/O port read.
    IoIn { port: u16, size: usize },
    /// I/O port write.
    IoOut { port: u16, data: Vec<u8> },
    /// Read from unmapped guest physical memory.
    MmioRead { addr: u64, len: usize },
    /// Write to unmapped (or read-only) guest physical memory.
    MmioWrite { addr: u64, data: Vec<u8> },
    /// Guest shutdown (e.g. triple fault).
    Shutdown,
    /// Anything else KVM reports.
    Unsupported(String),
}

/// A KVM virtual machine with a single VCPU.
#[derive(Debug)]
pub struct KvmVm {
    /// Keeps /dev/kvm open for the lifetime of the VM.
    #[allow(dead_code)]
    kvm: Kvm,
    #[allow(dead_code)]
    vm: VmFd,
    vcpu: VcpuFd,
}

impl KvmVm {
    /// Create the VM, install the memory slots for `arena`, and create
    /// the VCPU (which maps its shared exit-record page internally).
    pub fn new(arena: &GuestArena) -> Result<Self> {
        if !is_available() {
            return Err(Error::HypervisorNotAvailable);
        }

        let kvm = Kvm::new()
            .map_err(|e| Error::HypervisorError(format!("failed to open /dev/kvm: {}", e)))?;
        let vm = kvm
            .create_vm()
            .map_err(|e| Error::HypervisorError(format!("failed to create VM: {}", e)))?;

        for (index, slot) in arena.as_physical_slots().iter().enumerate() {
            let region = kvm_userspace_memory_region {
                slot: index as u32,
                flags: if slot.read_only { KVM_MEM_READONLY } else { 0 },
                guest_phys_addr: slot.guest_phys_addr,
                memory_size: slot.size,
                userspace_addr: slot.userspace_addr,
            };
            // Safety: the slots point into the arena's live mapping, which
            // outlives the VM (the arena is owned by the same DosVm).
            unsafe { vm.set_user_memory_region(region) }.map_err(|e| {
                Error::HypervisorError(format!("failed to install memory slot {}: {}", index, e))
            })?;
        }

        let vcpu = vm
            .create_vcpu(0)
            .map_err(|e| Error::VcpuError(format!("failed to create vCPU: {}", e)))?;

        Ok(Self { kvm, vm, vcpu })
    }

    /// Fetch the guest register file.
    pub fn get_cpu(&self) -> Result<GuestCpu> {
        let regs = self
            .vcpu
            .get_regs()
            .map_err(|e| Error::VcpuError(format!("KVM_GET_REGS failed: {}", e)))?;
        let sregs = self
            .vcpu
            .get_sregs()
            .map_err(|e| Error::VcpuError(format!("KVM_GET_SREGS failed: {}", e)))?;
        Ok(GuestCpu { regs, sregs })
    }

    /// Write the guest register file back.
    pub fn set_cpu(&self, cpu: &GuestCpu) -> Result<()> {
        self.vcpu
            .set_sregs(&cpu.sregs)
            .map_err(|e| Error::VcpuError(format!("KVM_SET_SREGS failed: {}", e)))?;
        self.vcpu
            .set_regs(&cpu.regs)
            .map_err(|e| Error::VcpuError(format!("KVM_SET_REGS failed: {}", e)))
    }

    /// Run the VCPU until the next exit.
    pub fn run(&mut self) -> Result<VcpuExit> {
        match self.vcpu.run() {
            Ok(RawExit::Hlt) => Ok(VcpuExit::Hlt),
            Ok(RawExit::IoIn(port, data)) => Ok(VcpuExit::IoIn {
                port,
                size: data.len(),
            }),
            Ok(RawExit::IoOut(port, data)) => Ok(VcpuExit::IoOut {
                port,
                data: data.to_vec(),
            }),
            Ok(RawExit::MmioRead(addr, data)) => Ok(VcpuExit::MmioRead {
                addr,
                len: data.len(),
            }),
            Ok(RawExit::MmioWrite(addr, data)) => Ok(VcpuExit::MmioWrite {
                addr,
                data: data.to_vec(),
            }),
            Ok(RawExit::Shutdown) => Ok(VcpuExit::Shutdown),
            Ok(other) => Ok(VcpuExit::Unsupported(format!("{:?}", other))),
            Err(e) => Err(Error::VcpuError(format!("KVM_RUN failed: {}", e))),
        }
    }
}
