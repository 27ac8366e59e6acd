//! # microdos
//!
//! A minimal 16-bit DOS emulator for Linux KVM.
//!
//! microdos loads a flat `.com` executable into a hardware-virtualized
//! real-mode guest and services a small subset of the DOS runtime
//! (console and handle I/O, the program segment prefix, graceful
//! termination) so simple text-mode DOS programs run unmodified.
//!
//! Software interrupts never execute guest-side handlers. Every vector
//! in the interrupt table points into a page of `HLT` instructions, so
//! an `INT 21h` becomes a VM exit the host recognizes, services, and
//! returns from with a synthesized interrupt return.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use microdos::{DosVmBuilder, Result};
//!
//! fn main() -> Result<()> {
//!     let mut vm = DosVmBuilder::new()
//!         .image("hello.com")
//!         .arg("world")
//!         .build()?;
//!
//!     let status = vm.run()?;
//!     std::process::exit(status as i32);
//! }
//! ```

mod arena;
mod builder;
mod error;
mod regs;
mod vm;

pub mod backend;
pub mod boot;
pub mod debug;
pub mod dos;

// Re-exports
pub use arena::{GuestArena, PhysicalSlot, MEM_SIZE};
pub use builder::DosVmBuilder;
pub use error::{Error, Result};
pub use regs::GuestCpu;
pub use vm::{DosVm, VmConfig, VmState};

/// Check if the current host supports hardware virtualization.
///
/// Returns `true` if KVM is available and can be used.
pub fn is_supported() -> bool {
    backend::is_available()
}

/// Get the name of the hypervisor backend for the current host.
///
/// Returns `None` if no backend is available.
pub fn backend_name() -> Option<&'static str> {
    backend::name()
}
