//! Error types for microdos.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using microdos's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while bootstrapping or running a DOS guest.
///
/// Guest-visible service failures (bad handle, read/write fault) are never
/// reported through this type; they are returned to the guest as AX + CF.
#[derive(Error, Debug)]
pub enum Error {
    // Platform/hypervisor errors
    #[error("hypervisor not available on this platform")]
    HypervisorNotAvailable,

    #[error("hypervisor error: {0}")]
    HypervisorError(String),

    #[error("vCPU error: {0}")]
    VcpuError(String),

    // Configuration errors
    #[error("no guest image specified")]
    MissingImage,

    #[error("guest image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("guest image too large: {size} bytes (limit {limit})")]
    GuestImageTooLarge { size: usize, limit: usize },

    #[error("command line too long: {len} bytes (limit {limit})")]
    CommandLineOverflow { len: usize, limit: usize },

    // Guest memory errors
    #[error("memory allocation failed: {0}")]
    MemoryAllocationFailed(String),

    #[error("guest access out of bounds: {len} bytes at physical 0x{addr:05x}")]
    GuestBoundsExceeded { addr: usize, len: usize },

    // Dispatch errors
    #[error("unterminated $-string at {seg:04x}:{off:04x}")]
    StringUnterminated { seg: u16, off: u16 },

    #[error("unrecognized service: int 0x{int:02x} ah=0x{ah:02x}")]
    UnrecognizedService { int: u8, ah: u8 },

    #[error("guest halted outside the interrupt trampoline at {cs:04x}:{ip:04x}")]
    UnexpectedHalt { cs: u16, ip: u16 },

    #[error("unexpected VM exit: {0}")]
    UnexpectedExit(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
