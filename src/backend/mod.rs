//! Hypervisor backend.
//!
//! microdos targets exactly one virtualization facility: Linux KVM. The
//! probe functions let front ends fail with a clear message instead of an
//! ioctl error when the facility is missing.

pub mod kvm;

/// Check if the hypervisor is available on this host.
pub fn is_available() -> bool {
    kvm::is_available()
}

/// Get the name of the backend, if one is available.
pub fn name() -> Option<&'static str> {
    if is_available() {
        Some("kvm")
    } else {
        None
    }
}
