//! The DOS virtual machine: bootstrap plus the exit dispatch loop.

use std::path::PathBuf;
use std::time::Duration;

use crate::arena::GuestArena;
use crate::backend::kvm::{KvmVm, VcpuExit};
use crate::boot::{self, layout};
use crate::debug::{TRACE_EXITS, TRACE_SERVICES};
use crate::debug_trace;
use crate::dos::{Console, DosAction, DosKernel};
use crate::error::{Error, Result};
use crate::regs::{load_real_mode_segment, GuestCpu};

/// Size of the (FLAGS, CS, IP) frame an `INT` pushes: three 16-bit words.
const IRET_FRAME_LEN: usize = 6;

/// How long to stall the guest after an I/O-port exit. There is no
/// device model; the sleep keeps a port-polling guest from spinning the
/// host CPU.
const IO_THROTTLE: Duration = Duration::from_secs(1);

/// Configuration for a DOS VM, assembled by
/// [`DosVmBuilder`](crate::DosVmBuilder).
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Path to the flat `.com` image.
    pub image: PathBuf,
    /// DOS command-line arguments, encoded into the PSP tail.
    pub args: Vec<String>,
    /// Reply "invalid function" to unrecognized INT 21h subfunctions
    /// instead of terminating.
    pub lenient_services: bool,
}

/// The state of a DOS VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Bootstrapped but not yet resumed.
    Created,
    /// Guest code is running (or about to be resumed).
    Running,
    /// A trapped software interrupt is being serviced.
    Dispatching,
    /// The guest terminated or a fatal exit occurred.
    Terminated,
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmState::Created => write!(f, "created"),
            VmState::Running => write!(f, "running"),
            VmState::Dispatching => write!(f, "dispatching"),
            VmState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Decode a halt exit into a software-interrupt number.
///
/// An `INT n` vectors through the magic table to `0x0040:n`, executes the
/// `HLT` there, and leaves IP one past it. That `(selector, IP)` shape is
/// the only signal distinguishing a DOS service call from a genuine halt.
fn synthetic_int(cs: u16, ip: u16) -> Option<u8> {
    if cs != layout::TRAMPOLINE_SELECTOR {
        return None;
    }
    match ip.checked_sub(1) {
        Some(n) if (n as usize) < layout::IVT_ENTRIES => Some(n as u8),
        _ => None,
    }
}

/// Synthesize the return from an interrupt: restore the caller's CS:IP
/// and pop the three pushed words. FLAGS is intentionally not restored,
/// so carry-flag mutations made by service handlers stay visible.
fn apply_return_frame(cpu: &mut GuestCpu, ret_cs: u16, ret_ip: u16) {
    load_real_mode_segment(&mut cpu.sregs.cs, ret_cs);
    cpu.set_ip(ret_ip);
    cpu.set_sp(cpu.sp().wrapping_add(IRET_FRAME_LEN as u16));
}

/// A bootstrapped 16-bit DOS guest.
///
/// # Example
///
/// ```rust,no_run
/// use microdos::DosVmBuilder;
///
/// let mut vm = DosVmBuilder::new()
///     .image("hello.com")
///     .build()?;
/// let status = vm.run()?;
/// # Ok::<(), microdos::Error>(())
/// ```
#[derive(Debug)]
pub struct DosVm {
    arena: GuestArena,
    vm: KvmVm,
    kernel: DosKernel,
    state: VmState,
}

impl DosVm {
    /// Create and bootstrap a VM from a validated configuration.
    pub fn new(config: VmConfig) -> Result<Self> {
        let image = std::fs::read(&config.image)?;

        let mut arena = GuestArena::new()?;
        let vm = KvmVm::new(&arena)?;

        let mut cpu = vm.get_cpu()?;
        boot::bootstrap(&mut arena, &mut cpu, &image, &config.args)?;
        vm.set_cpu(&cpu)?;

        Ok(Self {
            arena,
            vm,
            kernel: DosKernel::new(Console::new(), config.lenient_services),
            state: VmState::Created,
        })
    }

    /// Get the current state of the VM.
    pub fn state(&self) -> VmState {
        self.state
    }

    /// Run the guest to termination.
    ///
    /// Returns the guest's exit status (AL for INT 21h/AH=4Ch, zero for
    /// INT 20h). Everything the host cannot recover from is an `Err`.
    ///
    /// Note that the synthetic interrupt return does not restore FLAGS
    /// from the stack frame: a handler's carry flag survives into the
    /// guest, which is how INT 21h error reporting works here.
    pub fn run(&mut self) -> Result<u8> {
        loop {
            self.state = VmState::Running;
            match self.vm.run() {
                Ok(VcpuExit::Hlt) => {
                    if let Some(status) = self.service_halt()? {
                        return Ok(status);
                    }
                }
                Ok(VcpuExit::IoIn { port, size }) => {
                    debug_trace!(TRACE_EXITS, "exit: io in port=0x{:04x} size={}", port, size);
                    std::thread::sleep(IO_THROTTLE);
                }
                Ok(VcpuExit::IoOut { port, data }) => {
                    debug_trace!(
                        TRACE_EXITS,
                        "exit: io out port=0x{:04x} data={:02x?}",
                        port,
                        data
                    );
                    std::thread::sleep(IO_THROTTLE);
                }
                Ok(VcpuExit::MmioRead { addr, len }) => {
                    self.state = VmState::Terminated;
                    return Err(Error::UnexpectedExit(format!(
                        "mmio read of {} bytes at 0x{:x}",
                        len, addr
                    )));
                }
                Ok(VcpuExit::MmioWrite { addr, data }) => {
                    self.state = VmState::Terminated;
                    return Err(Error::UnexpectedExit(format!(
                        "mmio write of {:02x?} at 0x{:x}",
                        data, addr
                    )));
                }
                Ok(VcpuExit::Shutdown) => {
                    self.state = VmState::Terminated;
                    return Err(Error::UnexpectedExit("shutdown".to_string()));
                }
                Ok(VcpuExit::Unsupported(reason)) => {
                    self.state = VmState::Terminated;
                    return Err(Error::UnexpectedExit(reason));
                }
                Err(e) => {
                    self.state = VmState::Terminated;
                    return Err(e);
                }
            }
        }
    }

    /// Handle one halt exit. Returns `Some(status)` when the guest asked
    /// to terminate, `None` when it should be resumed.
    fn service_halt(&mut self) -> Result<Option<u8>> {
        let mut cpu = self.vm.get_cpu()?;
        debug_trace!(TRACE_EXITS, "exit: hlt {}", cpu);

        let Some(int_num) = synthetic_int(cpu.sregs.cs.selector, cpu.ip()) else {
            self.state = VmState::Terminated;
            return Err(Error::UnexpectedHalt {
                cs: cpu.sregs.cs.selector,
                ip: cpu.ip(),
            });
        };

        self.state = VmState::Dispatching;

        // The frame the INT pushed: [IP₀, CS₀, FLAGS₀] at SS:SP.
        let (ret_ip, ret_cs) = {
            let frame = self
                .arena
                .translate(cpu.sregs.ss.selector, cpu.sp(), IRET_FRAME_LEN)?;
            (
                u16::from_le_bytes([frame[0], frame[1]]),
                u16::from_le_bytes([frame[2], frame[3]]),
            )
        };
        debug_trace!(
            TRACE_SERVICES,
            "int 0x{:02x} cs:{:04x} ip:{:04x}",
            int_num,
            ret_cs,
            ret_ip
        );

        match self.kernel.dispatch(int_num, &mut cpu, &mut self.arena) {
            Ok(DosAction::Continue) => {
                apply_return_frame(&mut cpu, ret_cs, ret_ip);
                self.vm.set_cpu(&cpu)?;
                Ok(None)
            }
            Ok(DosAction::Exit(status)) => {
                self.state = VmState::Terminated;
                Ok(Some(status))
            }
            Err(e) => {
                self.state = VmState::Terminated;
                Err(e)
            }
        }
    }
}
