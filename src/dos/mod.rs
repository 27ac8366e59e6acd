//! DOS service emulation.
//!
//! [`DosKernel::dispatch`] receives a decoded software-interrupt number
//! plus the guest register snapshot and performs the host-side action for
//! the recognized INT 20h / 21h / 10h / 29h subset. Pointer arguments are
//! resolved through the arena translator, so every handler inherits
//! bounds checking.
//!
//! Handlers report failure to the guest in DOS's own protocol: AX carries
//! the error code and CF is set. Only conditions the guest cannot be told
//! about (an unrecognized service under the strict policy, a wrapped
//! `$`-string scan) surface as host errors.

pub mod console;

pub use console::Console;

use crate::arena::GuestArena;
use crate::error::{Error, Result};
use crate::regs::GuestCpu;

/// DOS error codes returned in AX with CF set.
mod errcode {
    /// Invalid function number.
    pub const INVALID_FUNCTION: u16 = 0x01;
    /// Invalid handle.
    pub const INVALID_HANDLE: u16 = 0x06;
    /// Write fault.
    pub const WRITE_FAULT: u16 = 0x1D;
    /// Read fault.
    pub const READ_FAULT: u16 = 0x1E;
}

/// What the dispatcher should do after a service completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DosAction {
    /// Resume the guest behind the synthesized IRET.
    Continue,
    /// Terminate the emulator with the given process exit status.
    Exit(u8),
}

/// Host stream a DOS handle resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleTarget {
    /// Handles 0 (STDIN) and 4 (STDPRN).
    Input,
    /// Handle 1 (STDOUT).
    Output,
    /// Handles 2 (STDERR) and 3 (STDAUX).
    ErrorOut,
}

/// Resolve a DOS file handle. Handles 5 and up are not open.
fn handle_target(handle: u16) -> Option<HandleTarget> {
    match handle {
        0 | 4 => Some(HandleTarget::Input),
        1 => Some(HandleTarget::Output),
        2 | 3 => Some(HandleTarget::ErrorOut),
        _ => None,
    }
}

/// The DOS service subset, bound to a host console.
#[derive(Debug)]
pub struct DosKernel {
    console: Console,
    /// When set, unrecognized INT 21h subfunctions return the classic
    /// "invalid function" reply instead of terminating the emulator.
    lenient_services: bool,
}

impl DosKernel {
    pub fn new(console: Console, lenient_services: bool) -> Self {
        Self {
            console,
            lenient_services,
        }
    }

    /// Handle one software interrupt raised by the guest.
    pub fn dispatch(
        &mut self,
        int_num: u8,
        cpu: &mut GuestCpu,
        arena: &mut GuestArena,
    ) -> Result<DosAction> {
        match int_num {
            // Terminate (legacy CP/M-style exit, also the PSP's offset 0).
            0x20 => Ok(DosAction::Exit(0)),
            // Fast console write: AL to stdout.
            0x29 => {
                self.console.putc_stdout(cpu.al())?;
                Ok(DosAction::Continue)
            }
            0x10 => self.int10(cpu),
            0x21 => self.int21(cpu, arena),
            _ => Err(Error::UnrecognizedService {
                int: int_num,
                ah: cpu.ah(),
            }),
        }
    }

    /// BIOS video services. Only teletype output is provided.
    fn int10(&mut self, cpu: &mut GuestCpu) -> Result<DosAction> {
        match cpu.ah() {
            0x0E => {
                self.console.putc_stdout(cpu.al())?;
                Ok(DosAction::Continue)
            }
            ah => Err(Error::UnrecognizedService { int: 0x10, ah }),
        }
    }

    /// The INT 21h function dispatcher, AH-indexed.
    fn int21(&mut self, cpu: &mut GuestCpu, arena: &mut GuestArena) -> Result<DosAction> {
        // Success is CF=0 unless a handler reports otherwise.
        cpu.set_carry(false);

        match cpu.ah() {
            // STDAUX output, emulated by stderr.
            0x04 => {
                self.console.putc_stderr(cpu.dl())?;
                Ok(DosAction::Continue)
            }
            // STDPRN output, emulated by stdout.
            0x05 => {
                self.console.putc_stdout(cpu.dl())?;
                Ok(DosAction::Continue)
            }
            // Direct console I/O; only the output form is implemented.
            0x06 => {
                if cpu.dl() == 0xFF {
                    return self.unrecognized(0x21, 0x06, cpu);
                }
                self.console.putc_stdout(cpu.dl())?;
                Ok(DosAction::Continue)
            }
            0x09 => self.print_dollar_string(cpu, arena),
            // Get DOS version: report 5.0.
            0x30 => {
                cpu.set_ax(0x0005);
                cpu.set_bx(0xFF00);
                cpu.set_cx(0x0000);
                Ok(DosAction::Continue)
            }
            0x3F => self.read_handle(cpu, arena),
            0x40 => self.write_handle(cpu, arena),
            // Terminate with return code.
            0x4C => Ok(DosAction::Exit(cpu.al())),
            ah => self.unrecognized(0x21, ah, cpu),
        }
    }

    /// INT 21h AH=09h: write the `$`-terminated string at DS:DX.
    ///
    /// The scan is confined to the data segment: a string whose
    /// terminator would only be found after the offset wraps from 0xFFFF
    /// back to zero is a guest bug and is fatal.
    fn print_dollar_string(&mut self, cpu: &mut GuestCpu, arena: &GuestArena) -> Result<DosAction> {
        let seg = cpu.sregs.ds.selector;
        let off = cpu.dx();
        let to_segment_end = 0x1_0000 - off as usize;

        let view = arena.translate(seg, off, to_segment_end)?;
        match view.iter().position(|&b| b == b'$') {
            Some(end) => {
                self.console.write_stdout(&view[..end])?;
                Ok(DosAction::Continue)
            }
            None => Err(Error::StringUnterminated { seg, off }),
        }
    }

    /// INT 21h AH=3Fh: read CX bytes into DS:DX from the handle in BX.
    fn read_handle(&mut self, cpu: &mut GuestCpu, arena: &mut GuestArena) -> Result<DosAction> {
        let seg = cpu.sregs.ds.selector;
        let buf = arena.translate_mut(seg, cpu.dx(), cpu.cx() as usize)?;

        match handle_target(cpu.bx()) {
            Some(HandleTarget::Input) => match self.console.read_stdin(buf) {
                Ok(n) => cpu.set_ax(n as u16),
                Err(_) => fail(cpu, errcode::READ_FAULT),
            },
            // Output streams cannot be read from.
            Some(_) => fail(cpu, errcode::READ_FAULT),
            None => fail(cpu, errcode::INVALID_HANDLE),
        }
        Ok(DosAction::Continue)
    }

    /// INT 21h AH=40h: write CX bytes from DS:DX to the handle in BX.
    fn write_handle(&mut self, cpu: &mut GuestCpu, arena: &mut GuestArena) -> Result<DosAction> {
        let seg = cpu.sregs.ds.selector;
        let buf = arena.translate(seg, cpu.dx(), cpu.cx() as usize)?;

        let written = match handle_target(cpu.bx()) {
            Some(HandleTarget::Output) => self.console.write_stdout(buf),
            Some(HandleTarget::ErrorOut) => self.console.write_stderr(buf),
            // The input stream cannot be written to.
            Some(HandleTarget::Input) => {
                fail(cpu, errcode::WRITE_FAULT);
                return Ok(DosAction::Continue);
            }
            None => {
                fail(cpu, errcode::INVALID_HANDLE);
                return Ok(DosAction::Continue);
            }
        };

        match written {
            Ok(n) => cpu.set_ax(n as u16),
            Err(_) => fail(cpu, errcode::WRITE_FAULT),
        }
        Ok(DosAction::Continue)
    }

    fn unrecognized(&self, int: u8, ah: u8, cpu: &mut GuestCpu) -> Result<DosAction> {
        if self.lenient_services {
            fail(cpu, errcode::INVALID_FUNCTION);
            Ok(DosAction::Continue)
        } else {
            Err(Error::UnrecognizedService { int, ah })
        }
    }
}

/// Report a DOS error to the guest: code in AX, CF set.
fn fail(cpu: &mut GuestCpu, code: u16) {
    cpu.set_ax(code);
    cpu.set_carry(true);
}
