//! Initial guest state.
//!
//! Everything the guest sees before its first instruction is built here:
//! the magic interrupt vector table, the HLT trampoline page, the Program
//! Segment Prefix, the loaded `.com` image, and the seeded register file.
//!
//! The layout is a contract with the exit dispatcher: an `INT n` in the
//! guest vectors through the table to `0x0040:n`, executes a `HLT`, and
//! exits the VM at a `(CS, IP)` pair the dispatcher recognizes.

use crate::arena::GuestArena;
use crate::error::{Error, Result};
use crate::regs::{load_real_mode_segment, GuestCpu, FLAGS_RESERVED};

/// Guest physical memory layout.
pub mod layout {
    /// Start of the writable KVM memory slot. Must be a multiple of the
    /// host page size; everything below it is mapped through a separate
    /// read-only slot so the interrupt table cannot be overwritten.
    pub const GUEST_MEM_MODULE_START: u64 = 0x1000;

    /// Segment paragraph of the PSP. Program code lives at
    /// `BASE_PARA:0x0100`, the stack grows down from `BASE_PARA:0xFFFE`.
    pub const BASE_PARA: u16 = 0x0100;

    /// Physical address of the PSP.
    pub const PSP_ADDR: usize = (BASE_PARA as usize) << 4;

    /// Size of the PSP in bytes.
    pub const PSP_SIZE: usize = 0x100;

    /// Physical address the `.com` image is copied to.
    pub const IMAGE_ADDR: usize = PSP_ADDR + PSP_SIZE;

    /// First byte above conventional DOS memory.
    pub const CONVENTIONAL_TOP: usize = 0xA0000;

    /// Paragraph of the top of memory, reported in the PSP.
    pub const MEM_TOP_PARA: u16 = 0xA000;

    /// Largest `.com` image that fits between the PSP and 0xA0000.
    pub const MAX_IMAGE_SIZE: usize = CONVENTIONAL_TOP - IMAGE_ADDR;

    /// Selector all interrupt vectors point at.
    pub const TRAMPOLINE_SELECTOR: u16 = 0x0040;

    /// Physical address of the trampoline code page.
    pub const TRAMPOLINE_ADDR: usize = (TRAMPOLINE_SELECTOR as usize) << 4;

    /// The `HLT` opcode; the trampoline page is 256 of these, one per
    /// interrupt number.
    pub const HLT_OPCODE: u8 = 0xF4;

    /// Number of interrupt vectors.
    pub const IVT_ENTRIES: usize = 256;

    /// Entry point of a `.com` program within its segment.
    pub const ENTRY_IP: u16 = 0x0100;

    /// Initial stack pointer. The word at SS:SP is zero, so a final `RET`
    /// lands on the PSP's `INT 20h` and terminates cleanly.
    pub const INITIAL_SP: u16 = 0xFFFE;

    /// PSP field offsets.
    pub mod psp {
        /// `INT 20h` opcode bytes (`CD 20`).
        pub const INT20: usize = 0x00;
        /// Paragraph of the top of memory.
        pub const MEM_TOP: usize = 0x02;
        /// Length byte of the command-line tail.
        pub const CMD_TAIL_LEN: usize = 0x80;
        /// First byte of the command-line tail.
        pub const CMD_TAIL: usize = 0x81;
        /// Maximum encoded tail length.
        pub const CMD_TAIL_MAX: usize = 127;
    }
}

/// Write the magic interrupt vector table and the trampoline page.
///
/// Entry `i` is the far pointer `0x0040:i`; the byte it points at is a
/// `HLT`. Any `INT n` the guest raises therefore exits the VM at
/// `CS=0x0040, IP=n+1`.
pub fn write_interrupt_table(arena: &mut GuestArena) -> Result<()> {
    for i in 0..layout::IVT_ENTRIES {
        let vector = ((layout::TRAMPOLINE_SELECTOR as u32) << 16) | i as u32;
        arena.write_obj(4 * i, vector)?;
    }
    arena.fill(
        layout::TRAMPOLINE_ADDR,
        layout::IVT_ENTRIES,
        layout::HLT_OPCODE,
    )
}

/// Copy the `.com` image to `BASE_PARA:0x0100`.
pub fn load_image(arena: &mut GuestArena, image: &[u8]) -> Result<()> {
    if image.len() > layout::MAX_IMAGE_SIZE {
        return Err(Error::GuestImageTooLarge {
            size: image.len(),
            limit: layout::MAX_IMAGE_SIZE,
        });
    }
    arena.write(layout::IMAGE_ADDR, image)
}

/// Encode the DOS command-line tail: one leading space, then the
/// arguments joined by single spaces. Empty when there are no arguments.
pub fn encode_command_tail(args: &[String]) -> Result<Vec<u8>> {
    let mut tail = Vec::new();
    for arg in args {
        tail.push(b' ');
        tail.extend_from_slice(arg.as_bytes());
    }
    if tail.len() > layout::psp::CMD_TAIL_MAX {
        return Err(Error::CommandLineOverflow {
            len: tail.len(),
            limit: layout::psp::CMD_TAIL_MAX,
        });
    }
    Ok(tail)
}

/// Build the Program Segment Prefix at `BASE_PARA:0000`.
///
/// Only the fields this emulator honors are populated: the `INT 20h`
/// termination opcode, the top-of-memory paragraph, and the command-line
/// tail with its carriage-return terminator.
///
/// With a maximum-length tail (127 bytes) the terminator lands one byte
/// past the PSP, at `IMAGE_ADDR`. Callers must load the program image
/// after the PSP so that byte belongs to the image again.
pub fn write_psp(arena: &mut GuestArena, tail: &[u8]) -> Result<()> {
    debug_assert!(tail.len() <= layout::psp::CMD_TAIL_MAX);

    arena.write(layout::PSP_ADDR + layout::psp::INT20, &[0xCD, 0x20])?;
    arena.write_obj(layout::PSP_ADDR + layout::psp::MEM_TOP, layout::MEM_TOP_PARA)?;

    arena.write_obj(layout::PSP_ADDR + layout::psp::CMD_TAIL_LEN, tail.len() as u8)?;
    arena.write(layout::PSP_ADDR + layout::psp::CMD_TAIL, tail)?;
    arena.write_obj(layout::PSP_ADDR + layout::psp::CMD_TAIL + tail.len(), 0x0Du8)
}

/// Seed the register file for entry at `BASE_PARA:0x0100` and plant the
/// zero return address at SS:SP.
pub fn seed_registers(cpu: &mut GuestCpu, arena: &mut GuestArena) -> Result<()> {
    for seg in [
        &mut cpu.sregs.cs,
        &mut cpu.sregs.ds,
        &mut cpu.sregs.es,
        &mut cpu.sregs.fs,
        &mut cpu.sregs.gs,
        &mut cpu.sregs.ss,
    ] {
        load_real_mode_segment(seg, layout::BASE_PARA);
    }

    cpu.regs.rsp = layout::INITIAL_SP as u64;
    cpu.regs.rip = layout::ENTRY_IP as u64;
    cpu.regs.rflags = FLAGS_RESERVED;

    arena.write_obj(
        GuestArena::physical(layout::BASE_PARA, layout::INITIAL_SP),
        0u16,
    )
}

/// Run the whole bootstrap sequence against a fresh arena.
///
/// The PSP is written before the image: a maximum-length tail's
/// terminator overhangs into `IMAGE_ADDR`, and the image's first byte
/// must win.
pub fn bootstrap(
    arena: &mut GuestArena,
    cpu: &mut GuestCpu,
    image: &[u8],
    args: &[String],
) -> Result<()> {
    write_interrupt_table(arena)?;
    let tail = encode_command_tail(args)?;
    write_psp(arena, &tail)?;
    load_image(arena, image)?;
    seed_registers(cpu, arena)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::MEM_SIZE;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_interrupt_table_entries() {
        let mut arena = GuestArena::new().unwrap();
        write_interrupt_table(&mut arena).unwrap();

        assert_eq!(arena.read_obj::<u32>(0).unwrap(), 0x0040_0000);
        assert_eq!(arena.read_obj::<u32>(4 * 0x21).unwrap(), 0x0040_0021);
        assert_eq!(arena.read_obj::<u32>(4 * 0xFF).unwrap(), 0x0040_00FF);
    }

    #[test]
    fn test_trampoline_is_all_hlt() {
        let mut arena = GuestArena::new().unwrap();
        write_interrupt_table(&mut arena).unwrap();

        let mut page = [0u8; layout::IVT_ENTRIES];
        arena.read(layout::TRAMPOLINE_ADDR, &mut page).unwrap();
        assert!(page.iter().all(|&b| b == layout::HLT_OPCODE));
    }

    #[test]
    fn test_load_image() {
        let mut arena = GuestArena::new().unwrap();
        load_image(&mut arena, b"\xB4\x09\xCD\x21").unwrap();

        let mut loaded = [0u8; 4];
        arena.read(layout::IMAGE_ADDR, &mut loaded).unwrap();
        assert_eq!(&loaded, b"\xB4\x09\xCD\x21");
    }

    #[test]
    fn test_oversized_image_rejected() {
        let mut arena = GuestArena::new().unwrap();
        let image = vec![0x90; layout::MAX_IMAGE_SIZE + 1];
        assert!(matches!(
            load_image(&mut arena, &image),
            Err(Error::GuestImageTooLarge { .. })
        ));
    }

    #[test]
    fn test_image_at_limit_accepted() {
        let mut arena = GuestArena::new().unwrap();
        let image = vec![0x90; layout::MAX_IMAGE_SIZE];
        assert!(load_image(&mut arena, &image).is_ok());
    }

    #[test]
    fn test_command_tail_encoding() {
        assert_eq!(encode_command_tail(&[]).unwrap(), b"");
        assert_eq!(
            encode_command_tail(&strings(&["foo", "bar"])).unwrap(),
            b" foo bar"
        );
    }

    #[test]
    fn test_command_tail_length_boundary() {
        // " " + 126 characters = exactly 127 encoded bytes.
        let at_limit = "x".repeat(126);
        let tail = encode_command_tail(&strings(&[&at_limit])).unwrap();
        assert_eq!(tail.len(), 127);

        let over_limit = "x".repeat(127);
        let err = encode_command_tail(&strings(&[&over_limit])).unwrap_err();
        assert!(matches!(err, Error::CommandLineOverflow { len: 128, .. }));
    }

    #[test]
    fn test_psp_contents() {
        let mut arena = GuestArena::new().unwrap();
        let tail = encode_command_tail(&strings(&["a", "b"])).unwrap();
        write_psp(&mut arena, &tail).unwrap();

        let mut head = [0u8; 4];
        arena.read(layout::PSP_ADDR, &mut head).unwrap();
        assert_eq!(&head[..2], &[0xCD, 0x20]);
        assert_eq!(
            arena
                .read_obj::<u16>(layout::PSP_ADDR + layout::psp::MEM_TOP)
                .unwrap(),
            layout::MEM_TOP_PARA
        );

        assert_eq!(
            arena
                .read_obj::<u8>(layout::PSP_ADDR + layout::psp::CMD_TAIL_LEN)
                .unwrap(),
            4
        );
        let mut encoded = [0u8; 5];
        arena
            .read(layout::PSP_ADDR + layout::psp::CMD_TAIL, &mut encoded)
            .unwrap();
        assert_eq!(&encoded, b" a b\x0D");
    }

    #[test]
    fn test_boundary_tail_terminator_does_not_clobber_image() {
        let mut arena = GuestArena::new().unwrap();
        let mut cpu = GuestCpu::default();
        // " " + 126 characters encodes to exactly 127 tail bytes, so the
        // CR terminator falls on IMAGE_ADDR.
        let long = "x".repeat(126);
        let image = b"\xB8\x2A\x4C\xCD\x21"; // mov ax, 0x4C2A; int 21h
        bootstrap(&mut arena, &mut cpu, image, &strings(&[&long])).unwrap();

        assert_eq!(
            arena
                .read_obj::<u8>(layout::PSP_ADDR + layout::psp::CMD_TAIL_LEN)
                .unwrap(),
            127
        );
        assert_eq!(arena.read_obj::<u8>(layout::IMAGE_ADDR).unwrap(), 0xB8);
    }

    #[test]
    fn test_seed_registers() {
        let mut arena = GuestArena::new().unwrap();
        let mut cpu = GuestCpu::default();
        seed_registers(&mut cpu, &mut arena).unwrap();

        for seg in [
            &cpu.sregs.cs,
            &cpu.sregs.ds,
            &cpu.sregs.es,
            &cpu.sregs.fs,
            &cpu.sregs.gs,
            &cpu.sregs.ss,
        ] {
            assert_eq!(seg.selector, layout::BASE_PARA);
            assert_eq!(seg.base, (seg.selector as u64) << 4);
        }
        assert_eq!(cpu.sp(), layout::INITIAL_SP);
        assert_eq!(cpu.ip(), layout::ENTRY_IP);
        assert_eq!(cpu.regs.rflags, FLAGS_RESERVED);

        // The planted return address: RET at program end jumps to the
        // PSP's INT 20h.
        let ret: u16 = arena
            .read_obj(GuestArena::physical(layout::BASE_PARA, layout::INITIAL_SP))
            .unwrap();
        assert_eq!(ret, 0);
    }

    #[test]
    fn test_layout_fits_in_arena() {
        assert!(layout::CONVENTIONAL_TOP < MEM_SIZE);
        assert_eq!(layout::TRAMPOLINE_ADDR, 0x400);
        assert_eq!(layout::IMAGE_ADDR, 0x1100);
        // The whole bootstrap footprint sits below the writable slot only
        // where intended: IVT and trampoline in the read-only page.
        assert!(layout::TRAMPOLINE_ADDR + layout::IVT_ENTRIES <= 0x1000);
        assert_eq!(layout::PSP_ADDR as u64, layout::GUEST_MEM_MODULE_START);
    }
}
