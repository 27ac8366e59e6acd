//! Host ends of the DOS console handles.
//!
//! The five pre-opened DOS handles all resolve to one of three host
//! streams: standard input, standard output, standard error. The streams
//! are swappable so service handlers can be exercised against in-memory
//! buffers.

use std::fmt;
use std::io::{self, Read, Write};

/// The three host streams backing the DOS handle table.
pub struct Console {
    stdin: Box<dyn Read + Send>,
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Console {
    /// A console wired to the process's standard streams.
    pub fn new() -> Self {
        Self::with_streams(
            Box::new(io::stdin()),
            Box::new(io::stdout()),
            Box::new(io::stderr()),
        )
    }

    /// A console over caller-supplied streams.
    pub fn with_streams(
        stdin: Box<dyn Read + Send>,
        stdout: Box<dyn Write + Send>,
        stderr: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
        }
    }

    /// Read up to `buf.len()` bytes from standard input.
    pub fn read_stdin(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdin.read(buf)
    }

    /// Write to standard output. Flushed immediately so guest output
    /// interleaves correctly with the host's own streams.
    pub fn write_stdout(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.stdout.write(buf)?;
        self.stdout.flush()?;
        Ok(n)
    }

    /// Write to standard error.
    pub fn write_stderr(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.stderr.write(buf)?;
        self.stderr.flush()?;
        Ok(n)
    }

    /// Write a single byte to standard output.
    pub fn putc_stdout(&mut self, byte: u8) -> io::Result<()> {
        self.write_stdout(&[byte]).map(|_| ())
    }

    /// Write a single byte to standard error.
    pub fn putc_stderr(&mut self, byte: u8) -> io::Result<()> {
        self.write_stderr(&[byte]).map(|_| ())
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
