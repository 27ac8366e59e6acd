//! VM builder for configuring and creating DOS VMs.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::vm::{DosVm, VmConfig};

/// Builder for creating a [`DosVm`].
///
/// # Example
///
/// ```rust,no_run
/// use microdos::DosVmBuilder;
///
/// let vm = DosVmBuilder::new()
///     .image("game.com")
///     .arg("/fast")
///     .build()?;
/// # Ok::<(), microdos::Error>(())
/// ```
#[derive(Default)]
pub struct DosVmBuilder {
    image: Option<PathBuf>,
    args: Vec<String>,
    lenient_services: bool,
}

impl DosVmBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path to the flat `.com` image.
    pub fn image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image = Some(path.into());
        self
    }

    /// Append one DOS command-line argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append DOS command-line arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Reply "invalid function" (AX=1, CF=1) to unrecognized INT 21h
    /// subfunctions instead of terminating the emulator.
    ///
    /// Default: off; an unrecognized service is fatal, which makes
    /// unsupported guests fail loudly rather than limp along.
    pub fn lenient_services(mut self, lenient: bool) -> Self {
        self.lenient_services = lenient;
        self
    }

    /// Build the DOS VM.
    ///
    /// Validates the configuration, then creates the hypervisor handles
    /// and bootstraps guest memory and registers.
    pub fn build(self) -> Result<DosVm> {
        let image = self.image.ok_or(Error::MissingImage)?;
        if !image.exists() {
            return Err(Error::ImageNotFound(image));
        }

        DosVm::new(VmConfig {
            image,
            args: self.args,
            lenient_services: self.lenient_services,
        })
    }
}
