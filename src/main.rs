//! Command-line front end: `microdos <guest-image> [<dos-arg>...]`.

use std::process;

use microdos::DosVmBuilder;

/// Reserved exit status for any fatal host-side failure.
const FATAL_STATUS: i32 = 252;

fn main() {
    let mut args = std::env::args().skip(1);
    let Some(image) = args.next() else {
        eprintln!("Usage: microdos <guest-image> [<dos-arg>...]");
        process::exit(FATAL_STATUS);
    };

    if !microdos::is_supported() {
        eprintln!("microdos: hypervisor not available (is /dev/kvm present?)");
        process::exit(FATAL_STATUS);
    }

    let result = DosVmBuilder::new()
        .image(image)
        .args(args)
        .build()
        .and_then(|mut vm| vm.run());

    match result {
        Ok(status) => process::exit(status as i32),
        Err(e) => {
            eprintln!("microdos: {}", e);
            process::exit(FATAL_STATUS);
        }
    }
}
