//! Attaches to the first UPort found and reports what it is.
//!
//! Usage: `uport-probe [firmware-dir]`
//!
//! If a firmware directory is given, the matching `moxa-XXXX.fw` image is
//! uploaded when it is newer than the firmware on the device.
//!
//! All logging is done to stdout and can be controlled via the `RUST_LOG`
//! environment variable.
use mxuport::firmware::format_version;
use mxuport::{Error, SessionBuilder};

use env_logger;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

fn execute() -> Result<(), Error> {
    let mut builder = SessionBuilder::new();
    if let Some(dir) = std::env::args().nth(1) {
        info!("Using firmware from {dir}");
        builder.firmware_dir(dir);
    }

    info!("Attach to UPort");
    let session = builder.build()?;

    let endpoints = session.endpoints();
    println!("{}", session.profile());
    println!(
        "  - firmware: {}",
        format_version(session.firmware_version())
    );
    println!(
        "  - multi-interface: {}",
        if session.profile().multi_interface {
            "RS-232/422/485"
        } else {
            "RS-232 only"
        }
    );
    println!(
        "  - endpoints: bulk out 0x{:02x} ({} bytes), data in 0x{:02x}, event in 0x{:02x}",
        endpoints.bulk_out, endpoints.bulkout_size, endpoints.data_in, endpoints.event_in
    );
    for port in 0..session.num_ports() {
        let info = session.port_info(port)?;
        println!(
            "  - port {port}: {} {}",
            info.settings, info.interface
        );
    }
    Ok(())
}

fn main() {
    env_logger::builder().init();

    match execute() {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            error!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
