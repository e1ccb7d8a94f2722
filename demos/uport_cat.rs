/// uport_cat.rs
///
/// Opens one port of the first UPort found at the given baud rate and
/// copies everything it receives to stdout, for a number of seconds.
use clap::Parser;
use mxuport::{Error, LineSettings, PortListener, SessionBuilder, Termios};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Port to open, starting at 0
    port: usize,

    /// Baud rate
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// How long to run for, in seconds
    #[arg(short, long, default_value_t = 10)]
    seconds: u64,

    /// Directory containing moxa-XXXX.fw firmware images
    #[arg(short, long)]
    firmware_dir: Option<String>,
}

struct Stdout;

impl PortListener for Stdout {
    fn receive(&self, _port: usize, data: &[u8]) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(data);
        let _ = out.flush();
    }

    fn modem_change(&self, port: usize, msr: u8) {
        eprintln!("Port {port} modem status 0x{msr:02x}");
    }
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();

    let mut builder = SessionBuilder::new();
    if let Some(dir) = &args.firmware_dir {
        builder.firmware_dir(dir);
    }
    let session = builder.build()?;
    eprintln!("Attached {}", session.profile());

    session.set_listener(Arc::new(Stdout));
    session.open(args.port)?;

    let settings = LineSettings {
        baud: args.baud,
        ..Default::default()
    };
    match Termios::from_settings(&settings) {
        Ok(termios) => session.set_termios(args.port, termios)?,
        // Not a standard rate, so program it directly
        Err(_) => session.set_special_baud(args.port, args.baud)?,
    }
    eprintln!("Port {} open at {}", args.port, session.baud(args.port)?);

    std::thread::sleep(Duration::from_secs(args.seconds));

    let icount = session.icount(args.port)?;
    session.close(args.port)?;
    eprintln!("Received {} bytes, dropped {}", icount.rx, icount.buf_overrun);
    Ok(())
}
