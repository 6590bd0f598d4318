//! xmega-emu: cycle-approximate emulator for AVR XMEGA microcontrollers

use std::env;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Result};

use xmega_emu::config::Config;
use xmega_emu::device::Device;
use xmega_emu::firmware;

fn usage(progname: &str) {
    println!("usage: {} [options] <firmware>", progname);
    println!();
    println!("Firmware may be an Intel HEX file, an AVR ELF or a raw binary image.");
    println!();
    println!("Options:");
    println!("  -h, --help         this help");
    println!("  --model <name>     device model (default: atxmega128a1)");
    println!("  --sys-ticks <n>    stop after the given number of SYS ticks");
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config = Config::get();

    let mut model = config.model.clone();
    let mut sys_ticks = config.sys_ticks;
    let mut input = None;

    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                usage(&args[0]);
                return Ok(());
            }
            "--model" => match iter.next() {
                Some(name) => model = name.clone(),
                None => bail!("--model requires a value"),
            },
            "--sys-ticks" => match iter.next() {
                Some(n) => sys_ticks = Some(n.parse()?),
                None => bail!("--sys-ticks requires a value"),
            },
            _ if !arg.starts_with('-') => input = Some(arg.clone()),
            _ => bail!("unknown option: {arg}"),
        }
    }

    let Some(input) = input else {
        usage(&args[0]);
        bail!("missing input file");
    };

    let mut device = match model.to_ascii_lowercase().as_str() {
        "atxmega128a1" => Device::atxmega128a1()?,
        other => bail!("unknown device model: {other}"),
    };

    println!("Loading: {}", input);
    let image = firmware::load_file(Path::new(&input))?;
    device.load_flash(&image)?;
    println!(
        "Loaded {} bytes into {} flash",
        image.len(),
        device.model().name
    );

    device.reset();

    match sys_ticks {
        Some(ticks) => {
            while device.clk_sys_tick() < ticks {
                device.step()?;
            }
        }
        None => loop {
            device.step()?;
        },
    }

    print_summary(&device);
    Ok(())
}

/// Print a short state summary after a bounded run.
fn print_summary(device: &Device) {
    println!();
    println!("Run Summary");
    println!("===========");
    println!("  SYS tick: {}", device.clk_sys_tick());
    println!("  PC:       {:#07X}", device.pc());
    println!("  SP:       {:#06X}", device.sp());
    println!("  SREG:     {:#04X}", device.sreg().byte());
    println!("  breaked:  {}", device.breaked());
}
