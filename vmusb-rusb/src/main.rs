//! # vmusb-ctl
//!
//! Small control utility for the Wiener VM-USB VME bus bridge: list
//! attached controllers, probe the firmware, and read or write internal
//! controller registers. Hardware-module setup belongs to the DAQ
//! programs built on the library, not here.

use std::error::Error;

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use env_logger::Env;
use vmusb_controller::{ShadowRegisters, VmeController};
use vmusb_rusb::backends::libusb::LibusbTransport;
use vmusb_rusb::open_vmusb;

#[derive(Parser)]
#[command(about = "Control utility for the Wiener VM-USB VME bus bridge", long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the serial numbers of every attached controller
    List,
    /// Read the firmware id of a controller
    Firmware { serial: String },
    /// Initialize a controller and dump its register shadow
    Registers { serial: String },
    /// Read an internal controller register
    Read {
        serial: String,
        #[arg(value_parser = maybe_hex::<u32>)]
        address: u32,
    },
    /// Write an internal controller register
    Write {
        serial: String,
        #[arg(value_parser = maybe_hex::<u32>)]
        address: u32,
        #[arg(value_parser = maybe_hex::<u32>)]
        value: u32,
    },
}

fn print_cell(name: &str, value: Option<u32>) {
    match value {
        Some(value) => println!("{:<18} 0x{:08x}", name, value),
        None => println!("{:<18} (unread)", name),
    }
}

fn print_shadow(shadow: &ShadowRegisters) {
    print_cell("firmware id", shadow.firmware_id);
    print_cell("global mode", shadow.global_mode.map(u32::from));
    print_cell("daq settings", shadow.daq_settings);
    print_cell("led source", shadow.led_source);
    print_cell("device source", shadow.device_source);
    print_cell("dgg a", shadow.dgg_a);
    print_cell("dgg b", shadow.dgg_b);
    print_cell("dgg extended", shadow.dgg_extended);
    for (index, vector) in shadow.interrupt_vectors.iter().enumerate() {
        print_cell(&format!("isv pair {}", index + 1), *vector);
    }
    print_cell("irq mask", shadow.irq_mask.map(u32::from));
    print_cell("bulk setup", shadow.bulk_setup);
    print_cell("events/buffer", shadow.events_per_buffer);
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::List => {
            let serials = LibusbTransport::enumerate()?;
            if serials.is_empty() {
                println!("No VM-USB controller attached.");
            }
            for serial in serials {
                println!("{}", serial);
            }
        }
        Command::Firmware { serial } => {
            let controller = open_vmusb(&serial)?;
            println!("firmware id: 0x{:08x}", controller.read_firmware_id()?);
        }
        Command::Registers { serial } => {
            let controller = open_vmusb(&serial)?;
            print_shadow(&controller.shadow());
        }
        Command::Read { serial, address } => {
            let controller = open_vmusb(&serial)?;
            println!("0x{:08x}", controller.read_register(address)?);
        }
        Command::Write {
            serial,
            address,
            value,
        } => {
            let controller = open_vmusb(&serial)?;
            controller.write_register(address, value)?;
        }
    }
    Ok(())
}
