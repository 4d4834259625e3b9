//! `awfes`: command-line driver for Allwinner devices in FEL/FES mode.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use console::style;
use failure::{Error, ResultExt};
use indicatif::{ProgressBar, ProgressStyle};

use aw_fes::{
    Bulk, Fel, MediaIndex, Mode, Operation, ProtocolError, Reporter, Session, Tag, Tags,
};

#[derive(Parser, Debug)]
#[command(
    name = "awfes",
    about = "Allwinner FEL/FES USB recovery protocol client",
    version
)]
struct Cli {
    /// Index of the device to drive when several are connected
    #[arg(short, long, default_value_t = 0)]
    device: usize,

    /// Target address
    #[arg(short, long, value_parser = maybe_hex::<u32>)]
    address: Option<u32>,

    /// Transfer length in bytes
    #[arg(short, long, value_parser = maybe_hex::<u32>)]
    length: Option<u32>,

    /// Opcode family to use (fel or fes)
    #[arg(short, long, default_value = "fel", value_parser = parse_mode)]
    mode: Mode,

    /// Media index for transmite transfers (dram, physical-log, physical)
    #[arg(short, long, default_value = "dram", value_parser = parse_media)]
    index: MediaIndex,

    /// Tags to OR into the command flags, comma separated
    #[arg(short, long, value_delimiter = ',', value_parser = parse_tag)]
    tags: Vec<Tag>,

    /// Verbose wire-level logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the device identity
    DeviceInfo,
    /// Read memory or storage, hex-dumping unless --out is given
    Read {
        /// Write the data to this file instead of dumping it
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Write a file to memory or storage
    Write {
        /// File with the data to write
        file: PathBuf,
    },
    /// Execute code at the target address
    Run,
    /// Erase storage and program the MBR
    Format {
        /// 65536-byte sunxi MBR image
        mbr: PathBuf,
    },
    /// Program the MBR without erasing
    Mbr {
        /// 65536-byte sunxi MBR image
        mbr: PathBuf,
    },
    /// Toggle the storage driver
    Storage {
        /// `on` or `off`
        #[arg(value_parser = parse_switch)]
        state: bool,
    },
    /// Low-level media transfer: write a file, or read --length bytes
    Transmite {
        /// File to write to the device
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Write read data to this file instead of dumping it
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Send a raw request opcode and report its status
    Request {
        /// Opcode to send
        #[arg(value_parser = maybe_hex::<u16>)]
        cmd: u16,
    },
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    s.parse::<Mode>().map_err(|e| e.to_string())
}

fn parse_media(s: &str) -> Result<MediaIndex, String> {
    s.parse::<MediaIndex>().map_err(|e| e.to_string())
}

fn parse_tag(s: &str) -> Result<Tag, String> {
    s.parse::<Tag>().map_err(|e| e.to_string())
}

fn parse_switch(s: &str) -> Result<bool, String> {
    match s {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(format!("invalid state '{}', expected 'on' or 'off'", s)),
    }
}

/// Renders chunk progress as a terminal bar, one bar per transfer.
struct BarReporter {
    bar: Option<ProgressBar>,
}

impl BarReporter {
    fn new() -> BarReporter {
        BarReporter { bar: None }
    }
}

impl Reporter for BarReporter {
    fn progress(&mut self, operation: Operation, done: usize, total: usize) {
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template(
                    "{msg:>9} [{wide_bar}] {bytes}/{total_bytes} ({eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
            );
            bar.set_message(operation.to_string());
            bar
        });
        bar.set_position(done as u64);
        if done >= total {
            bar.finish_and_clear();
            self.bar = None;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{} {}", style("[FAIL]").red().bold(), error);
            for cause in error.iter_causes() {
                eprintln!("       caused by: {}", cause);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    let fel = Fel::new()?;
    let mut session = fel.open_device(cli.device)?;
    session.set_reporter(Box::new(BarReporter::new()));
    let tags: Tags = cli.tags.iter().cloned().collect();

    match &cli.action {
        Action::DeviceInfo => {
            let info = session.device_info()?;
            println!("{}", info);
        }
        Action::Read { out } => {
            let address = require_address(cli)?;
            let length = require_length(cli)?;
            let data = session.read(address, length as usize, tags, cli.mode)?;
            deliver(&data, address, out.as_ref())?;
        }
        Action::Write { file } => {
            let address = require_address(cli)?;
            let data = read_file(file)?;
            session.write(address, &data, tags, cli.mode)?;
        }
        Action::Run => {
            let address = require_address(cli)?;
            session.run(address, cli.mode)?;
        }
        Action::Format { mbr } => program_mbr(&mut session, mbr, true)?,
        Action::Mbr { mbr } => program_mbr(&mut session, mbr, false)?,
        Action::Storage { state } => session.set_storage_state(*state)?,
        Action::Transmite { file, out } => match file {
            Some(file) => {
                let address = require_address(cli)?;
                let data = read_file(file)?;
                session.transmite_write(address, &data, cli.index)?;
            }
            None => {
                let address = require_address(cli)?;
                let length = require_length(cli)?;
                let data = session.transmite_read(address, length as usize, cli.index)?;
                deliver(&data, address, out.as_ref())?;
            }
        },
        Action::Request { cmd } => {
            session.request(*cmd)?;
            println!("request {:#06x}: status OK", cmd);
        }
    }
    Ok(())
}

fn program_mbr<B: Bulk>(session: &mut Session<B>, path: &Path, erase: bool) -> Result<(), Error> {
    let mbr = read_file(path)?;
    let verify = session.write_mbr(&mbr, erase)?;
    println!(
        "MBR programmed, CRC {:#010x}, last error {}",
        verify.get_crc(),
        verify.get_last_error()
    );
    Ok(())
}

fn require_address(cli: &Cli) -> Result<u32, Error> {
    cli.address.ok_or_else(|| {
        ProtocolError::BadArgument {
            msg: "missing --address".to_string(),
        }
        .into()
    })
}

fn require_length(cli: &Cli) -> Result<u32, Error> {
    cli.length.ok_or_else(|| {
        ProtocolError::BadArgument {
            msg: "missing --length".to_string(),
        }
        .into()
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, Error> {
    let data =
        fs::read(path).with_context(|_| format!("unable to read '{}'", path.display()))?;
    Ok(data)
}

fn deliver(data: &[u8], address: u32, out: Option<&PathBuf>) -> Result<(), Error> {
    match out {
        Some(path) => {
            fs::write(path, data)
                .with_context(|_| format!("unable to write '{}'", path.display()))?;
            println!("{} bytes written to '{}'", data.len(), path.display());
        }
        None => hex_dump(data, address),
    }
    Ok(())
}

fn hex_dump(data: &[u8], address: u32) {
    for (i, row) in data.chunks(16).enumerate() {
        println!("{:08x}  {}", address as usize + i * 16, hex::encode(row));
    }
}
