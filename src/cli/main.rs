use clap::Parser;
use log::error;
use simplelog::{ConfigBuilder, LevelFilter, LevelPadding, WriteLogger};
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use minicomp_io::{
    DiskDrive, IoController, OutputController, PollInterval, REG_DATA, REG_MODE,
};

/// Possible log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
}

#[derive(Parser)]
#[command(version, about, max_term_width = 100)]
#[command(after_help = "\
This is the MiniComp I/O monitor. It wires a disk drive and an output \
device to the register bus and reads bus operations from stdin: 'w <reg> \
<val>' and 'r <reg>' drive the wire protocol directly, 'flag' clears the \
flag bit to request output, and 'load', 'sync', 'power' and 'interval' \
issue the caller-facing device operations. Type 'help' for the full list.")]
struct Cli {
    /// The disk image to load at startup.
    image: Option<PathBuf>,

    /// Poll interval exponent for the output device (10^k milliseconds).
    #[arg(short, long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(0..=3))]
    interval: u32,

    /// If set, a debug log will be written to the given path.
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Set the log level. Has no effect without specifying --log as well.
    #[arg(short = 'L', long, default_value = "trace", value_enum)]
    log_level: LogLevel,
}

/// Initialise logging to the given file.
fn init_logging(logfile: File, level: LevelFilter) {
    let config = ConfigBuilder::new()
        .set_level_padding(LevelPadding::Right)
        .set_location_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();

    WriteLogger::init(level, config, logfile).unwrap();
}

/// Parse an integer with an optional 0x/0b prefix.
fn parse_num(s: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else if let Some(bin) = s.strip_prefix("0b") {
        u32::from_str_radix(bin, 2)
    } else {
        s.parse()
    };
    parsed.map_err(|_| format!("not a number: '{}'", s))
}

const HELP: &str = "\
Commands:
  w <reg> <val>   write a register (0 = data, 1 = mode select)
  r <reg>         read a register
  flag            clear the flag bit to request output
  status          show the handshake bits and registers
  load <path>     load a disk image
  sync            flush the disk image to its backing file (CTRL 0x69)
  power on|off    toggle the output device
  interval <0-3>  set the output poll interval to 10^k ms
  quit            exit";

/// Handle one monitor command. Returns false when the monitor should exit.
fn handle_command(
    line: &str,
    controller: &Arc<Mutex<IoController>>,
    drive: &DiskDrive,
    output: &OutputController,
) -> Result<bool, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [] => {}
        ["w", reg, val] => {
            let reg = parse_num(reg)? as usize;
            let val = parse_num(val)?;
            let mut ctrl = controller.lock().unwrap();
            ctrl.write(reg, val).map_err(|e| e.to_string())?;
            println!("ready={}", u8::from(ctrl.signals().ready()));
        }
        ["r", reg] => {
            let reg = parse_num(reg)? as usize;
            let mut ctrl = controller.lock().unwrap();
            let value = ctrl.read(reg).map_err(|e| e.to_string())?;
            println!("{:#04X} ready={}", value, u8::from(ctrl.signals().ready()));
        }
        ["flag"] => controller.lock().unwrap().signals_mut().clear_flag(),
        ["status"] => {
            let ctrl = controller.lock().unwrap();
            let signals = ctrl.signals();
            println!(
                "ready={} flag={} data={:#04X} mode={:#04X}",
                u8::from(signals.ready()),
                u8::from(signals.flag()),
                signals.register(REG_DATA),
                signals.register(REG_MODE),
            );
        }
        ["load", path] => drive.load_image(*path).map_err(|e| e.to_string())?,
        ["sync"] => {
            // Issue the sync through the wire contract: select CTRL mode,
            // then write the sync command code.
            let mut ctrl = controller.lock().unwrap();
            ctrl.write(REG_MODE, 0xF).map_err(|e| e.to_string())?;
            ctrl.write(REG_DATA, 0x69).map_err(|e| e.to_string())?;
            println!("ready={}", u8::from(ctrl.signals().ready()));
        }
        ["power", "on"] => output.set_power(true),
        ["power", "off"] => output.set_power(false),
        ["interval", k] => {
            let interval = PollInterval::from_exponent(parse_num(k)?)
                .ok_or("interval exponent must be 0-3")?;
            output.set_interval(interval);
        }
        ["help"] => println!("{}", HELP),
        ["quit"] | ["exit"] => return Ok(false),
        _ => return Err(format!("unknown command: '{}' (try 'help')", line.trim())),
    }
    Ok(true)
}

/// Main run function; returns an exit code.
fn run(args: Cli) -> u8 {
    return match _run(args) {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            1
        }
    };

    fn _run(args: Cli) -> Result<(), String> {
        // Initialise logging if configured.
        if let Some(log_path) = args.log {
            let logfile = File::create(log_path)
                .map_err(|e| format!("Failed to create log file: {}", e))?;
            let level = match args.log_level {
                LogLevel::Trace => LevelFilter::Trace,
                LogLevel::Debug => LevelFilter::Debug,
                LogLevel::Info => LevelFilter::Info,
            };
            init_logging(logfile, level);
        }

        // Wire the bus and the peripherals.
        let controller = Arc::new(Mutex::new(IoController::new(2)));
        let drive = DiskDrive::connect(Arc::clone(&controller))
            .map_err(|e| e.to_string())?;
        if let Some(image) = &args.image {
            drive.load_image(image).map_err(|e| e.to_string())?;
        }

        let mut output = OutputController::new(
            Arc::clone(&controller),
            Box::new(|value| {
                match u8::try_from(value).ok().map(char::from) {
                    Some(c) if c.is_ascii_graphic() || c == ' ' || c == '\n' => print!("{}", c),
                    _ => print!("<{:#04X}>", value),
                }
                io::stdout().flush().unwrap();
            }),
        );
        output.set_interval(PollInterval::from_exponent(args.interval).unwrap());
        output.start();

        // The monitor loop: one bus operation per stdin line.
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = line.map_err(|e| format!("Failed to read stdin: {}", e))?;
            match handle_command(&line, &controller, &drive, &output) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        output.stop();
        Ok(())
    }
}

fn main() {
    let args = Cli::parse();
    std::process::exit(run(args).into());
}
