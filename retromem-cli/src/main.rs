// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

mod logging;
mod resource;

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use retromem_core::loader::ImageFormat;
use retromem_core::{Address, BusConfig, CpuControl, LoadReport, MemoryBus, RamConfig, RamDevice};
use strfmt::strfmt;

struct Machine {
    bus: BusConfig,
    ram_size: usize,
    radix: u32,
}

static MACHINES: Lazy<BTreeMap<&'static str, Machine>> = Lazy::new(|| {
    BTreeMap::from([
        ("pdp10", Machine { bus: BusConfig::PDP10, ram_size: 0o1000000, radix: 8 }),
        ("pdp11", Machine { bus: BusConfig::PDP11, ram_size: 0xE000, radix: 8 }),
        ("i8080", Machine { bus: BusConfig::I8080, ram_size: 0x10000, radix: 16 }),
    ])
});

static RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9A-Za-z]+):([0-9A-Za-z]+)$").unwrap());

#[derive(Debug, Copy, Clone)]
struct DumpRange {
    addr: Address,
    len: usize,
}

/// Parses `123`, `0x7B` or `0o173`.
fn parse_number(s: &str) -> Result<u64, String> {
    let (digits, radix) = match s.get(..2) {
        Some("0x") | Some("0X") => (&s[2..], 16),
        Some("0o") | Some("0O") => (&s[2..], 8),
        _ => (s, 10),
    };
    u64::from_str_radix(digits, radix).map_err(|e| format!("invalid number {:?}: {}", s, e))
}

fn parse_address(s: &str) -> Result<Address, String> {
    Address::try_from(parse_number(s)?).map_err(|_| format!("address {} is too large", s))
}

fn parse_size(s: &str) -> Result<usize, String> {
    usize::try_from(parse_number(s)?).map_err(|_| format!("size {} is too large", s))
}

fn parse_range(s: &str) -> Result<DumpRange, String> {
    let caps = RANGE.captures(s).ok_or_else(|| format!("expected ADDR:LEN, got {:?}", s))?;
    Ok(DumpRange { addr: parse_address(&caps[1])?, len: parse_size(&caps[2])? })
}

fn cli() -> Command {
    Command::new("retromem")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Loads a program image into emulated memory and dumps it")
        .arg(Arg::new("image").required(true).value_parser(value_parser!(PathBuf))
            .help("Image to load (.json, .hex, or raw bytes)"))
        .arg(Arg::new("machine").long("machine").short('m').default_value("pdp11")
            .value_parser(["pdp10", "pdp11", "i8080"]))
        .arg(Arg::new("ram-addr").long("ram-addr").value_name("N").default_value("0")
            .value_parser(parse_address))
        .arg(Arg::new("ram-size").long("ram-size").value_name("N").value_parser(parse_size)
            .help("RAM size in words (machine default if omitted)"))
        .arg(Arg::new("load").long("load").value_name("N").value_parser(parse_address)
            .help("Load address; disables paper tape detection"))
        .arg(Arg::new("exec").long("exec").value_name("N").value_parser(parse_address))
        .arg(Arg::new("no-start").long("no-start").action(ArgAction::SetTrue)
            .help("Keep the CPU halted after loading"))
        .arg(Arg::new("dump").long("dump").value_name("ADDR:LEN").action(ArgAction::Append)
            .value_parser(parse_range))
        .arg(Arg::new("format").long("format").value_name("TEMPLATE").default_value("{addr}: {value}")
            .help("Dump line template; fields: addr, value, hex, oct, dec"))
        .arg(Arg::new("verbose").short('v').action(ArgAction::Count))
        .arg(Arg::new("tape-verbosity").long("tape-verbosity").value_name("N").default_value("2")
            .value_parser(value_parser!(u8)))
}

/// Stands in for a CPU: remembers where it would start and tells the user.
struct ConsoleCpu {
    pc: Option<Address>,
    running: bool,
}

impl CpuControl for ConsoleCpu {
    fn stop_cpu(&mut self) {
        info!("CPU stopped");
        self.running = false;
    }

    fn set_reset(&mut self, addr: Address, auto_start: bool) {
        self.pc = Some(addr);
        self.running = auto_start;
        info!("CPU reset to {:#o}{}", addr, if self.running { ", running" } else { "" });
    }
}

fn print_report(report: &LoadReport, radix: u32) {
    let format = match report.format {
        ImageFormat::Absolute => "absolute",
        ImageFormat::Flat => "flat",
    };
    println!("format:  {}", format);
    if report.format == ImageFormat::Absolute {
        println!("blocks:  {}", report.blocks);
    }
    println!("written: {}", report.written);
    match report.exec {
        Some(exec) => println!("exec:    {}", in_radix(u64::from(exec), radix, 0)),
        None => println!("exec:    none"),
    }
    if let Some(err) = &report.tape_error {
        println!("tape:    {}", err);
    }
}

fn in_radix(value: u64, radix: u32, width: usize) -> String {
    match radix {
        8 => format!("{:0width$o}", value, width = width),
        16 => format!("{:0width$X}", value, width = width),
        _ => format!("{:0width$}", value, width = width),
    }
}

fn digits(bits: u32, radix: u32) -> usize {
    let per_digit = if radix == 8 { 3 } else { 4 };
    bits.div_ceil(per_digit) as usize
}

fn dump(bus: &mut MemoryBus, machine: &Machine, range: DumpRange, template: &str) -> Result<(), Box<dyn Error>> {
    let addr_width = digits(machine.bus.addr_bits, machine.radix);
    let value_width = digits(machine.bus.width.bits(), machine.radix);
    for i in 0..range.len {
        let addr = range.addr.wrapping_add(i as Address);
        let value = bus.read(addr);
        let vars: HashMap<String, String> = HashMap::from([
            ("addr".to_string(), in_radix(u64::from(addr), machine.radix, addr_width)),
            ("value".to_string(), in_radix(value, machine.radix, value_width)),
            ("hex".to_string(), format!("{:X}", value)),
            ("oct".to_string(), format!("{:o}", value)),
            ("dec".to_string(), value.to_string()),
        ]);
        println!("{}", strfmt(template, &vars)?);
    }
    Ok(())
}

fn run(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let name = matches.get_one::<String>("machine").map(String::as_str).unwrap_or("pdp11");
    let machine = MACHINES.get(name).ok_or_else(|| format!("unknown machine {}", name))?;
    let path = matches.get_one::<PathBuf>("image").ok_or("missing image")?;
    let image = resource::read_image(path)?;

    let config = RamConfig {
        addr: matches.get_one::<Address>("ram-addr").copied().unwrap_or(0),
        size: matches.get_one::<usize>("ram-size").copied().unwrap_or(machine.ram_size),
        load: matches.get_one::<Address>("load").copied(),
        exec: matches.get_one::<Address>("exec").copied(),
    };
    let mut bus = MemoryBus::new(machine.bus);
    let mut cpu = ConsoleCpu { pc: None, running: false };
    let mut ram = RamDevice::new(config, Some(image)).with_auto_start(!matches.get_flag("no-start"));

    if let Some(report) = ram.power_up(&mut bus, &mut cpu, None)? {
        print_report(&report, machine.radix);
    }
    match cpu.pc {
        Some(pc) => println!("cpu:     {} at {}", if cpu.running { "running" } else { "halted" },
                             in_radix(u64::from(pc), machine.radix, 0)),
        None => println!("cpu:     halted"),
    }

    let template = matches.get_one::<String>("format").map(String::as_str).unwrap_or("{addr}: {value}");
    if let Some(ranges) = matches.get_many::<DumpRange>("dump") {
        for range in ranges {
            dump(&mut bus, machine, *range, template)?;
        }
    }
    let faults = bus.faults();
    if faults.count > 0 {
        println!("faults:  {} (last at {})", faults.count,
                 faults.last.map(|a| in_radix(u64::from(a), machine.radix, 0)).unwrap_or_default());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let matches = cli().get_matches();
    let verbosity = matches.get_count("verbose");
    let tape_verbosity = matches.get_one::<u8>("tape-verbosity").copied().unwrap_or(2);
    logging::setup_logger(verbosity.max(1), tape_verbosity)?;
    info!("Starting retromem");
    run(&matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_in_three_radixes() {
        assert_eq!(parse_number("123"), Ok(123));
        assert_eq!(parse_number("0x7B"), Ok(123));
        assert_eq!(parse_number("0o173"), Ok(123));
        assert!(parse_number("0x").is_err());
        assert!(parse_address("0x100000000").is_err());
    }

    #[test]
    fn dump_ranges() {
        let r = parse_range("0o1000:8").unwrap();
        assert_eq!((r.addr, r.len), (0o1000, 8));
        assert!(parse_range("1000").is_err());
    }

    #[test]
    fn arguments() {
        let m = cli().try_get_matches_from(["retromem", "tape.ptap", "-m", "i8080", "--dump", "0x100:4",
                                            "--dump", "0:1", "-vv", "--no-start"]).unwrap();
        assert_eq!(m.get_one::<String>("machine").unwrap(), "i8080");
        assert_eq!(m.get_many::<DumpRange>("dump").unwrap().count(), 2);
        assert_eq!(m.get_count("verbose"), 2);
        assert!(m.get_flag("no-start"));
        assert!(cli().try_get_matches_from(["retromem", "x", "-m", "vax"]).is_err());
    }

    #[test]
    fn number_formatting() {
        assert_eq!(in_radix(0o777, 8, 6), "000777");
        assert_eq!(in_radix(0xAB, 16, 4), "00AB");
        assert_eq!(digits(36, 8), 12);
        assert_eq!(digits(16, 16), 4);
    }
}
