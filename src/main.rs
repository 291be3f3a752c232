use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use sayonara_passthrough::passthrough::sense::sense_key_name;
use sayonara_passthrough::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sayonara-pt")]
#[command(about = "Drive discovery and raw SCSI/NVMe passthrough")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file layered over the defaults and the user config
    #[arg(long, global = true, env = "SAYONARA_PT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open every candidate device and print its identity
    List {
        /// Stop after opening the handle, skip identity probing
        #[arg(long)]
        handle_only: bool,

        /// Maximum number of devices to return
        #[arg(long, default_value_t = 256)]
        capacity: usize,
    },

    /// Print the number of candidate devices
    Count,

    /// Resolve the block / generic sibling of a device node
    Map {
        /// Handle name or path (e.g. sda, /dev/sg1)
        handle: String,
    },

    /// Send TEST UNIT READY
    Tur {
        device: String,

        /// Command timeout in seconds
        #[arg(long, default_value_t = 15)]
        timeout: u32,
    },

    /// Send a standard INQUIRY and print vendor / product / revision
    Inquiry { device: String },

    /// Reset a device, its bus or its host adapter
    Reset {
        device: String,

        #[arg(long, value_enum, default_value = "device")]
        scope: ScopeArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Device,
    Bus,
    Controller,
}

impl From<ScopeArg> for ResetScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Device => ResetScope::Device,
            ScopeArg::Bus => ResetScope::Bus,
            ScopeArg::Controller => ResetScope::Controller,
        }
    }
}

const INQUIRY_LEN: u8 = 96;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    logging::init(&settings, cli.verbose || cfg!(feature = "debug-mode"));

    #[cfg(not(feature = "color-output"))]
    colored::control::set_override(false);

    let pt = Passthrough::new(settings);

    let result = match &cli.command {
        Commands::List {
            handle_only,
            capacity,
        } => list_devices(&pt, *capacity, *handle_only, cli.json),
        Commands::Count => {
            let count = pt.count_devices();
            if cli.json {
                println!("{}", serde_json::json!({ "count": count }));
            } else {
                println!("{} candidate device(s)", count.to_string().bold());
            }
            Ok(())
        }
        Commands::Map { handle } => map_handle(&pt, handle, cli.json),
        Commands::Tur { device, timeout } => test_unit_ready(&pt, device, *timeout, cli.json),
        Commands::Inquiry { device } => inquiry(&pt, device, cli.json),
        Commands::Reset { device, scope } => reset_device(&pt, device, (*scope).into()),
    };

    if let Err(e) = result {
        let code = e
            .downcast_ref::<DeviceError>()
            .map(|d| d.code())
            .unwrap_or(ReturnCode::Failure);
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(code.exit_code());
    }

    Ok(())
}

fn list_devices(pt: &Passthrough, capacity: usize, handle_only: bool, json: bool) -> Result<()> {
    let mode = if handle_only {
        OpenMode::HandleOnly
    } else {
        OpenMode::Full
    };
    let mut list = pt.list_devices(capacity, VersionBlock::current(), mode)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "summary": list.summary,
                "devices": list.devices,
            }))?
        );
    } else {
        println!("\n{}", "Detected Devices:".bold());
        println!("{}", "=".repeat(80));
        for device in &list.devices {
            println!(
                "{:<40} {:<8} {:<8} {:<6} {}",
                device.name.cyan(),
                format!("{:?}", device.interface_type),
                format!("{:?}", device.drive_type),
                format!("{:?}", device.media_type),
                device
                    .scsi_address
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            if let Some(block) = &device.secondary_handle {
                println!("    block:   {}", block);
            }
            if let Some(generic) = &device.tertiary_handle {
                println!("    generic: {}", generic);
            }
        }
        println!("{}", "=".repeat(80));

        let summary = list.summary.to_string();
        let summary = match list.summary {
            ReturnCode::Success => summary.green(),
            ReturnCode::WarnPartial => summary.yellow(),
            _ => summary.red(),
        };
        println!("{} device(s) opened: {}", list.devices.len(), summary);
    }

    for device in list.devices.iter_mut() {
        if let Err(e) = pt.close_device(device) {
            tracing::warn!(device = %device.name, error = %e, "Close failed");
        }
    }

    if list.summary == ReturnCode::Success || list.summary == ReturnCode::WarnPartial {
        Ok(())
    } else {
        std::process::exit(list.summary.exit_code());
    }
}

fn map_handle(pt: &Passthrough, handle: &str, json: bool) -> Result<()> {
    let pair = pt.resolver().resolve_sibling(handle)?;
    if json {
        println!("{}", serde_json::to_string(&pair)?);
    } else {
        println!("{} -> block {}, generic {}", handle, pair.block.green(), pair.generic.green());
    }
    Ok(())
}

fn print_status(device: &DeviceIdentity, status: &ReturnStatus, outcome: &DeviceResult<()>, json: bool) {
    let elapsed = device
        .last_command_time
        .map(|d| humantime::format_duration(d).to_string())
        .unwrap_or_else(|| "-".to_string());

    if json {
        println!(
            "{}",
            serde_json::json!({
                "device": device.name,
                "outcome": outcome.as_ref().map(|_| ReturnCode::Success).unwrap_or_else(|e| e.code()),
                "status": status,
                "elapsed": elapsed,
            })
        );
        return;
    }

    match outcome {
        Ok(()) => println!("{} {}", "Command completed".green(), format!("({})", elapsed).dimmed()),
        Err(e) => println!("{} {}", "Command failed:".red(), e),
    }
    if status.has_sense() {
        println!(
            "  Sense: {} (key {:#x}) ASC {:#04x} ASCQ {:#04x} FRU {:#04x}",
            sense_key_name(status.sense_key).yellow(),
            status.sense_key,
            status.asc,
            status.ascq,
            status.fru
        );
    }
}

fn test_unit_ready(pt: &Passthrough, path: &str, timeout: u32, json: bool) -> Result<()> {
    let mut device = pt.open_device(path, OpenMode::HandleOnly)?;
    let cdb = [0u8; 6];
    let mut data = [0u8; 0];
    let mut ctx = ScsiIoCtx::new(&cdb, &mut data, DataDirection::None).with_timeout(timeout);

    let outcome = pt.send_io(&mut device, &mut ctx);
    print_status(&device, &ctx.return_status, &outcome, json);
    pt.close_device(&mut device)?;
    Ok(outcome?)
}

fn inquiry(pt: &Passthrough, path: &str, json: bool) -> Result<()> {
    let mut device = pt.open_device(path, OpenMode::HandleOnly)?;
    let cdb = [0x12u8, 0, 0, 0, INQUIRY_LEN, 0];
    let mut data = [0u8; INQUIRY_LEN as usize];
    let mut ctx = ScsiIoCtx::new(&cdb, &mut data, DataDirection::In);

    let outcome = pt.send_io(&mut device, &mut ctx);
    let status = ctx.return_status;
    pt.close_device(&mut device)?;

    if outcome.is_err() {
        print_status(&device, &status, &outcome, json);
    }
    outcome?;

    let text = |range: std::ops::Range<usize>| String::from_utf8_lossy(&data[range]).trim().to_string();
    let (vendor, product, revision) = (text(8..16), text(16..32), text(32..36));

    if json {
        println!(
            "{}",
            serde_json::json!({
                "device": device.name,
                "peripheral_type": data[0] & 0x1f,
                "vendor": vendor,
                "product": product,
                "revision": revision,
            })
        );
    } else {
        println!("{}", device.name.bold());
        println!("  Vendor:   {}", vendor);
        println!("  Product:  {}", product);
        println!("  Revision: {}", revision);
        println!("  Type:     {:#04x}", data[0] & 0x1f);
    }
    Ok(())
}

fn reset_device(pt: &Passthrough, path: &str, scope: ResetScope) -> Result<()> {
    let mut device = pt.open_device(path, OpenMode::HandleOnly)?;
    let outcome = pt.reset(&mut device, scope);
    pt.close_device(&mut device)?;
    outcome?;
    println!("{} {:?} reset of {}", "Completed".green(), scope, device.name);
    Ok(())
}
