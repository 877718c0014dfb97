use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dpaux_isp_core::engine::SecureEngine;
use dpaux_isp_core::events::{ProgressFn, Tee, TracingObserver};
use dpaux_isp_core::identify::ChipFamily;
use dpaux_isp_core::session::{DevicePort, PortArena, SessionConfig, UpdateSession};
use dpaux_isp_core::{FirmwareContainer, parse_container};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Kinetic DisplayPort AUX-ISP firmware tool", long_about = None)]
struct Args {
    /// Session configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the metadata of a firmware container
    Info {
        /// Firmware container file
        file: PathBuf,
    },
    /// Identify the chip behind an AUX device
    Identify {
        /// AUX device node, e.g. /dev/drm_dp_aux0
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Flash a firmware container
    Flash {
        #[arg(short, long)]
        device: Option<String>,

        /// Firmware container file
        file: PathBuf,
    },
    /// Show the active flash bank (Secure chips only)
    Bank {
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Write the effective configuration to a TOML file
    SaveConfig {
        path: PathBuf,
    },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {}", e);
    }

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    match args.command {
        Command::Info { file } => print_info(&load_container(&file)?),
        Command::Identify { device } => {
            set_device(&mut config, device);
            identify(config)
        }
        Command::Flash { device, file } => {
            set_device(&mut config, device);
            flash(config, &file)
        }
        Command::Bank { device } => {
            set_device(&mut config, device);
            bank(config)
        }
        Command::SaveConfig { path } => {
            config.save_to_file(&path)?;
            info!(path = %path.display(), "Configuration written");
            Ok(())
        }
    }
}

fn set_device(config: &mut SessionConfig, device: Option<String>) {
    if device.is_some() {
        config.device_path = device;
    }
}

fn load_container(path: &Path) -> Result<FirmwareContainer> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_container(&data)?)
}

fn print_info(container: &FirmwareContainer) -> Result<()> {
    let info = container.info();
    println!("Chip:              {}", info.model);
    println!("Layout:            {:?}", info.layout);
    println!("Standard version:  {}", info.std_fw_ver);
    println!("Customer project:  0x{:02X}", info.customer_project_id);
    println!("Customer version:  0x{:04X}", info.customer_fw_ver);
    println!("ISP driver:        {} bytes", container.isp_driver().len());
    println!("App firmware:      {} bytes", container.app_firmware().len());
    if info.family() == ChipFamily::Secure {
        println!("ESM payload:       {} bytes", info.esm_payload_size);
        println!("App code:          {} bytes", info.app_code_size);
        println!("App init data:     {} bytes", info.app_init_data_size);
    }
    match info.cmdb {
        Some(cmdb) => println!(
            "CMDB:              {} bytes, version 0x{:04X}, revision 0x{:06X}",
            cmdb.size, cmdb.version, cmdb.revision
        ),
        None => println!("CMDB:              none"),
    }
    Ok(())
}

fn identify(config: SessionConfig) -> Result<()> {
    let session = UpdateSession::new(config);
    let transport = session.open_device()?;
    let identity = session.identify(&transport)?;
    let mut arena = PortArena::new();
    let dev = session.device_info(&mut arena, DevicePort::Host, &transport, &identity)?;

    println!("Chip:              {}", identity.model);
    println!("Family:            {}", identity.family);
    println!("Running:           {}", identity.run_state);
    println!("Chip revision:     0x{:02X}", dev.chip_rev);
    println!("Chip type:         {}", dev.chip_type);
    println!("Standard version:  {}", dev.std_fw_ver);
    if identity.family == ChipFamily::Secure {
        println!("Customer project:  0x{:02X}", dev.customer_project_id);
        println!("Customer version:  0x{:04X}", dev.customer_fw_ver);
    }
    if dev.is_dual_bank_supported {
        println!("Active bank:       {}", dev.flash_bank);
    }
    Ok(())
}

fn flash(config: SessionConfig, file: &Path) -> Result<()> {
    let container = load_container(file)?;

    let last_pct = Arc::new(AtomicU64::new(u64::MAX));
    let progress = ProgressFn(move |done: u64, total: u64| {
        let pct = if total > 0 { done * 100 / total } else { 0 };
        if last_pct.swap(pct, Ordering::Relaxed) != pct {
            let mut err = std::io::stderr();
            let _ = write!(err, "\rProgress: {:3}%", pct);
            if pct == 100 {
                let _ = writeln!(err);
            }
        }
    });
    let session = UpdateSession::with_observer(config, Arc::new(Tee(TracingObserver, progress)));

    let transport = session.open_device()?;
    let identity = session.identify(&transport)?;
    if container.family() != identity.family {
        bail!(
            "firmware is for {} but the device is {}",
            container.info().model,
            identity.model
        );
    }

    let mut arena = PortArena::new();
    session.run_update(&mut arena, DevicePort::Host, &transport, identity, &container)?;
    info!(version = %container.info().std_fw_ver, "Firmware updated");
    Ok(())
}

fn bank(config: SessionConfig) -> Result<()> {
    let session = UpdateSession::new(config);
    let transport = session.open_device()?;
    let identity = session.identify(&transport)?;
    if identity.family != ChipFamily::Secure || !identity.is_app_mode() {
        bail!("flash banks can only be queried on a Secure chip running its application");
    }
    let engine = SecureEngine::new(session.config().timings.secure.clone());
    println!("{}", engine.get_flash_bank_idx(&transport)?);
    Ok(())
}
