/* kolor-keyboard: shows the active desktop keyboard layout on a VIA/Vial
 * keyboard's RGB backlight. `run` is the daemon, `discover` helps write a
 * first config. */
mod app;
mod color;
mod config;
mod discover;
mod dispatcher;
mod driver;
mod layout;
mod resolver;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use app::App;
use config::Config;
use dispatcher::Dispatcher;
use driver::DeviceSession;
use layout::kde::KdeLayoutSource;

/// kolor-keyboard: keyboard backlight color follows the keyboard layout.
#[derive(Parser)]
#[command(name = "kolor-keyboard", version, about)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch layout changes and update the backlight.
    Run {
        /// Config file (default: searched in the usual locations).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List VIA/Vial keyboards and print a starter config.
    Discover {
        /// Print the device list as JSON.
        #[arg(long, conflicts_with_all = ["output", "global"])]
        json: bool,

        /// Also write each config to DIR/<vendor>/<model>/<variant>/config.toml.
        #[arg(short, long, value_name = "DIR", conflicts_with = "global")]
        output: Option<PathBuf>,

        /// Write into the per-keyboard tree of the user config directory.
        #[arg(long)]
        global: bool,

        /// Overwrite configs that already exist.
        #[arg(long)]
        force: bool,
    },

    /// Print name and version.
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let result = match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::Discover {
            json,
            output,
            global,
            force,
        } => discover(json, output, global, force).await,
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("kolor-keyboard: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => config::find_config()?,
    };
    let config = Config::load(&path)?;
    info!(
        "Loaded {} ({:?} firmware, {:?} mode)",
        path.display(),
        config.firmware(),
        config.mode()
    );

    let device = DeviceSession::new(config.device.clone(), config.report);
    device.open().await.with_context(|| {
        format!(
            "Failed to open keyboard {:04x}:{:04x}",
            config.device.vendor_id, config.device.product_id
        )
    })?;

    let source = match KdeLayoutSource::connect().await {
        Ok(source) => source,
        Err(e) => {
            device.close().await;
            return Err(e);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    App::new(Dispatcher::new(config, device), Box::new(source))
        .run(cancel)
        .await
}

/* Cancel on SIGINT or SIGTERM. */
async fn shutdown_on_signal(cancel: CancellationToken) {
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => Some(sigterm),
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                None
            }
        };
    let terminate = async {
        match sigterm.as_mut() {
            Some(sigterm) => {
                sigterm.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
    cancel.cancel();
}

async fn discover(json: bool, output: Option<PathBuf>, global: bool, force: bool) -> Result<()> {
    let root = match (output, global) {
        (Some(dir), _) => Some(dir),
        (None, true) => Some(config::keyboards_dir().context("No user config directory")?),
        (None, false) => None,
    };

    let devices = discover::discover()
        .await
        .context("Failed to scan HID devices")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No VIA/Vial keyboards found.");
        println!("Check that the keyboard is connected, runs VIA or Vial firmware,");
        println!("and that your user can access /dev/hidraw* (udev rules).");
        return Ok(());
    }

    println!("Found {} device(s):", devices.len());
    for (i, dev) in devices.iter().enumerate() {
        let info = &dev.interface;
        println!();
        println!("[{}] {} {}", i + 1, info.manufacturer, info.product);
        println!("    VID: 0x{:04X}  PID: 0x{:04X}", info.vendor_id, info.product_id);
        println!("    Path: {}", info.path);
        if dev.vial {
            println!("    Firmware: Vial ({} LEDs)", dev.led_count);
        } else {
            println!("    Firmware: stock VIA");
        }
        println!();
        print!("{}", discover::generate_config(dev));
        if let Some(root) = &root {
            let path = discover::write_config(dev, root, force)?;
            println!("    Written to {}", path.display());
        }
    }
    Ok(())
}
