use std::env;
use std::process;

use anyhow::{anyhow, bail, Result};
use nearscan::cli::ScanCli;
use nearscan::config::ConfigManager;

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("scan");
    let rest = args.get(2..).unwrap_or(&[]);

    let result = match command {
        "scan" => run_scan(rest).await,
        "config" => run_config(rest),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        "--version" | "-V" => {
            println!("nearscan {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {} (see `nearscan help`)", other)),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

async fn run_scan(args: &[String]) -> Result<()> {
    let mut transport = None;
    let mut duration = None;
    let mut watch = false;
    let mut json = false;
    let mut verbose = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--transport" | "-t" => {
                transport = Some(parse_arg(args, &mut i, "--transport")?);
            }
            "--duration" | "-d" => {
                let raw = parse_arg(args, &mut i, "--duration")?;
                duration = Some(
                    raw.parse::<u64>()
                        .map_err(|_| anyhow!("--duration expects seconds, got {}", raw))?,
                );
            }
            "--watch" | "-w" => watch = true,
            "--json" => json = true,
            "--verbose" | "-v" => verbose = true,
            other => bail!("unknown scan option: {}", other),
        }
        i += 1;
    }

    ScanCli::scan(transport, duration, watch, json, verbose).await
}

fn run_config(args: &[String]) -> Result<()> {
    match args.first().map(String::as_str) {
        Some("init") => {
            let force = args.iter().any(|a| a == "--force" || a == "-f");
            let path = ConfigManager::init_config(force)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        Some("show") => {
            let config = ConfigManager::load_or_default(None);
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some("sample") => {
            println!("{}", ConfigManager::generate_sample());
            Ok(())
        }
        Some("validate") => {
            let path = ConfigManager::default_path();
            ConfigManager::validate_config(&path)?;
            println!("{} is valid", path.display());
            Ok(())
        }
        Some(other) => bail!("unknown config subcommand: {}", other),
        None => bail!("config requires a subcommand: init, show, sample, validate"),
    }
}

/// Pull the value following a flag, advancing the cursor past it.
fn parse_arg(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| anyhow!("{} requires a value", flag))
}

fn print_help() {
    println!("nearscan - nearby device discovery over BLE and Bonjour");
    println!();
    println!("USAGE:");
    println!("    nearscan [COMMAND] [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    scan        Run a discovery session (default)");
    println!("    config      Manage the configuration file");
    println!("    help        Show this help");
    println!();
    println!("SCAN OPTIONS:");
    println!("    -t, --transport <ble|mdns>   Scan with a single transport");
    println!("    -d, --duration <SECS>        Override the observation window");
    println!("    -w, --watch                  Print running counts while scanning");
    println!("        --json                   Emit results as JSON");
    println!("    -v, --verbose                Show peer ids and capability tags");
    println!();
    println!("CONFIG SUBCOMMANDS:");
    println!("    init [--force]   Write the default config file");
    println!("    show             Print the effective configuration");
    println!("    sample           Print a sample config to stdout");
    println!("    validate         Check the config file on disk");
}
