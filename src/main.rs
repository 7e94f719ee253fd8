use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::stream::StreamExt;
use tokio::time::sleep;

use ens_c551s::{logging, Scale, ScaleConfig, ScaleScanner};

/// Reads an ENS-C551S kitchen scale over Bluetooth.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address of the scale to connect to; scans and lists scales when omitted.
    #[arg(value_name = "XX:XX:XX:XX:XX:XX")]
    addr: Option<String>,

    /// How long to scan, in seconds.
    #[arg(long, default_value_t = 10)]
    scan_timeout: u64,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(args.verbose);

    let scanner = ScaleScanner::new().await?;
    let mut scales = scanner
        .start_scan(Duration::from_secs(args.scan_timeout))
        .await?;

    let Some(addr) = args.addr else {
        println!("Scanning for Etekcity ENS-C551S smart kitchen scales...");
        while let Some(transport) = scales.next().await {
            println!("{}", transport.address());
        }
        return Ok(());
    };

    let transport = loop {
        match scales.next().await {
            Some(transport) if transport.address().to_string().eq_ignore_ascii_case(&addr) => {
                break transport
            }
            Some(_) => continue,
            None => return Err(format!("scale {addr} not found").into()),
        }
    };

    eprintln!("Connecting to {addr}...");
    let scale = Scale::connect(Arc::new(transport), ScaleConfig::default()).await?;
    eprintln!("Hardware revision = {}", scale.hardware_revision());
    eprintln!("Software revision = {}", scale.software_revision());

    while scale.is_connected() {
        println!("{}", scale.weight());
        tokio::select! {
            _ = sleep(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    scale.disconnect().await?;
    Ok(())
}
