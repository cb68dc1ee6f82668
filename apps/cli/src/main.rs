use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cyboot_core::config::{Config, ConvertConfig};
use cyboot_core::convert::convert_file;
use cyboot_core::cyacd::RowImageReader;
use cyboot_core::family::CpuFamily;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "PSoC 4 bootloader image tool", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Convert an Intel-HEX file into a .cyacd row image
    Convert {
        /// Target CPU family (cy8c41, cy8c42)
        #[arg(long)]
        cpu: Option<CpuFamily>,

        /// Bytes reserved for the bootloader (decimal or 0x-prefixed)
        #[arg(long, value_parser = parse_number)]
        bootloader_size: Option<u32>,

        /// Input Intel-HEX file
        input: PathBuf,

        /// Output .cyacd file
        output: PathBuf,
    },
    /// Validate a .cyacd file and print a summary
    Inspect {
        /// Row image to read
        file: PathBuf,
    },
}

fn parse_number(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", text, e))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_file(path),
        None => Ok(Config::default()),
    }
}

fn convert(
    config: ConvertConfig,
    cpu: Option<CpuFamily>,
    bootloader_size: Option<u32>,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let config = ConvertConfig {
        cpu: cpu.unwrap_or(config.cpu),
        bootloader_size: bootloader_size.unwrap_or(config.bootloader_size),
    };
    let summary = convert_file(input, output, &config)
        .with_context(|| format!("converting {}", input.display()))?;
    info!(
        first_row = summary.first_row,
        rows_written = summary.rows_written,
        rows_skipped = summary.rows_skipped,
        "Conversion complete"
    );
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let (header, rows) = RowImageReader::open(path)
        .and_then(RowImageReader::read_all)
        .with_context(|| format!("reading {}", path.display()))?;

    println!("Silicon ID:    0x{:08X}", header.silicon_id);
    println!("Silicon rev:   0x{:02X}", header.silicon_rev);
    println!("Checksum type: {}", header.checksum_type);
    println!("Rows:          {}", rows.len());
    if let (Some(first), Some(last)) = (rows.first(), rows.last()) {
        println!(
            "Row range:     {}:{} .. {}:{}",
            first.array_id, first.row_number, last.array_id, last.row_number
        );
    }
    let bytes: usize = rows.iter().map(|row| row.data.len()).sum();
    println!("Data bytes:    {}", bytes);
    Ok(())
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
        eprintln!("Failed to install logger: {}", e);
    }

    let result = load_config(args.config.as_deref()).and_then(|config| match &args.command {
        Cmd::Convert {
            cpu,
            bootloader_size,
            input,
            output,
        } => convert(config.convert, *cpu, *bootloader_size, input, output),
        Cmd::Inspect { file } => inspect(file),
    });

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
