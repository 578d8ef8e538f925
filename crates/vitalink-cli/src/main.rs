//! vitalink - download readings from a blood pressure meter

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vitalink_core::prelude::*;

/// Download stored readings from a Beurer BM55 blood pressure meter
#[derive(Parser, Debug)]
#[command(name = "vitalink", version, long_about = None)]
struct Args {
    /// Configuration file (defaults to <config dir>/vitalink/device.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// User slot to collect, overriding the configuration
    #[arg(short, long)]
    user: Option<UserSlot>,

    /// Identifier stamped on every reading, overriding the configuration
    #[arg(long)]
    device_id: Option<String>,

    /// Stop at the first reading that fails to decode
    #[arg(long, default_value_t = false)]
    abort_on_decode_error: bool,

    /// Output format: json, csv or csv-units (default from the output file
    /// extension, otherwise json)
    #[arg(short, long)]
    format: Option<ExportFormat>,

    /// Write output to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Collect from a simulated meter instead of USB
    #[arg(long, default_value_t = false)]
    demo: bool,

    /// Number of readings stored on the simulated meter
    #[arg(long, default_value_t = 20)]
    demo_readings: usize,

    /// Seed for the simulated meter
    #[arg(long, default_value_t = 55)]
    seed: u64,

    /// Write the effective configuration to the config path and exit
    #[arg(long, default_value_t = false)]
    init_config: bool,

    /// Enable verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config_path = args.config.clone().or_else(default_config_path);
    let config = load_config(config_path.as_deref(), &args)?;

    if args.init_config {
        let path = config_path.context("No configuration directory available, pass --config")?;
        config
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Configuration written to {}", path.display());
        return Ok(());
    }

    let cancel = CancelToken::new();
    let collected = if args.demo {
        info!(
            "Using simulated meter with {} readings (seed {})",
            args.demo_readings, args.seed
        );
        let meter = SimulatedBm55::with_random_readings(args.demo_readings, args.seed);
        Bm55Driver::new().get_measurements(&DemoProvider::new(meter), &config, &cancel)
    } else {
        Bm55Driver::new().get_measurements(&UsbConnectionProvider, &config, &cancel)
    };
    let report = collected.context("Collection failed")?;

    for skipped in &report.skipped {
        warn!("Skipped reading {}: {}", skipped.index, skipped.error);
    }
    info!(
        "Collected {} readings for user {} from {}",
        report.readings.len(),
        report.user,
        report.device
    );

    let format = output_format(&args);
    match &args.output {
        Some(path) => {
            export_to_file(path, format, &report)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} output to {}", format, path.display());
        }
        None => write_report(&mut io::stdout().lock(), format, &report)
            .context("Failed to write output")?,
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vitalink").join("device.json"))
}

/// Load the configuration file if it exists and apply command line overrides
fn load_config(path: Option<&Path>, args: &Args) -> Result<DeviceConfig> {
    let mut config = match path {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            DeviceConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?
        }
        Some(path) if args.config.is_some() && !args.init_config => {
            anyhow::bail!("Configuration file {} not found", path.display())
        }
        _ => DeviceConfig::default(),
    };

    if let Some(user) = args.user {
        config.user = user;
    }
    if let Some(device_id) = &args.device_id {
        config.device_id = Some(device_id.clone());
    }
    if args.abort_on_decode_error {
        config.decode_failure_policy = DecodeFailurePolicy::Abort;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Explicit `--format`, else the output file extension, else JSON
fn output_format(args: &Args) -> ExportFormat {
    args.format
        .or_else(|| args.output.as_deref().and_then(ExportFormat::from_extension))
        .unwrap_or(ExportFormat::Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("vitalink").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.format, None);
        assert_eq!(output_format(&args), ExportFormat::Json);
        assert!(!args.demo);
        assert_eq!(args.demo_readings, 20);
        assert!(args.user.is_none());
    }

    #[test]
    fn test_user_is_case_insensitive() {
        assert_eq!(parse(&["--user", "b"]).user, Some(UserSlot::B));
        assert!(Args::try_parse_from(["vitalink", "--user", "C"]).is_err());
    }

    #[test]
    fn test_overrides_apply_to_loaded_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        std::fs::write(&path, r#"{ "user": "A", "device_id": "kiosk-2" }"#).unwrap();

        let args = parse(&["--user", "B", "--abort-on-decode-error"]);
        let config = load_config(Some(&path), &args).unwrap();
        assert_eq!(config.user, UserSlot::B);
        assert_eq!(config.device_id.as_deref(), Some("kiosk-2"));
        assert_eq!(config.decode_failure_policy, DecodeFailurePolicy::Abort);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let args = parse(&["--config", path.to_str().unwrap()]);
        assert!(load_config(Some(&path), &args).is_err());
    }

    #[test]
    fn test_missing_default_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = load_config(Some(&path), &parse(&[])).unwrap();
        assert_eq!(config, DeviceConfig::default());
    }

    #[test]
    fn test_output_format_resolution() {
        assert_eq!(output_format(&parse(&["-o", "out.csv"])), ExportFormat::Csv);
        assert_eq!(output_format(&parse(&["-o", "out.txt"])), ExportFormat::Json);
        assert_eq!(
            output_format(&parse(&["-o", "out.csv", "--format", "json"])),
            ExportFormat::Json
        );
        assert_eq!(
            output_format(&parse(&["--format", "csv-units"])),
            ExportFormat::CsvWithUnits
        );
        assert!(Args::try_parse_from(["vitalink", "--format", "xml"]).is_err());
    }

    #[test]
    fn test_demo_collection_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.csv");
        let args = parse(&["--demo", "-o", path.to_str().unwrap()]);

        let meter = SimulatedBm55::with_random_readings(4, 2);
        let report = Bm55Driver::new()
            .get_measurements(
                &DemoProvider::new(meter),
                &DeviceConfig::default(),
                &CancelToken::new(),
            )
            .unwrap();
        export_to_file(&path, output_format(&args), &report).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("iso8601time,"));
        assert_eq!(text.lines().count(), report.readings.len() + 1);
    }

    #[test]
    fn test_demo_collection_as_csv() {
        let config = DeviceConfig::default();
        let meter = SimulatedBm55::with_random_readings(6, 1);
        let report = Bm55Driver::new()
            .get_measurements(&DemoProvider::new(meter), &config, &CancelToken::new())
            .unwrap();

        let mut out = Vec::new();
        write_report(&mut out, ExportFormat::Csv, &report).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), report.readings.len() + 1);
        assert!(text.starts_with("iso8601time,"));
    }
}
