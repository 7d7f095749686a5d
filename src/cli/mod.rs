use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::error::SplitError;

/// 5 GiB, the common per-layer ceiling of container registries.
pub const DEFAULT_TARGET_SIZE: u64 = 5_368_709_120;

/// Consulted when `--target-size` is not given.
pub const TARGET_SIZE_ENV: &str = "TARSPLIT_TARGET_SIZE";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tarsplit",
    author,
    version,
    about = "Split a tar archive into several smaller tar archives",
    long_about = "Split a large (optionally gzip/zstd/xz compressed) tar archive into multiple \
                  plain tar archives, each holding regular files whose sizes add up to no more \
                  than the target size. Default target size: 5 GiB.\n\n\
                  Outputs are named <index>-<source name>. Directories, links and other \
                  non-regular entries are not copied."
)]
pub struct Args {
    /// The archive to split (.tar, .tar.gz/.tgz, .tar.zst, .tar.xz).
    #[arg(required = true)]
    pub source: PathBuf,

    /// Target size per output archive, in bytes or with a suffix (K, M, G, T, KiB, MiB, GiB, TiB).
    /// Falls back to TARSPLIT_TARGET_SIZE, then to 5 GiB.
    #[arg(short = 's', long = "target-size", alias = "targetsize", value_parser = parse_size)]
    pub target_size: Option<u64>,

    /// Directory that receives the output archives. Defaults to the current directory.
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Print the plan as JSON and exit without writing any archive.
    #[arg(long)]
    pub dry_run: bool,

    /// Also write the plan as JSON to this file.
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Skip re-reading the outputs after the split (verification is on by default).
    #[arg(long)]
    pub skip_check: bool,

    /// Show a progress bar on stderr while copying.
    #[arg(long)]
    pub progress: bool,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    /// Default filter directive for the log subscriber.
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }
}

/// Parses `1024`, `512K`, `1.5G`, `4GiB`... Decimal suffixes are powers of
/// 1000, binary ones (`KiB`, `MiB`...) powers of 1024.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty size".to_string());
    }
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "m" | "mb" => 1_000_000,
        "g" | "gb" => 1_000_000_000,
        "t" | "tb" => 1_000_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        "tib" => 1 << 40,
        other => return Err(format!("unknown size suffix '{other}' in '{input}'")),
    };

    let bytes = if number.contains('.') {
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid size '{input}'"))?;
        let bytes = value * multiplier as f64;
        if !bytes.is_finite() || bytes >= u64::MAX as f64 {
            return Err(format!("size '{input}' is too large"));
        }
        bytes.round() as u64
    } else {
        let value: u64 = number
            .parse()
            .map_err(|_| format!("invalid size '{input}'"))?;
        value
            .checked_mul(multiplier)
            .ok_or_else(|| format!("size '{input}' is too large"))?
    };

    if bytes == 0 {
        return Err("target size must be greater than zero".to_string());
    }
    Ok(bytes)
}

/// Resolves the target budget. Priority:
/// 1. `--target-size` command-line argument.
/// 2. `TARSPLIT_TARGET_SIZE` environment variable.
/// 3. [`DEFAULT_TARGET_SIZE`].
pub fn resolve_target_size(flag: Option<u64>) -> Result<u64, SplitError> {
    resolve_target_size_with(flag, std::env::var(TARGET_SIZE_ENV).ok())
}

fn resolve_target_size_with(flag: Option<u64>, env: Option<String>) -> Result<u64, SplitError> {
    if let Some(size) = flag {
        return Ok(size);
    }
    match env {
        Some(value) => parse_size(&value)
            .map_err(|e| SplitError::Config(format!("{TARGET_SIZE_ENV}: {e}"))),
        None => Ok(DEFAULT_TARGET_SIZE),
    }
}

/// Parses command-line arguments using `clap`.
///
/// On a parse error (or `--help`/`--version`) clap prints its message and exits.
pub fn run() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn sizes_with_suffixes() {
        assert_eq!(parse_size("150"), Ok(150));
        assert_eq!(parse_size("5368709120"), Ok(DEFAULT_TARGET_SIZE));
        assert_eq!(parse_size("5GiB"), Ok(DEFAULT_TARGET_SIZE));
        assert_eq!(parse_size("512k"), Ok(512_000));
        assert_eq!(parse_size("2 MiB"), Ok(2 << 20));
        assert_eq!(parse_size("1.5G"), Ok(1_500_000_000));
        assert_eq!(parse_size("8.6GB"), Ok(8_600_000_000));
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(parse_size("").is_err());
        assert!(parse_size("0").is_err());
        assert!(parse_size("12 parsecs").is_err());
        assert!(parse_size("G").is_err());
        assert!(parse_size("99999999999TiB").is_err());
    }

    #[test]
    fn target_size_priority() {
        assert_eq!(resolve_target_size_with(Some(10), Some("20".into())).unwrap(), 10);
        assert_eq!(resolve_target_size_with(None, Some("20".into())).unwrap(), 20);
        assert_eq!(resolve_target_size_with(None, None).unwrap(), DEFAULT_TARGET_SIZE);
        assert!(matches!(
            resolve_target_size_with(None, Some("zero".into())),
            Err(SplitError::Config(_))
        ));
    }

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "tarsplit", "-s", "1M", "-o", "out", "--dry-run", "-v", "kb.tar",
        ])
        .unwrap();
        assert_eq!(args.target_size, Some(1_000_000));
        assert_eq!(args.output_dir, PathBuf::from("out"));
        assert!(args.dry_run);
        assert_eq!(args.log_level(), "debug");

        let args = Args::try_parse_from(["tarsplit", "--targetsize", "42", "kb.tar"]).unwrap();
        assert_eq!(args.target_size, Some(42));
        assert_eq!(args.log_level(), "info");
    }
}
