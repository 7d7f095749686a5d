//! CLI runner: wires parsed arguments to the split pipeline.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{self, Args};
use crate::error::SplitError;
use crate::pipeline::{self, SplitJob};
use crate::progress::ProgressState;

/// Public entry for running CLI logic.
pub fn run_cli_app() -> Result<(), SplitError> {
    let args = cli::run();
    init_tracing(args.log_level());

    let job = job_from_args(&args)?;
    let progress_cb = if args.progress {
        let callback = create_cli_progress_callback("split");
        Some(Box::new(callback) as Box<dyn Fn(ProgressState) + Send + Sync>)
    } else {
        None
    };

    let outcome = pipeline::run(&job, progress_cb.as_deref())?;
    if let Some(manifest) = outcome.dry_run_manifest {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", manifest.to_json()?).map_err(|e| SplitError::write("<stdout>", e))?;
        return Ok(());
    }
    for output in &outcome.outputs {
        info!(path = %output.path.display(), entries = output.entries, "wrote archive");
    }
    Ok(())
}

fn job_from_args(args: &Args) -> Result<SplitJob, SplitError> {
    Ok(SplitJob {
        source: args.source.clone(),
        target_size: cli::resolve_target_size(args.target_size)?,
        output_dir: args.output_dir.clone(),
        dry_run: args.dry_run,
        manifest: args.manifest.clone(),
        verify: !args.skip_check,
    })
}

/// Logs go to stderr so `--dry-run` output on stdout stays clean. `RUST_LOG`
/// overrides the level picked from `-v`/`-q`.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

// --- utils for CLI progress -------------------------------------------------

fn create_cli_progress_callback(operation: &str) -> impl Fn(ProgressState) + Send + Sync + 'static {
    let operation = operation.to_uppercase();
    let prev_len = Arc::new(Mutex::new(0usize));

    move |state: ProgressState| {
        // Determine terminal width (default 80)
        let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);

        let eta_str = match state.estimated_time_remaining() {
            Some(eta) if eta.as_secs_f32() > 60.0 => format!("{:.1}m", eta.as_secs_f32() / 60.0),
            Some(eta) => format!("{:.1}s", eta.as_secs_f32()),
            None => "--".to_string(),
        };

        let build_status_line = |bw: usize| -> String {
            let filled = ((state.progress_percent / 100.0) * bw as f32) as usize;
            let empty = bw.saturating_sub(filled);
            format!(
                "[{}] [{}{}] {:.1}% | {}/{} files | {:.1} MB/s | ETA: {}",
                operation,
                "█".repeat(filled),
                "░".repeat(empty),
                state.progress_percent,
                state.processed_entries,
                state.total_entries,
                state.speed_mbps,
                eta_str
            )
        };

        // Shrink the bar until the line fits the terminal
        let mut bar_len = 40usize;
        let status_line = loop {
            let line = build_status_line(bar_len);
            if line.chars().count() <= term_width || bar_len <= 10 {
                break line;
            }
            bar_len -= 4;
        };

        let mut line_to_print = status_line;
        if let Ok(mut prev) = prev_len.lock() {
            let len = line_to_print.chars().count();
            if *prev > len {
                line_to_print.push_str(&" ".repeat(*prev - len));
            }
            *prev = len;
        }
        eprint!("\r\x1B[2K{}", line_to_print);
        io::stderr().flush().ok();

        if state.progress_percent >= 100.0 {
            eprintln!();
        }
    }
}
