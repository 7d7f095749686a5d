//! # tarsplit Core Library
//!
//! This crate repartitions the regular files of one tar archive (optionally
//! gzip, zstd or xz compressed) into several plain tar archives, each bounded
//! by a target size, without touching entry contents.
//!
//! It is designed to be used by the `tarsplit` command-line application, but
//! its public API can also be used to plan and perform splits programmatically.
//!
//! ## Key Modules
//!
//! - [`index`]: First pass. Lists every entry (name, size, kind) of the source.
//! - [`plan`]: Groups entries into size-bounded plans and builds the routing table.
//! - [`split`]: Second pass. Copies each regular file verbatim into its plan's archive.
//! - [`verify`]: Re-reads the outputs and checks them against the source.
//! - [`archive`]: Block-level tar reading and writing shared by all passes.
//! - [`compress`]: Transparent decompression of the source.
//!
//! ## Examples
//!
//! ```no_run
//! use tarsplit::pipeline::{self, SplitJob};
//!
//! let job = SplitJob::new("layer.tar.gz", 5 << 30, "out");
//! let outcome = pipeline::run(&job, None)?;
//! println!("wrote {} archives", outcome.outputs.len());
//! # Ok::<(), tarsplit::SplitError>(())
//! ```

pub mod archive;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod compress;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod split;
pub mod verify;

pub use error::SplitError;
