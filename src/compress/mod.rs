//! # Source Decompression
//!
//! Detects how the source archive is compressed and wraps the file in the
//! matching decoder. Both passes over the source go through [`open_source`],
//! so the stream that gets parsed is always the decompressed one.
//!
//! Supported containers:
//! - gzip (`.gz`, `.tgz`), including multi-member streams
//! - Zstandard (`.zst`, `.zstd`, `.tzst`)
//! - xz (`.xz`, `.txz`)

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tracing::debug;
use xz2::read::XzDecoder;

use crate::error::SplitError;

const READ_BUF_SIZE: usize = 1 << 20; // 1 MiB

/// Compression applied to the source archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Plain tar.
    None,
    Gzip,
    Zstd,
    Xz,
}

impl Compression {
    /// Decides from the file name alone. Returns `None` when the extension
    /// says nothing (no extension, or an unknown one).
    pub fn from_extension(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        let ext = name.rsplit_once('.').map(|(_, ext)| ext)?;
        match ext {
            "tar" => Some(Compression::None),
            "gz" | "tgz" => Some(Compression::Gzip),
            "zst" | "zstd" | "tzst" => Some(Compression::Zstd),
            "xz" | "txz" => Some(Compression::Xz),
            _ => None,
        }
    }

    /// Recognizes a compressed container by its leading bytes.
    pub fn from_magic(bytes: &[u8]) -> Self {
        match bytes {
            b if b.starts_with(b"\x1F\x8B") => Compression::Gzip,
            b if b.starts_with(b"\x28\xB5\x2F\xFD") => Compression::Zstd,
            b if b.starts_with(b"\xFD7zXZ\x00") => Compression::Xz,
            _ => Compression::None,
        }
    }

    /// Extension first, then a peek at the first bytes of the file.
    pub fn detect(path: &Path) -> Result<Self, SplitError> {
        if let Some(found) = Self::from_extension(path) {
            return Ok(found);
        }
        let mut file = File::open(path).map_err(|e| open_error(path, e))?;
        let mut buf = [0u8; 6];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(open_error(path, e)),
            }
        }
        Ok(Self::from_magic(&buf[..filled]))
    }

    /// Outputs are always plain tar, so a compression suffix is dropped from
    /// the source name: `layer.tar.gz` and `layer.tgz` both become `layer.tar`.
    pub fn plain_file_name(file_name: &str) -> String {
        let lower = file_name.to_ascii_lowercase();
        for (suffix, replacement) in [
            (".tgz", ".tar"),
            (".tzst", ".tar"),
            (".txz", ".tar"),
            (".gz", ""),
            (".zstd", ""),
            (".zst", ""),
            (".xz", ""),
        ] {
            if lower.ends_with(suffix) && lower.len() > suffix.len() {
                let stem = &file_name[..file_name.len() - suffix.len()];
                return format!("{stem}{replacement}");
            }
        }
        file_name.to_string()
    }
}

fn open_error(path: &Path, source: std::io::Error) -> SplitError {
    SplitError::Open {
        path: path.to_path_buf(),
        source,
    }
}

/// Opens the source archive and returns a reader yielding plain tar bytes.
pub fn open_source(path: &Path) -> Result<(Box<dyn Read>, Compression), SplitError> {
    let compression = Compression::detect(path)?;
    let file = File::open(path).map_err(|e| open_error(path, e))?;
    let buffered = BufReader::with_capacity(READ_BUF_SIZE, file);
    debug!(path = %path.display(), ?compression, "opening source archive");

    let reader: Box<dyn Read> = match compression {
        Compression::None => Box::new(buffered),
        Compression::Gzip => Box::new(MultiGzDecoder::new(buffered)),
        Compression::Zstd => Box::new(
            zstd::stream::read::Decoder::with_buffer(buffered).map_err(|e| open_error(path, e))?,
        ),
        Compression::Xz => Box::new(XzDecoder::new_multi_decoder(buffered)),
    };
    Ok((reader, compression))
}
