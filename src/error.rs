use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `tarsplit` crate.
///
/// None of these are recovered locally: each one aborts the run after the
/// held streams have been released.
#[derive(Debug, Error)]
pub enum SplitError {
    /// The source archive could not be opened (or its decompressor could not
    /// be set up).
    #[error("cannot open source archive '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source stream failed or ended early. `context` names the entry or
    /// the phase that was reading.
    #[error("read error ({context}): {source}")]
    Read {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A header block could not be decoded.
    #[error("malformed archive at byte offset {offset}: {reason}")]
    Malformed { offset: u64, reason: String },

    /// A destination archive could not be created, written or finalized.
    #[error("write error on '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The rewrite pass met an entry that no plan claims. The two passes over
    /// the source disagree, so the run cannot continue.
    #[error("no plan assignment for entry '{name}' (occurrence {occurrence})")]
    Routing { name: String, occurrence: u32 },

    /// The post-split check found an output that does not match the source.
    #[error("verification failed: {reason}")]
    Verify { reason: String },

    /// Invalid user-supplied configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Plan manifest could not be serialized.
    #[error("serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl SplitError {
    pub(crate) fn read(context: impl Into<String>, source: std::io::Error) -> Self {
        SplitError::Read {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SplitError::Write {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        SplitError::Malformed {
            offset,
            reason: reason.into(),
        }
    }

    /// True for the failures the format calls `ReadError`.
    pub fn is_read_error(&self) -> bool {
        matches!(self, SplitError::Read { .. } | SplitError::Malformed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn messages_carry_context() {
        let err = SplitError::Routing {
            name: "data/blob.bin".into(),
            occurrence: 0,
        };
        assert!(err.to_string().contains("data/blob.bin"));

        let err = SplitError::write("/tmp/out/0-x.tar", io::Error::other("disk full"));
        let msg = err.to_string();
        assert!(msg.contains("0-x.tar"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn read_error_classification() {
        assert!(SplitError::malformed(512, "bad checksum").is_read_error());
        assert!(SplitError::read("entry 'a'", io::ErrorKind::UnexpectedEof.into()).is_read_error());
        assert!(!SplitError::Config("zero".into()).is_read_error());
    }
}
