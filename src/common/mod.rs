//! Common types shared by the index reader, the planner and the splitter.

use serde::{Deserialize, Serialize};

/// What kind of object a tar header describes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    RegularFile,
    Directory,
    Symlink,
    Other,
}

impl EntryKind {
    /// Maps a tar type flag to a kind. The legacy `\0` flag counts as a
    /// directory when the name ends with a slash.
    pub fn from_type_flag(flag: u8, name: &str) -> Self {
        match flag {
            b'0' => EntryKind::RegularFile,
            b'\0' if name.ends_with('/') => EntryKind::Directory,
            b'\0' => EntryKind::RegularFile,
            b'5' => EntryKind::Directory,
            b'2' => EntryKind::Symlink,
            _ => EntryKind::Other,
        }
    }

    pub fn is_regular(self) -> bool {
        self == EntryKind::RegularFile
    }
}

/// Identifies one header in source order. `occurrence` counts the earlier
/// entries carrying the same name, so it is `0` for unique names.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub occurrence: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// One archive entry as seen by the index pass. Never mutated after creation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    /// Archive-relative path.
    pub name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub occurrence: u32,
    /// Payload length in bytes.
    pub size: u64,
    pub kind: EntryKind,
}

impl EntryRecord {
    pub fn new(name: impl Into<String>, size: u64, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            occurrence: 0,
            size,
            kind,
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey {
            name: self.name.clone(),
            occurrence: self.occurrence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_flags() {
        assert_eq!(EntryKind::from_type_flag(b'0', "a"), EntryKind::RegularFile);
        assert_eq!(EntryKind::from_type_flag(b'\0', "a"), EntryKind::RegularFile);
        assert_eq!(EntryKind::from_type_flag(b'\0', "a/"), EntryKind::Directory);
        assert_eq!(EntryKind::from_type_flag(b'5', "a/"), EntryKind::Directory);
        assert_eq!(EntryKind::from_type_flag(b'2', "l"), EntryKind::Symlink);
        assert_eq!(EntryKind::from_type_flag(b'1', "h"), EntryKind::Other);
        assert_eq!(EntryKind::from_type_flag(b'7', "c"), EntryKind::Other);
        assert_eq!(EntryKind::from_type_flag(b'g', "g"), EntryKind::Other);
    }

    #[test]
    fn record_serializes_without_default_occurrence() {
        let rec = EntryRecord::new("a.bin", 10, EntryKind::RegularFile);
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(json, r#"{"name":"a.bin","size":10,"kind":"regular-file"}"#);
    }
}
