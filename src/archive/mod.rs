//! # Tar Stream Layer
//!
//! Entry-level access to a source archive on top of `tar::Archive` in raw
//! mode. Raw mode hands out GNU long name records (`L`, `K`) and PAX local
//! headers (`x`) as entries of their own, with their exact header blocks, so
//! [`TarEntryStream`] can gather them in front of the entry they describe and
//! a [`TarWriter`] can re-emit the whole group unchanged.
//!
//! The stream keeps the bookkeeping both passes must agree on: the resolved
//! name, the entry kind taken from the raw type flag, and an occurrence
//! counter for names seen more than once.

mod writer;

pub use writer::TarWriter;

use std::collections::HashMap;
use std::io::{self, Read, Write};

use tar::{Archive, Entries, Entry, EntryType, Header, PaxExtensions};
use tracing::{debug, warn};

use crate::common::{EntryKey, EntryKind};
use crate::error::SplitError;

/// Size of one tar block.
pub const BLOCK_SIZE: u64 = 512;

/// Extension payloads above this size are rejected as malformed.
const MAX_EXTENSION_SIZE: u64 = 1 << 20;

/// Rounds a payload length up to the block boundary.
pub fn padded_size(size: u64) -> Option<u64> {
    size.checked_add(BLOCK_SIZE - 1)
        .map(|n| n / BLOCK_SIZE * BLOCK_SIZE)
}

/// An `L`, `K` or `x` record, kept exactly as read.
#[derive(Clone)]
pub struct Extension {
    pub header: Header,
    pub data: Vec<u8>,
}

/// One entry of the source stream. The payload stays in the archive until
/// [`SourceEntry::copy_payload`] (or a [`TarWriter`]) reads it, or the stream
/// moves on.
pub struct SourceEntry<'a, R: 'a + Read> {
    pub key: EntryKey,
    pub kind: EntryKind,
    /// Payload length in bytes, before block padding.
    pub size: u64,
    /// Extension records that precede the entry, in source order.
    pub extensions: Vec<Extension>,
    /// Byte offset of the first extension record, or of the header itself.
    pub offset: u64,
    entry: Entry<'a, R>,
}

impl<'a, R: Read> SourceEntry<'a, R> {
    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn header(&self) -> &Header {
        self.entry.header()
    }

    /// Copies exactly `size` payload bytes to `sink`. A short source is a read
    /// error.
    pub fn copy_payload<W: Write>(&mut self, sink: &mut W) -> Result<u64, SplitError> {
        let mut payload = ExactReader::new(&mut self.entry, self.size, |_| {});
        io::copy(&mut payload, sink)
            .map_err(|e| SplitError::read(format!("payload of '{}'", self.key.name), e))
    }
}

/// Sequential reader over the entries of a tar archive.
pub struct TarEntryStream<'a, R: 'a + Read> {
    entries: Entries<'a, R>,
    seen: HashMap<String, u32>,
    data_end: u64,
}

impl<'a, R: Read> TarEntryStream<'a, R> {
    pub fn new(archive: &'a mut Archive<R>) -> Result<Self, SplitError> {
        let entries = archive
            .entries()
            .map_err(|e| SplitError::read("archive start", e))?
            .raw(true);
        Ok(Self {
            entries,
            seen: HashMap::new(),
            data_end: 0,
        })
    }

    /// Returns the next entry, or `None` at the end of the archive. Unread
    /// payload of the previous entry is skipped by the archive.
    pub fn next_entry(&mut self) -> Result<Option<SourceEntry<'a, R>>, SplitError> {
        let mut extensions = Vec::new();
        let mut start = None;
        let mut long_name = None;
        let mut pax_path = None;
        let mut pax_size = None;

        loop {
            let mut entry = match self.entries.next() {
                Some(entry) => entry.map_err(|e| {
                    SplitError::read(format!("header after byte {}", self.data_end), e)
                })?,
                None if start.is_some() => {
                    return Err(SplitError::malformed(
                        self.data_end,
                        "archive ends after an extension header",
                    ));
                }
                None => return Ok(None),
            };

            let offset = entry.raw_header_position();
            let size = entry.size();
            let padded = padded_size(size).ok_or_else(|| {
                SplitError::malformed(offset, format!("entry size {size} overflows"))
            })?;
            self.data_end = entry.raw_file_position().saturating_add(padded);

            let entry_type = entry.header().entry_type();
            if is_local_extension(entry_type) {
                start.get_or_insert(offset);
                let data = read_extension(&mut entry, offset, size)?;
                if entry_type.is_gnu_longname() {
                    long_name = Some(trim_nul(&data));
                } else if entry_type.is_pax_local_extensions() {
                    parse_pax(&data, offset, &mut pax_path, &mut pax_size)?;
                }
                extensions.push(Extension {
                    header: entry.header().clone(),
                    data,
                });
                continue;
            }

            // raw mode frames the payload by the header's size field
            if let Some(pax) = pax_size {
                if pax != size {
                    return Err(SplitError::malformed(
                        offset,
                        format!("PAX size {pax} disagrees with header size {size}"),
                    ));
                }
            }

            let name = match (pax_path, long_name) {
                (Some(path), _) => path,
                (None, Some(long)) => long,
                (None, None) => String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
            };
            // raw flag byte: `tar` folds the legacy `\0` flag into `Regular`
            let kind = EntryKind::from_type_flag(entry.header().as_bytes()[156], &name);

            let count = self.seen.entry(name.clone()).or_insert(0);
            let occurrence = *count;
            *count += 1;
            if occurrence > 0 {
                warn!(name = %name, occurrence, "duplicate entry name in archive");
            }

            return Ok(Some(SourceEntry {
                key: EntryKey { name, occurrence },
                kind,
                size,
                extensions,
                offset: start.unwrap_or(offset),
                entry,
            }));
        }
    }

    /// Offset just past the padded payload of the last entry read.
    pub fn data_end(&self) -> u64 {
        self.data_end
    }
}

/// Drains whatever follows the last entry so a decompressor gets to check its
/// trailer. Returns the number of bytes drained.
pub fn finish_source<R: Read>(archive: Archive<R>) -> Result<u64, SplitError> {
    let mut reader = archive.into_inner();
    let trailing = io::copy(&mut reader, &mut io::sink())
        .map_err(|e| SplitError::read("data after the last entry", e))?;
    if trailing < BLOCK_SIZE {
        warn!("archive ended without an end-of-archive marker");
    }
    debug!(trailing, "reached end of archive");
    Ok(trailing)
}

fn is_local_extension(entry_type: EntryType) -> bool {
    entry_type.is_pax_local_extensions()
        || entry_type.is_gnu_longname()
        || entry_type.is_gnu_longlink()
}

fn read_extension<R: Read>(
    entry: &mut Entry<'_, R>,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>, SplitError> {
    if size > MAX_EXTENSION_SIZE {
        return Err(SplitError::malformed(
            offset,
            format!("extension header of {size} bytes exceeds limit"),
        ));
    }
    let mut data = Vec::with_capacity(size as usize);
    let mut exact = ExactReader::new(entry, size, |_| {});
    exact
        .read_to_end(&mut data)
        .map_err(|e| SplitError::read(format!("extension header at byte {offset}"), e))?;
    Ok(data)
}

fn parse_pax(
    data: &[u8],
    offset: u64,
    path: &mut Option<String>,
    size: &mut Option<u64>,
) -> Result<(), SplitError> {
    for record in PaxExtensions::new(data) {
        let record = record
            .map_err(|e| SplitError::malformed(offset, format!("bad PAX record: {e}")))?;
        match record.key() {
            Ok("path") => {
                *path = Some(String::from_utf8_lossy(record.value_bytes()).into_owned());
            }
            Ok("size") => {
                let value = record
                    .value()
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .ok_or_else(|| SplitError::malformed(offset, "bad PAX size record"))?;
                *size = Some(value);
            }
            _ => {}
        }
    }
    Ok(())
}

fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Yields exactly `remaining` bytes of `inner`, reporting each chunk to
/// `on_read`. Running dry early is `UnexpectedEof`; `source_failed` tells such
/// errors apart from failures of whatever consumes this reader.
pub(crate) struct ExactReader<T, F> {
    inner: T,
    remaining: u64,
    on_read: F,
    source_failed: bool,
}

impl<T: Read, F: FnMut(u64)> ExactReader<T, F> {
    pub(crate) fn new(inner: T, remaining: u64, on_read: F) -> Self {
        Self {
            inner,
            remaining,
            on_read,
            source_failed: false,
        }
    }

    pub(crate) fn source_failed(&self) -> bool {
        self.source_failed
    }
}

impl<T: Read, F: FnMut(u64)> Read for ExactReader<T, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = match self.inner.read(&mut buf[..want]) {
            Ok(0) => {
                self.source_failed = true;
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            Ok(n) => n,
            Err(e) => {
                if e.kind() != io::ErrorKind::Interrupted {
                    self.source_failed = true;
                }
                return Err(e);
            }
        };
        self.remaining -= n as u64;
        (self.on_read)(n as u64);
        Ok(n)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    pub(crate) fn file_header(size: u64) -> Header {
        let mut header = Header::new_gnu();
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
        header.set_entry_type(EntryType::Regular);
        header
    }

    fn build(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = file_header(data.len() as u64);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    struct Seen {
        key: EntryKey,
        kind: EntryKind,
        size: u64,
        offset: u64,
        extensions: Vec<Extension>,
        header: Vec<u8>,
        payload: Vec<u8>,
    }

    fn collect(bytes: &[u8]) -> Result<Vec<Seen>, SplitError> {
        let mut archive = Archive::new(Cursor::new(bytes));
        let mut stream = TarEntryStream::new(&mut archive)?;
        let mut out = Vec::new();
        while let Some(mut entry) = stream.next_entry()? {
            let mut payload = Vec::new();
            entry.copy_payload(&mut payload)?;
            out.push(Seen {
                header: entry.header().as_bytes().to_vec(),
                key: entry.key,
                kind: entry.kind,
                size: entry.size,
                offset: entry.offset,
                extensions: entry.extensions,
                payload,
            });
        }
        Ok(out)
    }

    fn pax_record(key: &str, value: &str) -> String {
        let body = format!(" {key}={value}\n");
        let mut len = body.len();
        while len.to_string().len() + body.len() != len {
            len = len.to_string().len() + body.len();
        }
        format!("{len}{body}")
    }

    /// A PAX `x` header carrying `records`, then a ustar entry named `short`
    /// whose header size is `size`, then `payload`.
    fn pax_archive(records: &str, short: &str, size: u64, payload: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut pax = Header::new_ustar();
        pax.set_path("PaxHeaders/entry").unwrap();
        pax.set_entry_type(EntryType::XHeader);
        pax.set_size(records.len() as u64);
        pax.set_cksum();
        builder.append(&pax, records.as_bytes()).unwrap();

        let mut header = Header::new_ustar();
        header.set_path(short).unwrap();
        header.set_size(size);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        builder.append(&header, payload).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn walks_entries_and_keeps_header_bytes() {
        let bytes = build(&[("a.txt", b"hello"), ("b/c.bin", &[7u8; 700])]);
        let entries = collect(&bytes).unwrap();
        assert_eq!(entries.len(), 2);

        let a = &entries[0];
        assert_eq!(a.key.name, "a.txt");
        assert_eq!(a.size, 5);
        assert_eq!(a.kind, EntryKind::RegularFile);
        assert!(a.extensions.is_empty());
        assert_eq!(&a.header[..], &bytes[..512]);
        assert_eq!(a.payload, b"hello");

        let c = &entries[1];
        assert_eq!(c.key.name, "b/c.bin");
        assert_eq!(c.offset, 1024);
        assert_eq!(c.payload, vec![7u8; 700]);
    }

    #[test]
    fn unread_payload_is_skipped() {
        let bytes = build(&[("a", &[1u8; 2000]), ("b", b"x")]);
        let mut archive = Archive::new(Cursor::new(&bytes));
        let mut stream = TarEntryStream::new(&mut archive).unwrap();
        assert_eq!(stream.next_entry().unwrap().unwrap().name(), "a");
        let b = stream.next_entry().unwrap().unwrap();
        assert_eq!(b.name(), "b");
        assert_eq!(b.offset, 512 + 2048);
        drop(b);
        assert!(stream.next_entry().unwrap().is_none());
        assert_eq!(stream.data_end(), 512 + 2048 + 1024);
    }

    #[test]
    fn gnu_long_name_is_resolved_and_kept_verbatim() {
        let long = format!("{}/file.dat", "d".repeat(150));
        let bytes = build(&[(long.as_str(), b"payload")]);
        let entries = collect(&bytes).unwrap();
        let entry = &entries[0];
        assert_eq!(entry.key.name, long);
        assert_eq!(entry.offset, 0);
        assert_eq!(entry.extensions.len(), 1);
        let ext = &entry.extensions[0];
        assert!(ext.header.entry_type().is_gnu_longname());
        assert_eq!(&ext.header.as_bytes()[..], &bytes[..512]);
        assert_eq!(trim_nul(&ext.data), long);
        assert_eq!(&entry.header[..], &bytes[1024..1536]);
    }

    #[test]
    fn pax_path_overrides_the_header_name() {
        let records = pax_record("path", "very/long/pax/name.bin");
        let bytes = pax_archive(&records, "name.bin", 3, b"abc");

        let entries = collect(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.key.name, "very/long/pax/name.bin");
        assert_eq!(entry.size, 3);
        assert_eq!(entry.extensions[0].data, records.as_bytes());
        assert_eq!(entry.payload, b"abc");
    }

    #[test]
    fn pax_size_must_match_the_header() {
        let records = format!("{}{}", pax_record("path", "big.bin"), pax_record("size", "3"));
        let bytes = pax_archive(&records, "big.bin", 0, b"");
        let err = collect(&bytes).err().expect("size mismatch must fail");
        assert!(matches!(err, SplitError::Malformed { offset: 1024, .. }), "{err}");

        let records = format!("{}{}", pax_record("path", "ok.bin"), pax_record("size", "3"));
        let bytes = pax_archive(&records, "ok.bin", 3, b"abc");
        assert_eq!(collect(&bytes).unwrap()[0].size, 3);
    }

    #[test]
    fn directories_symlinks_and_legacy_flags_are_classified() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder.append_data(&mut dir, "dir/", io::empty()).unwrap();
        let mut link = Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_size(0);
        builder.append_link(&mut link, "dir/link", "target").unwrap();
        let mut legacy = Header::new_old();
        legacy.set_entry_type(EntryType::new(b'\0'));
        legacy.set_size(2);
        builder.append_data(&mut legacy, "old.txt", &b"hi"[..]).unwrap();
        let bytes = builder.into_inner().unwrap();

        let kinds: Vec<_> = collect(&bytes).unwrap().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EntryKind::Directory, EntryKind::Symlink, EntryKind::RegularFile]
        );
    }

    #[test]
    fn duplicate_names_get_occurrences() {
        let bytes = build(&[("same", b"1"), ("other", b"2"), ("same", b"3")]);
        let keys: Vec<_> = collect(&bytes).unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys[0].occurrence, 0);
        assert_eq!(keys[1].occurrence, 0);
        assert_eq!(keys[2], EntryKey { name: "same".into(), occurrence: 1 });
    }

    #[test]
    fn truncated_payload_is_a_read_error() {
        let bytes = build(&[("a", &[1u8; 2000])]);
        let cut = &bytes[..512 + 1000];
        let mut archive = Archive::new(Cursor::new(cut));
        let mut stream = TarEntryStream::new(&mut archive).unwrap();
        let mut entry = stream.next_entry().unwrap().unwrap();
        let err = entry.copy_payload(&mut io::sink()).unwrap_err();
        assert!(err.is_read_error());
        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn truncated_payload_is_caught_when_skipping() {
        let bytes = build(&[("a", &[1u8; 2000]), ("b", b"x")]);
        let err = collect(&bytes[..512 + 1000]).err().expect("truncation must fail");
        assert!(err.is_read_error(), "{err}");

        let mut archive = Archive::new(Cursor::new(&bytes[..512 + 1000]));
        let mut stream = TarEntryStream::new(&mut archive).unwrap();
        stream.next_entry().unwrap().unwrap();
        assert!(stream.next_entry().err().expect("skip must fail").is_read_error());
    }

    #[test]
    fn truncated_header_is_a_read_error() {
        let bytes = build(&[("a", b"x")]);
        let err = collect(&bytes[..100]).err().expect("partial header must fail");
        assert!(err.is_read_error());
    }

    #[test]
    fn corrupted_checksum_is_a_read_error() {
        let mut bytes = build(&[("a", b"x")]);
        bytes[0] = b'z';
        let err = collect(&bytes).err().expect("checksum mismatch must fail");
        assert!(err.is_read_error(), "{err}");
    }

    #[test]
    fn extension_without_entry_is_malformed() {
        let long = "n".repeat(200);
        let bytes = build(&[(long.as_str(), b"x")]);
        // keep only the L record
        let mut cut = bytes[..1024].to_vec();
        cut.extend_from_slice(&[0u8; 1024]);
        let err = collect(&cut).err().expect("dangling extension must fail");
        assert!(matches!(err, SplitError::Malformed { .. }), "{err}");
    }

    #[test]
    fn drained_tail_reports_the_end_marker() {
        let bytes = build(&[("a", b"x")]);
        let mut archive = Archive::new(Cursor::new(bytes.clone()));
        let mut stream = TarEntryStream::new(&mut archive).unwrap();
        while stream.next_entry().unwrap().is_some() {}
        drop(stream);
        // the archive stops at the first zero block
        assert_eq!(finish_source(archive).unwrap(), 512);

        let mut archive = Archive::new(Cursor::new(bytes[..1024].to_vec()));
        let mut stream = TarEntryStream::new(&mut archive).unwrap();
        assert!(stream.next_entry().unwrap().is_some());
        assert!(stream.next_entry().unwrap().is_none());
        drop(stream);
        assert_eq!(finish_source(archive).unwrap(), 0);
    }

    #[test]
    fn exact_reader_reports_short_sources() {
        let mut seen = 0;
        let mut reader = ExactReader::new(&b"abc"[..], 5, |n| seen += n);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(reader.source_failed());
        drop(reader);
        assert_eq!(seen, 3);
        assert_eq!(out, b"abc");
    }

    #[test]
    fn padding_rounds_to_blocks() {
        assert_eq!(padded_size(0), Some(0));
        assert_eq!(padded_size(1), Some(512));
        assert_eq!(padded_size(512), Some(512));
        assert_eq!(padded_size(513), Some(1024));
        assert_eq!(padded_size(u64::MAX), None);
    }
}
