//! Codec for GNU tar listed-incremental snapshot files (`files.snar`).
//!
//! Three layouts exist:
//! - format 0: first line is the time stamp; one `[+]dev ino name` line per directory
//! - format 1: `GNU tar-<ver>-1` header, `sec nsec` line, `[+]sec nsec dev ino name` lines
//! - format 2: `GNU tar-<ver>-2` header followed by NUL-delimited fields and a
//!   dumpdir per directory, each record closed by a double NUL
//!
//! Only format 2 is emitted.

pub mod record;

pub use record::{
    split_parent, split_parent_bytes, DumpdirCode, DumpdirEntry, SnarHeader, SnarRecord,
};

use crate::utils::errors::{EngineError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const HEADER_PREFIX: &str = "GNU tar-";

/// Version written into emitted headers.
const EMITTED_TAR_VERSION: &str = "1.26";

fn damaged(msg: impl Into<String>) -> EngineError {
    EngineError::DamagedMetadata(msg.into())
}

/// Parse a `GNU tar-<ver>-<format>` header line.
fn parse_header_line(line: &str) -> Option<(String, u8)> {
    let rest = line.strip_prefix(HEADER_PREFIX)?;
    let (tar_version, format) = rest.rsplit_once('-')?;
    let format = format.parse().ok()?;
    Some((tar_version.to_string(), format))
}

/// Inspect the first line of a snar file and return its format (0, 1 or 2).
pub fn detect_format_version(path: &Path) -> Result<u8> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;
    let line = String::from_utf8_lossy(&line);
    Ok(parse_header_line(line.trim_end_matches('\n'))
        .map(|(_, format)| format)
        .unwrap_or(0))
}

/// Open `path` for lazy record iteration. Every call starts from the top of the file.
pub fn parse(path: &Path) -> Result<SnarReader<BufReader<File>>> {
    SnarReader::new(BufReader::new(File::open(path)?))
}

/// Lazy iterator over the records of a snar stream.
pub struct SnarReader<R> {
    reader: R,
    header: SnarHeader,
    done: bool,
}

impl<R: BufRead> SnarReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let mut first = Vec::new();
        reader.read_until(b'\n', &mut first)?;
        let first = String::from_utf8_lossy(&first)
            .trim_end_matches('\n')
            .to_string();

        let header = match parse_header_line(&first) {
            Some((tar_version, 2)) => {
                let mut stamp = || -> Result<Vec<u8>> {
                    read_token(&mut reader)?.ok_or_else(|| damaged("missing time stamp"))
                };
                let secs = stamp()?;
                let nanos = stamp()?;
                SnarHeader {
                    format: 2,
                    tar_version: Some(tar_version),
                    timestamp_secs: parse_num(&secs, "time stamp")?,
                    timestamp_nanos: parse_num(&nanos, "time stamp")?,
                }
            }
            Some((tar_version, 1)) => {
                let mut line = String::new();
                reader.read_line(&mut line)?;
                let mut fields = line.split_whitespace();
                let secs = fields.next().ok_or_else(|| damaged("missing time stamp"))?;
                SnarHeader {
                    format: 1,
                    tar_version: Some(tar_version),
                    timestamp_secs: parse_num(secs.as_bytes(), "time stamp")?,
                    timestamp_nanos: fields
                        .next()
                        .map(|n| parse_num(n.as_bytes(), "time stamp"))
                        .transpose()?
                        .unwrap_or(0),
                }
            }
            Some((_, other)) => {
                return Err(EngineError::UnsupportedVersion(format!(
                    "incremental dump format {other}"
                )))
            }
            None => SnarHeader {
                format: 0,
                tar_version: None,
                timestamp_secs: if first.trim().is_empty() {
                    0
                } else {
                    parse_num(first.trim().as_bytes(), "time stamp")?
                },
                timestamp_nanos: 0,
            },
        };

        Ok(Self {
            reader,
            header,
            done: false,
        })
    }

    pub fn header(&self) -> &SnarHeader {
        &self.header
    }

    fn next_text_record(&mut self) -> Result<Option<SnarRecord>> {
        let mut line = Vec::new();
        loop {
            line.clear();
            if self.reader.read_until(b'\n', &mut line)? == 0 {
                return Ok(None);
            }
            if line.iter().any(|b| !b.is_ascii_whitespace()) {
                break;
            }
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }

        let (nfs, line) = match line.strip_prefix(b"+") {
            Some(rest) => (true, rest),
            None => (false, line.as_slice()),
        };

        let mut record = SnarRecord {
            nfs,
            ..Default::default()
        };
        let field_count = if self.header.format == 1 { 5 } else { 3 };
        let mut fields = line.splitn(field_count, |b| *b == b' ');
        if self.header.format == 1 {
            record.mtime_secs = parse_num(fields.next().unwrap_or_default(), "mtime")?;
            record.mtime_nanos = parse_num(fields.next().unwrap_or_default(), "mtime")?;
        }
        record.dev = parse_num(fields.next().unwrap_or_default(), "device")?;
        record.ino = parse_num(fields.next().unwrap_or_default(), "inode")?;
        record.name = fields
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                damaged(format!(
                    "record without name: {}",
                    String::from_utf8_lossy(line)
                ))
            })?
            .to_vec();
        Ok(Some(record))
    }

    fn next_binary_record(&mut self) -> Result<Option<SnarRecord>> {
        let flag = match read_token(&mut self.reader)? {
            None => return Ok(None),
            Some(flag) if flag.is_empty() => return Ok(None),
            Some(flag) => flag,
        };

        let mut field = |what: &str| -> Result<Vec<u8>> {
            read_token(&mut self.reader)?
                .ok_or_else(|| damaged(format!("truncated record: missing {what}")))
        };

        let mtime_secs = parse_num(&field("mtime")?, "mtime")?;
        let mtime_nanos = parse_num(&field("mtime")?, "mtime")?;
        let dev = parse_num(&field("device")?, "device")?;
        let ino = parse_num(&field("inode")?, "inode")?;
        let name = field("name")?;

        let mut entries = Vec::new();
        loop {
            let token = field("dumpdir terminator")?;
            if token.is_empty() {
                break;
            }
            let code = DumpdirCode::from_byte(token[0]).ok_or_else(|| {
                damaged(format!(
                    "unknown dumpdir control code in {:?}",
                    String::from_utf8_lossy(&token)
                ))
            })?;
            entries.push(DumpdirEntry::new(code, &token[1..]));
        }

        let mut terminator = [0u8; 1];
        let terminated = std::io::Read::read_exact(&mut self.reader, &mut terminator).is_ok()
            && terminator[0] == 0;
        if !terminated {
            return Err(damaged(format!(
                "missing record terminator after {}",
                String::from_utf8_lossy(&name)
            )));
        }

        Ok(Some(SnarRecord {
            nfs: flag == b"1" || flag == b"+",
            mtime_secs,
            mtime_nanos,
            dev,
            ino,
            name,
            entries,
        }))
    }
}

impl<R: BufRead> Iterator for SnarReader<R> {
    type Item = Result<SnarRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = match self.header.format {
            2 => self.next_binary_record(),
            _ => self.next_text_record(),
        };
        match result {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read one NUL-terminated token. `None` at a clean end of stream.
fn read_token<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let n = reader.read_until(0, &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&0) {
        return Err(damaged("unterminated field at end of file"));
    }
    buf.pop();
    Ok(Some(buf))
}

fn parse_num<T: std::str::FromStr>(field: &[u8], what: &str) -> Result<T> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| {
            damaged(format!(
                "invalid {what} field: {:?}",
                String::from_utf8_lossy(field)
            ))
        })
}

/// Write a format-2 stream.
pub fn write_records<'a, W, I>(
    writer: &mut W,
    timestamp: (i64, i64),
    records: I,
) -> std::io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a SnarRecord>,
{
    writeln!(writer, "{HEADER_PREFIX}{EMITTED_TAR_VERSION}-2")?;
    write!(writer, "{}\0{}\0", timestamp.0, timestamp.1)?;

    for record in records {
        writer.write_all(if record.nfs { b"1\0" } else { b"0\0" })?;
        write!(
            writer,
            "{}\0{}\0{}\0{}\0",
            record.mtime_secs, record.mtime_nanos, record.dev, record.ino
        )?;
        writer.write_all(&record.name)?;
        writer.write_all(b"\0")?;
        for entry in &record.entries {
            writer.write_all(&[entry.code.as_byte()])?;
            writer.write_all(&entry.name)?;
            writer.write_all(b"\0")?;
        }
        writer.write_all(b"\0\0")?;
    }
    Ok(())
}

/// Write `records` to `path` as a format-2 snar file.
pub fn emit<'a, I>(path: &Path, timestamp: (i64, i64), records: I) -> Result<()>
where
    I: IntoIterator<Item = &'a SnarRecord>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    write_records(&mut writer, timestamp, records)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn sample_records() -> Vec<SnarRecord> {
        vec![
            SnarRecord {
                nfs: false,
                mtime_secs: 1_700_000_000,
                mtime_nanos: 123_456_789,
                dev: 2049,
                ino: 131_073,
                name: b"/home/user".to_vec(),
                entries: vec![
                    DumpdirEntry::new(DumpdirCode::Directory, "docs"),
                    DumpdirEntry::new(DumpdirCode::Included, "notes.txt"),
                    DumpdirEntry::new(DumpdirCode::NotDumped, "old.log"),
                ],
            },
            SnarRecord {
                nfs: true,
                mtime_secs: 1_700_000_100,
                mtime_nanos: 0,
                dev: 2049,
                ino: 131_074,
                name: b"/home/user/docs".to_vec(),
                entries: vec![],
            },
        ]
    }

    #[test]
    fn test_emit_then_parse_preserves_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("files.snar");
        let records = sample_records();

        emit(&path, (1_700_000_200, 5), &records).unwrap();
        assert_eq!(detect_format_version(&path).unwrap(), 2);

        let reader = parse(&path).unwrap();
        assert_eq!(reader.header().timestamp_secs, 1_700_000_200);
        assert_eq!(reader.header().tar_version.as_deref(), Some(EMITTED_TAR_VERSION));
        let parsed: Vec<SnarRecord> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(parsed, records);
    }

    #[test]
    fn test_binary_layout_matches_tar() {
        let record = SnarRecord {
            name: b"/d".to_vec(),
            entries: vec![DumpdirEntry::new(DumpdirCode::Included, "f")],
            ..Default::default()
        };
        let mut out = Vec::new();
        write_records(&mut out, (7, 0), [&record]).unwrap();
        let expected = b"GNU tar-1.26-2\n7\x000\x000\x000\x000\x000\x000\x00/d\x00Yf\x00\x00\x00";
        assert_eq!(out, expected.to_vec());
    }

    #[test]
    fn test_non_utf8_names_survive_rewrite() {
        let data = b"GNU tar-1.26-2\n7\x000\x00\
                     0\x000\x000\x000\x00/d\xe9\x00Yf\xff\xfe\x00\x00\x00";
        let reader = SnarReader::new(Cursor::new(data.to_vec())).unwrap();
        let records: Vec<SnarRecord> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(records[0].name, b"/d\xe9".to_vec());
        assert_eq!(records[0].entries[0].name, b"f\xff\xfe".to_vec());
        assert_eq!(
            records[0].child_path_bytes(&records[0].entries[0]),
            b"/d\xe9/f\xff\xfe".to_vec()
        );

        let mut out = Vec::new();
        write_records(&mut out, (7, 0), &records).unwrap();
        assert_eq!(out, data.to_vec());
    }

    #[test]
    fn test_parse_format_one() {
        let data = "GNU tar-1.20-1\n1700000000 42\n\
                    +1699999999 5 2049 77 /srv/www\n\
                    1699999998 0 2049 78 /srv/my dir\n";
        let reader = SnarReader::new(Cursor::new(data)).unwrap();
        assert_eq!(reader.header().format, 1);
        assert_eq!(reader.header().timestamp_nanos, 42);

        let records: Vec<SnarRecord> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].nfs);
        assert_eq!(records[0].mtime_secs, 1_699_999_999);
        assert_eq!(records[0].ino, 77);
        assert_eq!(records[1].name, b"/srv/my dir".to_vec());
        assert!(records[1].entries.is_empty());
    }

    #[test]
    fn test_parse_format_zero() {
        let data = "1700000000\n2049 77 /etc\n+2050 5 /mnt/nfs share\n";
        let reader = SnarReader::new(Cursor::new(data)).unwrap();
        assert_eq!(reader.header().format, 0);

        let records: Vec<SnarRecord> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(records[0].dev, 2049);
        assert_eq!(records[0].name, b"/etc".to_vec());
        assert!(records[1].nfs);
        assert_eq!(records[1].name, b"/mnt/nfs share".to_vec());
    }

    #[test]
    fn test_detect_format_without_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.snar");
        std::fs::write(&path, "1700000000\n2049 77 /etc\n").unwrap();
        assert_eq!(detect_format_version(&path).unwrap(), 0);
    }

    #[test]
    fn test_truncated_record_is_damaged() {
        let data = b"GNU tar-1.26-2\n0\x000\x000\x001\x00".to_vec();
        let mut reader = SnarReader::new(Cursor::new(data)).unwrap();
        assert!(matches!(reader.next(), Some(Err(EngineError::DamagedMetadata(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_recorded_paths() {
        let records = sample_records();
        let paths: Vec<String> = records[0].recorded_paths().collect();
        assert_eq!(paths, vec!["/home/user/docs", "/home/user/notes.txt"]);
    }
}
