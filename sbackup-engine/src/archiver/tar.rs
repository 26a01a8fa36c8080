//! GNU tar invocation.

use super::{Archiver, CreateRequest, ExtractRequest, Members};
use crate::fs::raw::path_to_bytes;
use crate::snapshot::format::Compression;
use crate::utils::errors::{EngineError, Result};
use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct TarArchiver {
    tar_path: PathBuf,
    volume_script: Option<PathBuf>,
}

impl Default for TarArchiver {
    fn default() -> Self {
        Self::new("tar")
    }
}

fn opt(name: &str, value: &Path) -> OsString {
    let mut arg = OsString::from(name);
    arg.push(value);
    arg
}

fn compression_flag(compression: Compression) -> Option<&'static str> {
    match compression {
        Compression::None => None,
        Compression::Gzip => Some("--gzip"),
        Compression::Bzip2 => Some("--bzip2"),
    }
}

/// tar strips the leading `/` from stored names, so members are matched without it.
fn member_name(path: &Path) -> &Path {
    let trimmed = path.strip_prefix("/").unwrap_or(path);
    if trimmed.as_os_str().is_empty() {
        Path::new(".")
    } else {
        trimmed
    }
}

impl TarArchiver {
    pub fn new(tar_path: impl Into<PathBuf>) -> Self {
        Self {
            tar_path: tar_path.into(),
            volume_script: None,
        }
    }

    /// Script run by tar between volumes of a split archive.
    pub fn with_volume_script(mut self, script: Option<PathBuf>) -> Self {
        self.volume_script = script;
        self
    }

    pub fn create_args(&self, request: &CreateRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--create".into(),
            "--sparse".into(),
            "--ignore-failed-read".into(),
            opt("--directory=", &request.directory),
            opt("--files-from=", &request.files_from),
        ];
        if let Some(exclude_from) = &request.exclude_from {
            args.push(opt("--exclude-from=", exclude_from));
        }
        if let Some(snar) = &request.listed_incremental {
            args.push(opt("--listed-incremental=", snar));
        }
        args.push(opt("--file=", &request.archive));

        if request.split_size > 0 {
            // Multi-volume archives cannot be compressed.
            args.push("--multi-volume".into());
            args.push(format!("--tape-length={}", request.split_size).into());
            self.push_volume_script(&mut args);
        } else if let Some(flag) = compression_flag(request.compression) {
            args.push(flag.into());
        }
        args
    }

    fn push_volume_script(&self, args: &mut Vec<OsString>) {
        if let Some(script) = &self.volume_script {
            args.push(opt("--new-volume-script=", script));
        }
    }

    /// Arguments plus the NUL-delimited member list to feed on stdin, if any.
    pub fn extract_args(&self, request: &ExtractRequest) -> (Vec<OsString>, Option<Vec<u8>>) {
        let mut args: Vec<OsString> = vec![
            "--extract".into(),
            opt("--file=", &request.archive),
            opt("--directory=", &request.target_dir),
        ];
        if request.split_size > 0 {
            args.push("--multi-volume".into());
            self.push_volume_script(&mut args);
        } else if let Some(flag) = compression_flag(request.compression) {
            args.push(flag.into());
        }
        if let Some(suffix) = &request.backup_suffix {
            args.push("--backup=existing".into());
            args.push(format!("--suffix={suffix}").into());
        }

        let stdin = match &request.members {
            Members::All => None,
            Members::Single(path) => {
                args.push(member_name(path).into());
                None
            }
            Members::List(paths) => {
                args.push("--null".into());
                args.push("--files-from=-".into());
                let mut list = Vec::new();
                for path in paths {
                    list.extend_from_slice(&path_to_bytes(member_name(path)));
                    list.push(0);
                }
                Some(list)
            }
        };
        (args, stdin)
    }

    fn run(&self, args: Vec<OsString>, stdin: Option<Vec<u8>>) -> Result<()> {
        debug!("Running {} {:?}", self.tar_path.display(), args);

        let mut child = Command::new(&self.tar_path)
            .args(&args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        // The tool may exit without reading its input; stderr is still collected.
        let writer = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => Some(thread::spawn(move || pipe.write_all(&input))),
            _ => None,
        };

        let output = child.wait_with_output()?;
        let written = writer.map(|handle| {
            handle
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")))
        });

        if !output.status.success() {
            return Err(EngineError::ArchiveToolFailure {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        match written {
            Some(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {
                warn!("{} exited before reading its member list", self.tar_path.display());
                Ok(())
            }
            Some(Err(e)) => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl Archiver for TarArchiver {
    fn create(&self, request: &CreateRequest) -> Result<()> {
        self.run(self.create_args(request), None)
    }

    fn extract(&self, request: &ExtractRequest) -> Result<()> {
        let (args, stdin) = self.extract_args(request);
        self.run(args, stdin)
    }
}
