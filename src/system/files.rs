//! File installation and the backup log
//!
//! The backup log is a plain text file. The first two lines hold the version
//! and description of the installed driver; each following line is one
//! tab-separated record:
//!
//! ```text
//! I   <path>                     installed by us
//! B   <n>   <mode>   <path>      existing file saved as <backup dir>/<n>
//! L   <target>   <path>          existing symlink
//! ```
//!
//! Uninstalling removes the installed paths and puts the saved ones back.

use anyhow::{Context, Result, bail};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::package::Package;
use crate::process::HostCommand;
use crate::services::{BackupLog, CommandEngine, CommandList, InstallCommand};

const LOG_NAME: &str = "log";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Record {
    Installed(PathBuf),
    Backup { index: usize, mode: u32, path: PathBuf },
    Link { target: PathBuf, path: PathBuf },
}

impl Record {
    fn to_line(&self) -> String {
        match self {
            Self::Installed(path) => format!("I\t{}", path.display()),
            Self::Backup { index, mode, path } => {
                format!("B\t{}\t{:o}\t{}", index, mode, path.display())
            }
            Self::Link { target, path } => {
                format!("L\t{}\t{}", target.display(), path.display())
            }
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split('\t');
        match fields.next()? {
            "I" => Some(Self::Installed(fields.next()?.into())),
            "B" => Some(Self::Backup {
                index: fields.next()?.parse().ok()?,
                mode: u32::from_str_radix(fields.next()?, 8).ok()?,
                path: fields.next()?.into(),
            }),
            "L" => Some(Self::Link {
                target: fields.next()?.into(),
                path: fields.next()?.into(),
            }),
            _ => None,
        }
    }
}

/// Backup log and saved files kept in one directory
#[derive(Debug)]
pub struct BackupDir {
    dir: PathBuf,
    active: bool,
    next_index: usize,
}

impl BackupDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            active: false,
            next_index: 0,
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_NAME)
    }

    fn append(&mut self, record: Record) -> Result<()> {
        let mut log = OpenOptions::new()
            .append(true)
            .open(self.log_path())
            .context("opening the backup log")?;
        writeln!(log, "{}", record.to_line()).context("writing the backup log")?;
        Ok(())
    }
}

impl BackupLog for BackupDir {
    fn init(&mut self, pkg: &Package) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        fs::write(
            self.log_path(),
            format!("{}\n{}\n", pkg.version, pkg.description),
        )
        .context("creating the backup log")?;
        self.active = true;
        self.next_index = 0;
        debug!("Backup log initialized at {}", self.log_path().display());
        Ok(())
    }

    fn preserve(&mut self, path: &Path) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        let meta = fs::symlink_metadata(path)?;
        let record = if meta.file_type().is_symlink() {
            Record::Link {
                target: fs::read_link(path)?,
                path: path.to_path_buf(),
            }
        } else {
            let index = self.next_index;
            self.next_index += 1;
            fs::copy(path, self.dir.join(index.to_string()))
                .with_context(|| format!("backing up {}", path.display()))?;
            Record::Backup {
                index,
                mode: meta.permissions().mode() & 0o7777,
                path: path.to_path_buf(),
            }
        };
        self.append(record)
    }

    fn record_installed(&mut self, path: &Path) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.append(Record::Installed(path.to_path_buf()))
    }
}

/// Installs files by copying them and replays the backup log to uninstall
#[derive(Debug)]
pub struct FileCommandEngine {
    backup_dir: PathBuf,
}

impl FileCommandEngine {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    /// Move whatever is at `dst` out of the way, saving it first
    fn clear(dst: &Path, backup: &mut dyn BackupLog) -> Result<()> {
        if fs::symlink_metadata(dst).is_err() {
            return Ok(());
        }
        backup.preserve(dst)?;
        fs::remove_file(dst).with_context(|| format!("removing {}", dst.display()))
    }

    fn make_parent(dst: &Path) -> Result<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        Ok(())
    }
}

impl CommandEngine for FileCommandEngine {
    fn uninstall_existing(&mut self) -> Result<()> {
        let log_path = self.backup_dir.join(LOG_NAME);
        let text = match fs::read_to_string(&log_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No backup log; nothing to uninstall");
                return Ok(());
            }
            Err(e) => return Err(e).context("reading the backup log"),
        };

        let mut lines = text.lines();
        let version = lines.next().unwrap_or_default().to_string();
        let _description = lines.next();
        let records: Vec<Record> = lines
            .filter(|line| !line.is_empty())
            .map(|line| Record::parse(line).with_context(|| format!("corrupt backup log line '{}'", line)))
            .collect::<Result<_>>()?;

        let mut failures = 0;
        for record in records.iter().rev() {
            if let Record::Installed(path) = record {
                if let Err(e) = fs::remove_file(path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("Unable to remove {}: {}", path.display(), e);
                        failures += 1;
                    }
                }
            }
        }

        for record in &records {
            let restored = match record {
                Record::Installed(_) => continue,
                Record::Backup { index, mode, path } => {
                    let saved = self.backup_dir.join(index.to_string());
                    Self::make_parent(path)
                        .and_then(|_| fs::copy(&saved, path).map_err(Into::into))
                        .and_then(|_| {
                            fs::set_permissions(path, fs::Permissions::from_mode(*mode))
                                .map_err(Into::into)
                        })
                        .map(|_| {
                            let _ = fs::remove_file(&saved);
                        })
                }
                Record::Link { target, path } => {
                    Self::make_parent(path).and_then(|_| symlink(target, path).map_err(Into::into))
                }
            };
            if let Err(e) = restored {
                warn!("Unable to restore a backed up file: {:#}", e);
                failures += 1;
            }
        }

        if failures > 0 {
            bail!(
                "{} file(s) of the previous driver (version {}) could not be removed or restored",
                failures,
                version
            );
        }
        fs::remove_file(&log_path).context("removing the backup log")?;
        info!("Uninstalled the previous driver (version {})", version);
        Ok(())
    }

    fn execute(&mut self, commands: &CommandList, backup: &mut dyn BackupLog) -> Result<()> {
        for command in commands.commands() {
            debug!("{}", command);
            match command {
                InstallCommand::InstallFile { src, dst, mode } => {
                    Self::clear(dst, backup)?;
                    Self::make_parent(dst)?;
                    fs::copy(src, dst).with_context(|| {
                        format!("installing '{}' as '{}'", src.display(), dst.display())
                    })?;
                    fs::set_permissions(dst, fs::Permissions::from_mode(*mode))?;
                    backup.record_installed(dst)?;
                }
                InstallCommand::Symlink {
                    dst,
                    target,
                    keep_existing,
                } => {
                    if *keep_existing && fs::symlink_metadata(dst).is_ok() {
                        debug!("Keeping existing {}", dst.display());
                        continue;
                    }
                    Self::clear(dst, backup)?;
                    Self::make_parent(dst)?;
                    symlink(target, dst).with_context(|| {
                        format!("creating symbolic link '{}' to '{}'", dst.display(), target)
                    })?;
                    backup.record_installed(dst)?;
                }
                InstallCommand::Run { argv } => {
                    let Some((program, args)) = argv.split_first() else {
                        continue;
                    };
                    HostCommand::new(program)
                        .args(args)
                        .run_checked(&format!("`{}`", argv.join(" ")))?;
                }
            }
        }
        Ok(())
    }
}
