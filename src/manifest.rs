//! Package manifest parser
//!
//! A manifest is a line-oriented text file named `.manifest` at the root of an
//! extracted driver package:
//!
//! ```text
//! NVIDIA Accelerated Graphics Driver for Linux-x86_64   description
//! 1.0-1                                                 version
//! nv-linux.o                                            kernel interface filename
//! nvidia                                                kernel module name
//! nvnet nvaudio                                         bad module names (0 or more)
//! nvnet.o nvaudio.o                                     bad module filenames (0 or more)
//! usr/src/nv/                                           module build directory
//! usr/src/nv/precompiled/                               precompiled interface directory
//! <file> <octal mode> <TYPE> [ARCH] [CLASS] [path] [target]
//! ...
//! ```
//!
//! Entries run until end of input or the first empty line. Which optional
//! fields an entry line carries depends on its type token, see
//! [`TypeTag`](crate::package::TypeTag).

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use memmap2::Mmap;

use crate::package::{EntryKind, Package, TypeTag};

/// Name of the manifest file inside a package directory
pub const MANIFEST_FILE: &str = ".manifest";

/// Number of fixed header lines before the first entry
const HEADER_LINES: usize = 8;

/// Errors produced while loading a manifest
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// No `.manifest` in the package directory
    #[error("no package .manifest file found")]
    NotFound,

    /// The manifest exists but could not be opened or mapped
    #[error("unable to open .manifest file: {reason}")]
    OpenFailed { reason: String },

    /// Syntax error on a 1-based line
    #[error("invalid .manifest file; error on line {line}")]
    Invalid { line: usize },
}

impl ManifestError {
    fn open_failed(err: &io::Error) -> Self {
        Self::OpenFailed {
            reason: err.to_string(),
        }
    }
}

/// Read-only mapping of a manifest file, unmapped on drop
pub struct ManifestMap {
    // Zero-length files cannot be mapped
    map: Option<Mmap>,
    _file: File,
}

impl ManifestMap {
    pub fn open(path: &Path) -> Result<Self, ManifestError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ManifestError::NotFound,
            _ => ManifestError::open_failed(&e),
        })?;

        let len = file
            .metadata()
            .map_err(|e| ManifestError::open_failed(&e))?
            .len();

        let map = if len == 0 {
            None
        } else {
            // SAFETY: the mapping is read-only and lives no longer than `file`.
            // The package directory belongs to the installer for the run.
            let map = unsafe { Mmap::map(&file) }.map_err(|e| ManifestError::open_failed(&e))?;
            Some(map)
        };

        Ok(Self { map, _file: file })
    }

    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

/// Load `dir/.manifest` into a [`Package`] whose entries are relative to `dir`.
pub fn load(dir: &Path) -> Result<Package, ManifestError> {
    let path = dir.join(MANIFEST_FILE);
    debug!("Mapping manifest {}", path.display());

    let map = ManifestMap::open(&path)?;
    parse(map.bytes(), dir)
}

/// Parse a manifest buffer. Entry files are resolved against `source_dir` when
/// capturing their inode and device.
pub fn parse(buffer: &[u8], source_dir: impl Into<PathBuf>) -> Result<Package, ManifestError> {
    let mut lines = buffer
        .split(|&b| b == b'\n')
        .map(|raw| raw.strip_suffix(b"\r").unwrap_or(raw))
        .enumerate()
        .map(|(idx, raw)| (idx + 1, raw));

    let mut header: [&str; HEADER_LINES] = [""; HEADER_LINES];
    for (slot, expected) in header.iter_mut().zip(1..) {
        let text = match lines.next() {
            Some((number, raw)) => decode(raw, number)?,
            None => return Err(ManifestError::Invalid { line: expected }),
        };
        if text.is_empty() {
            return Err(ManifestError::Invalid { line: expected });
        }
        *slot = text;
    }

    let mut pkg = Package::new(source_dir);
    pkg.description = header[0].to_string();
    pkg.version = header[1].to_string();
    pkg.kernel_interface_filename = header[2].to_string();
    pkg.kernel_module_name = header[3].to_string();
    pkg.bad_modules = words(header[4]);
    pkg.bad_module_filenames = words(header[5]);
    pkg.kernel_module_build_directory = strip_trailing_slashes(header[6]).to_string();
    pkg.precompiled_kernel_interface_directory = strip_trailing_slashes(header[7]).to_string();

    for (number, raw) in lines {
        if raw.is_empty() {
            break;
        }
        let text = decode(raw, number)?;
        let (file, mode, kind) = parse_entry(text).ok_or(ManifestError::Invalid { line: number })?;
        pkg.add_entry(file, kind, mode, None);
    }

    debug!(
        "Parsed manifest for '{}' ({}): {} entries",
        pkg.description,
        pkg.version,
        pkg.num_entries()
    );

    Ok(pkg)
}

fn decode(raw: &[u8], line: usize) -> Result<&str, ManifestError> {
    std::str::from_utf8(raw).map_err(|_| ManifestError::Invalid { line })
}

fn words(line: &str) -> Vec<String> {
    line.split_ascii_whitespace().map(str::to_string).collect()
}

fn strip_trailing_slashes(s: &str) -> &str {
    s.trim_end_matches('/')
}

/// Permission bits: one to four octal digits
pub fn parse_mode(token: &str) -> Option<u32> {
    if token.is_empty() || token.len() > 4 || !token.bytes().all(|b| matches!(b, b'0'..=b'7')) {
        return None;
    }
    u32::from_str_radix(token, 8).ok()
}

fn parse_entry(line: &str) -> Option<(&str, u32, EntryKind)> {
    let mut words = line.split_ascii_whitespace();

    let file = words.next()?;
    let mode = parse_mode(words.next()?)?;
    let token = words.next()?;
    let tag: TypeTag = match token.parse() {
        Ok(tag) => tag,
        Err(e) => {
            debug!("{}", e);
            return None;
        }
    };
    let kind = read_kind(tag, &mut words)?;

    Some((file, mode, kind))
}

/// Consume the qualifier, path and target tokens `tag` requires, in that order.
fn read_kind<'a, I>(tag: TypeTag, words: &mut I) -> Option<EntryKind>
where
    I: Iterator<Item = &'a str>,
{
    let mut next = || words.next().map(str::to_string);

    let kind = match tag {
        TypeTag::Plain(ty) => EntryKind::Plain(ty),
        TypeTag::Placed(ty) => EntryKind::Placed { ty, path: next()? },
        TypeTag::ArchLib(ty) => EntryKind::ArchLib {
            ty,
            arch: next()?.parse().ok()?,
            path: next()?,
        },
        TypeTag::TlsLib => EntryKind::TlsLib {
            arch: next()?.parse().ok()?,
            class: next()?.parse().ok()?,
            path: next()?,
        },
        TypeTag::Symlink(ty) => EntryKind::Symlink {
            ty,
            path: next()?,
            target: next()?,
        },
        TypeTag::ArchSymlink(ty) => EntryKind::ArchSymlink {
            ty,
            arch: next()?.parse().ok()?,
            path: next()?,
            target: next()?,
        },
        TypeTag::TlsSymlink => EntryKind::TlsSymlink {
            arch: next()?.parse().ok()?,
            class: next()?.parse().ok()?,
            path: next()?,
            target: next()?,
        },
        TypeTag::BinSymlink => EntryKind::BinSymlink { target: next()? },
    };

    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{Arch, ArchLibType, PlainType, TlsClass};

    const HEADER: &str = "Driver Package\n1.0-1\nnv-linux.o\nnvidia\nnvnet  nvaudio\n\t\nusr/src/nv//\nusr/src/nv/precompiled/\n";

    fn manifest(entries: &str) -> String {
        format!("{HEADER}{entries}")
    }

    #[test]
    fn test_header_fields() {
        let pkg = parse(manifest("").as_bytes(), "/nonexistent").unwrap();

        assert_eq!(pkg.description, "Driver Package");
        assert_eq!(pkg.version, "1.0-1");
        assert_eq!(pkg.kernel_interface_filename, "nv-linux.o");
        assert_eq!(pkg.kernel_module_name, "nvidia");
        assert_eq!(pkg.bad_modules, ["nvnet", "nvaudio"]);
        assert!(pkg.bad_module_filenames.is_empty());
        assert_eq!(pkg.kernel_module_build_directory, "usr/src/nv");
        assert_eq!(pkg.precompiled_kernel_interface_directory, "usr/src/nv/precompiled");
        assert_eq!(pkg.num_entries(), 0);
    }

    #[test]
    fn test_entry_fields() {
        let pkg = parse(
            manifest(
                "libGL.so.1 0755 OPENGL_LIB NATIVE lib\r\n\
                 libGL.so 0644 TLS_SYMLINK COMPAT32 NEW lib/tls libGL.so.1 extra\n\
                 nvidia-settings 755 UTILITY_BINARY\n",
            )
            .as_bytes(),
            "/nonexistent",
        )
        .unwrap();

        let entries = pkg.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0].kind(),
            &EntryKind::ArchLib {
                ty: ArchLibType::OpenglLib,
                arch: Arch::Native,
                path: "lib".into()
            }
        );
        assert_eq!(entries[0].mode(), 0o755);
        assert_eq!(
            entries[1].kind(),
            &EntryKind::TlsSymlink {
                arch: Arch::Compat32,
                class: TlsClass::New,
                path: "lib/tls".into(),
                target: "libGL.so.1".into()
            }
        );
        assert_eq!(entries[2].kind(), &EntryKind::Plain(PlainType::UtilityBinary));
        assert!(entries.iter().all(|e| e.dst().is_none()));
    }

    #[test]
    fn test_empty_line_ends_entries() {
        let pkg = parse(
            manifest("a 0644 DOCUMENTATION doc\n\nb 0644 NOT_A_TYPE\n").as_bytes(),
            "/nonexistent",
        )
        .unwrap();
        assert_eq!(pkg.num_entries(), 1);
    }

    #[test]
    fn test_truncated_header() {
        let err = parse(b"a\nb\nc\nd\ne\n", "/nonexistent").unwrap_err();
        assert_eq!(err, ManifestError::Invalid { line: 6 });

        let err = parse(b"", "/nonexistent").unwrap_err();
        assert_eq!(err, ManifestError::Invalid { line: 1 });
    }

    #[test]
    fn test_invalid_entries_report_line() {
        let cases = [
            ("x 0644 BOGUS\n", 9),
            ("x 0644 OPENGL_LIB\n", 9),
            ("x 0644 OPENGL_LIB AMD64 lib\n", 9),
            ("x 0644 TLS_LIB NATIVE MODERN lib\n", 9),
            ("x 0644 XLIB_SYMLINK lib\n", 9),
            ("x 9644 UTILITY_BINARY\n", 9),
            ("x 01777 UTILITY_BINARY\n", 9),
            ("x\n", 9),
            ("a 0644 UTILITY_BINARY\nx 0644 KERNEL_MODULE\n", 10),
        ];
        for (entries, line) in cases {
            let err = parse(manifest(entries).as_bytes(), "/nonexistent").unwrap_err();
            assert_eq!(err, ManifestError::Invalid { line }, "entries: {entries:?}");
        }
    }

    #[test]
    fn test_non_utf8_line() {
        let mut buf = manifest("").into_bytes();
        buf.extend_from_slice(b"x\xff 0644 UTILITY_BINARY\n");
        assert_eq!(
            parse(&buf, "/nonexistent").unwrap_err(),
            ManifestError::Invalid { line: 9 }
        );
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("0644"), Some(0o644));
        assert_eq!(parse_mode("7"), Some(0o7));
        assert_eq!(parse_mode("7777"), Some(0o7777));
        assert_eq!(parse_mode("08"), None);
        assert_eq!(parse_mode("+644"), None);
        assert_eq!(parse_mode(""), None);
    }

    #[test]
    fn test_load_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(dir.path()).unwrap_err(), ManifestError::NotFound);
    }

    #[test]
    fn test_load_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), b"").unwrap();
        assert_eq!(
            load(dir.path()).unwrap_err(),
            ManifestError::Invalid { line: 1 }
        );
    }

    #[test]
    fn test_load_records_file_identity() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.txt"), b"docs").unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            manifest("README.txt 0644 DOCUMENTATION share/doc\nmissing 0644 DOCUMENTATION share/doc\n"),
        )
        .unwrap();

        let pkg = load(dir.path()).unwrap();
        assert_eq!(pkg.source_dir(), dir.path());
        assert!(pkg.entries()[0].source_id().is_some());
        assert_eq!(pkg.entries()[1].source_id(), None);
    }
}
