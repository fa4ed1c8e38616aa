//! Entry selection
//!
//! Filters a parsed package down to the entries this installation will
//! actually install, and rewrites the few files that embed installation paths.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::destinations;
use crate::error::Result;
use crate::options::{Options, Prefixes};
use crate::package::{Arch, EntryKind, Package, PackageEntry, PlainType, TlsClass};
use crate::services::{SystemProbe, Ui};

/// Keep only kernel module sources, build commands and the built module.
pub fn keep_kernel_module_files(pkg: &mut Package) -> usize {
    let removed = pkg.retain_entries(|e| e.kind().is_kernel_module_file());
    debug!("Kernel module only: dropped {} entries", removed);
    removed
}

pub fn remove_opengl_files(pkg: &mut Package) -> usize {
    pkg.retain_entries(|e| !e.kind().is_opengl_file())
}

pub fn remove_kernel_module_sources(pkg: &mut Package) -> usize {
    pkg.retain_entries(|e| !matches!(e.kind(), EntryKind::Plain(PlainType::KernelModuleSrc)))
}

/// Decide whether OpenGL headers are installed, dropping them if not.
///
/// Expert mode asks, using the configured choice as the default answer.
pub fn select_opengl_headers(pkg: &mut Package, options: &Options, ui: &mut dyn Ui) -> bool {
    if !pkg.any_entry(|e| e.kind().is_opengl_header()) {
        return false;
    }

    let install = if options.expert {
        let answer = ui.yes_no(options.opengl_headers, "Install NVIDIA's OpenGL header files?");
        ui.log(&format!(
            "Installation {} install the OpenGL header files.",
            if answer { "will" } else { "will not" }
        ));
        answer
    } else {
        options.opengl_headers
    };

    if !install {
        pkg.retain_entries(|e| !e.kind().is_opengl_header());
    }
    install
}

/// Keep the TLS libraries matching what the host's C library supports,
/// separately for each architecture.
pub fn select_tls_class(pkg: &mut Package, probe: &dyn SystemProbe) {
    for arch in [Arch::Native, Arch::Compat32] {
        let present =
            pkg.any_entry(|e| e.kind().arch() == Some(arch) && e.kind().tls_class().is_some());
        if !present {
            continue;
        }

        let class = if probe.supports_new_tls(arch) {
            TlsClass::New
        } else {
            TlsClass::Classic
        };
        info!("Using {} TLS libraries for {} architecture", class, arch);

        pkg.retain_entries(|e| {
            e.kind().arch() != Some(arch) || e.kind().tls_class().is_none_or(|c| c == class)
        });
    }
}

/// Offer the 32-bit compatibility libraries when the host can use them.
/// Returns whether any are kept.
pub fn select_compat32_files(pkg: &mut Package, probe: &dyn SystemProbe, ui: &mut dyn Ui) -> bool {
    if !pkg.any_entry(|e| e.kind().is_compat32()) {
        return false;
    }

    let keep = probe.supports_compat32()
        && ui.yes_no(true, "Install NVIDIA's 32-bit compatibility OpenGL libraries?");
    if !keep {
        let removed = pkg.retain_entries(|e| !e.kind().is_compat32());
        debug!("Dropped {} 32-bit compatibility entries", removed);
    }
    keep
}

/// Values substituted into generated files
#[derive(Debug, Clone)]
struct Substitutions {
    generated_by: String,
    utils_path: PathBuf,
    docs_path: PathBuf,
    pixmap_path: PathBuf,
}

impl Substitutions {
    fn new(pkg: &Package, prefixes: &Prefixes) -> Self {
        Self {
            generated_by: format!(
                "{} {}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
            utils_path: prefixes.utility.join("bin"),
            docs_path: prefixes
                .documentation
                .join("share/doc")
                .join(format!("{}-{}", pkg.kernel_module_name, pkg.version)),
            pixmap_path: prefixes.utility.join("share/pixmaps"),
        }
    }
}

/// Rewrite the placeholders in libGL.la and .desktop files.
///
/// Each processed entry is replaced by one pointing at a rewritten copy under
/// `scratch`, appended after the remaining entries. Returns how many entries
/// were rewritten.
pub fn substitute_placeholders(
    pkg: &mut Package,
    prefixes: &Prefixes,
    scratch: &Path,
) -> Result<usize> {
    let subs = Substitutions::new(pkg, prefixes);

    let targets: Vec<PackageEntry> = pkg
        .entries()
        .iter()
        .filter(|e| e.kind().is_libgl_la() || e.kind().is_dot_desktop())
        .cloned()
        .collect();
    if targets.is_empty() {
        return Ok(0);
    }

    let mut rewritten = Vec::with_capacity(targets.len());
    for (idx, entry) in targets.iter().enumerate() {
        let src = pkg.source_dir().join(entry.file());
        let text = fs::read_to_string(&src)?;

        let text = match entry.kind().arch() {
            Some(arch) if entry.kind().is_libgl_la() => {
                let libgl = destinations::libgl_dir(pkg, arch, prefixes)?;
                text.replace("__LIBGL_PATH__", &libgl.to_string_lossy())
                    .replace("__GENERATED_BY__", &subs.generated_by)
            }
            _ => text
                .replace("__UTILS_PATH__", &subs.utils_path.to_string_lossy())
                .replace("__DOCS_PATH__", &subs.docs_path.to_string_lossy())
                .replace("__PIXMAP_PATH__", &subs.pixmap_path.to_string_lossy()),
        };

        let dir = scratch.join(idx.to_string());
        fs::create_dir_all(&dir)?;
        let out = dir.join(entry.name());
        fs::write(&out, text)?;
        debug!("Rewrote {} to {}", entry.file(), out.display());

        rewritten.push((out, entry.kind().clone(), entry.mode()));
    }

    pkg.retain_entries(|e| !(e.kind().is_libgl_la() || e.kind().is_dot_desktop()));
    let count = rewritten.len();
    for (out, kind, mode) in rewritten {
        pkg.add_entry(out.to_string_lossy().into_owned(), kind, mode, None);
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{ArchLibType, PlacedType};

    fn tls(arch: Arch, class: TlsClass) -> EntryKind {
        EntryKind::TlsLib {
            arch,
            class,
            path: "lib/tls".into(),
        }
    }

    #[test]
    fn test_keep_kernel_module_files() {
        let mut pkg = Package::new("/nonexistent");
        pkg.add_entry("nv.c", EntryKind::Plain(PlainType::KernelModuleSrc), 0o644, None);
        pkg.add_entry("nvidia-smi", EntryKind::Plain(PlainType::UtilityBinary), 0o755, None);
        pkg.add_entry("conftest.sh", EntryKind::Plain(PlainType::KernelModuleCmd), 0o755, None);

        assert_eq!(keep_kernel_module_files(&mut pkg), 1);
        let files: Vec<&str> = pkg.entries().iter().map(|e| e.file()).collect();
        assert_eq!(files, ["nv.c", "conftest.sh"]);
    }

    #[test]
    fn test_remove_opengl_files() {
        let mut pkg = Package::new("/nonexistent");
        pkg.add_entry("libGL.so", tls(Arch::Native, TlsClass::New), 0o755, None);
        pkg.add_entry(
            "gl.h",
            EntryKind::Placed {
                ty: PlacedType::OpenglHeader,
                path: "include/GL".into(),
            },
            0o644,
            None,
        );
        pkg.add_entry(
            "libcuda.so",
            EntryKind::ArchLib {
                ty: ArchLibType::CudaLib,
                arch: Arch::Native,
                path: "lib".into(),
            },
            0o755,
            None,
        );

        assert_eq!(remove_opengl_files(&mut pkg), 2);
        assert_eq!(pkg.entries()[0].file(), "libcuda.so");
    }

    #[test]
    fn test_substitution_rewrites_and_appends() {
        let pkg_dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        fs::write(
            pkg_dir.path().join("libGL.la"),
            "# __GENERATED_BY__\nlibdir='__LIBGL_PATH__'\n",
        )
        .unwrap();
        fs::write(
            pkg_dir.path().join("nvidia-settings.desktop"),
            "Exec=__UTILS_PATH__/nvidia-settings\nIcon=__PIXMAP_PATH__/nvidia-settings.png\n",
        )
        .unwrap();

        let mut pkg = Package::new(pkg_dir.path());
        pkg.kernel_module_name = "nvidia".into();
        pkg.version = "1.0".into();
        pkg.add_entry(
            "libGL.la",
            EntryKind::ArchLib {
                ty: ArchLibType::LibglLa,
                arch: Arch::Native,
                path: "lib".into(),
            },
            0o644,
            None,
        );
        pkg.add_entry("nvidia-smi", EntryKind::Plain(PlainType::UtilityBinary), 0o755, None);
        pkg.add_entry("nvidia-settings.desktop", EntryKind::Plain(PlainType::DotDesktop), 0o644, None);

        let count = substitute_placeholders(&mut pkg, &Prefixes::default(), scratch.path()).unwrap();
        assert_eq!(count, 2);

        let entries = pkg.entries();
        assert_eq!(entries[0].file(), "nvidia-smi");
        assert_eq!(entries[1].name(), "libGL.la");
        assert_eq!(entries[2].name(), "nvidia-settings.desktop");
        assert!(entries[1].kind().is_libgl_la());
        assert!(entries[1].source_id().is_some());

        let la = fs::read_to_string(scratch.path().join("0/libGL.la")).unwrap();
        assert!(la.contains("libdir='/usr/lib'"));
        assert!(!la.contains("__GENERATED_BY__"));
        let desktop = fs::read_to_string(scratch.path().join("1/nvidia-settings.desktop")).unwrap();
        assert!(desktop.contains("Exec=/usr/bin/nvidia-settings"));
        assert!(desktop.contains("Icon=/usr/share/pixmaps/nvidia-settings.png"));
    }
}
