//! Installation destinations
//!
//! Maps every package entry to the absolute path it is installed at. The
//! directory comes from the prefix matching the entry's type plus the entry's
//! manifest path; the file keeps its own name.

use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::{InstallerError, Result};
use crate::options::Prefixes;
use crate::package::{
    Arch, ArchLibType, EntryKind, Package, PlacedType, PlainType, SymlinkType,
};

/// Compute `dst` for every entry that does not have one yet.
pub fn set_destinations(pkg: &mut Package, prefixes: &Prefixes) -> Result<()> {
    let source_dir = module_source_dir(pkg, prefixes);

    for entry in pkg.entries_mut() {
        if entry.dst().is_some() {
            continue;
        }
        let dir = match entry.kind() {
            EntryKind::Plain(PlainType::KernelModuleSrc) => source_dir.clone(),
            EntryKind::KernelModule => {
                return Err(InstallerError::kernel_module(format!(
                    "no installation path for kernel module '{}'",
                    entry.file()
                )));
            }
            kind => match destination_dir(kind, prefixes)? {
                Some(dir) => dir,
                None => continue,
            },
        };

        let dst = dir.join(entry.name());
        if !dst.is_absolute() {
            return Err(InstallerError::invalid_path(format!(
                "destination '{}' of '{}' is not absolute",
                dst.display(),
                entry.file()
            )));
        }
        debug!("{} -> {}", entry.file(), dst.display());
        entry.set_dst(dst);
    }

    Ok(())
}

/// Where kernel module sources go, `<prefix>/<module>-<version>`
pub fn module_source_dir(pkg: &Package, prefixes: &Prefixes) -> PathBuf {
    prefixes
        .module_source
        .join(format!("{}-{}", pkg.kernel_module_name, pkg.version))
}

/// Directory an entry of `kind` is installed into, `None` for entries that are
/// not installed. Kernel module sources depend on the package and are handled
/// by [`set_destinations`].
pub fn destination_dir(kind: &EntryKind, prefixes: &Prefixes) -> Result<Option<PathBuf>> {
    let dir = match kind {
        EntryKind::Plain(ty) => match ty {
            PlainType::KernelModuleSrc | PlainType::KernelModuleCmd => return Ok(None),
            PlainType::InstallerBinary => prefixes.installer_prefix().join("bin"),
            PlainType::UtilityBinary => prefixes.utility.join("bin"),
            PlainType::DotDesktop => prefixes.utility.join("share/applications"),
        },
        EntryKind::KernelModule => return Ok(None),
        EntryKind::Placed { ty, path } => match ty {
            PlacedType::ExplicitPath | PlacedType::CudaIcd => {
                let dir = Path::new(path);
                if !dir.is_absolute() {
                    return Err(InstallerError::invalid_path(format!(
                        "explicit path '{}' is not absolute",
                        path
                    )));
                }
                dir.to_path_buf()
            }
            PlacedType::OpenglHeader => under(&prefixes.opengl, path)?,
            PlacedType::XlibStaticLib
            | PlacedType::XlibSharedLib
            | PlacedType::XmoduleSharedLib
            | PlacedType::GlxModuleSharedLib => under(&prefixes.x, path)?,
            PlacedType::UtilityLib => under(&prefixes.utility, path)?,
            PlacedType::Documentation | PlacedType::Manpage => {
                under(&prefixes.documentation, path)?
            }
        },
        EntryKind::ArchLib { arch, path, .. }
        | EntryKind::TlsLib { arch, path, .. }
        | EntryKind::ArchSymlink { arch, path, .. }
        | EntryKind::TlsSymlink { arch, path, .. } => library_dir(*arch, path, prefixes)?,
        EntryKind::Symlink { ty, path, .. } => match ty {
            SymlinkType::UtilityLibSymlink => under(&prefixes.utility, path)?,
            SymlinkType::XlibSymlink
            | SymlinkType::XmoduleSymlink
            | SymlinkType::GlxModuleSymlink
            | SymlinkType::XmoduleNewsym => under(&prefixes.x, path)?,
        },
        EntryKind::BinSymlink { .. } => prefixes.utility.join("bin"),
    };

    Ok(Some(dir))
}

/// Directory of an architecture-specific library with manifest path `path`.
///
/// Native libraries go under the OpenGL prefix. 32-bit compatibility libraries
/// go under `<compat32 prefix>/<compat32 libdir>`, with a leading `lib`
/// component of `path` replaced by the libdir.
pub fn library_dir(arch: Arch, path: &str, prefixes: &Prefixes) -> Result<PathBuf> {
    match arch {
        Arch::Native => under(&prefixes.opengl, path),
        Arch::Compat32 => {
            let libdir = prefixes.compat32.join(&prefixes.compat32_libdir);
            let path = Path::new(path);
            let rest = path.strip_prefix("lib").unwrap_or(path);
            under(&libdir, &rest.to_string_lossy())
        }
    }
}

/// Where `libGL.so` of the given architecture ends up, for `libGL.la`
pub fn libgl_dir(pkg: &Package, arch: Arch, prefixes: &Prefixes) -> Result<PathBuf> {
    let path = pkg
        .entries()
        .iter()
        .find_map(|e| match e.kind() {
            EntryKind::ArchLib {
                ty: ArchLibType::OpenglLib,
                arch: a,
                path,
            } if *a == arch => Some(path.as_str()),
            _ => None,
        })
        .unwrap_or("lib");
    library_dir(arch, path, prefixes)
}

fn under(prefix: &Path, path: &str) -> Result<PathBuf> {
    let rel = Path::new(path);
    if rel
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::ParentDir | Component::Prefix(_)))
    {
        return Err(InstallerError::invalid_path(format!(
            "manifest path '{}' must be relative to its prefix",
            path
        )));
    }
    Ok(prefix.join(rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{ArchSymlinkType, TlsClass};

    fn package() -> Package {
        let mut pkg = Package::new("/nonexistent");
        pkg.kernel_module_name = "nvidia".into();
        pkg.version = "1.0-1".into();
        pkg
    }

    fn dst_of(kind: EntryKind, file: &str) -> Result<Option<PathBuf>> {
        let mut pkg = package();
        pkg.add_entry(file, kind, 0o644, None);
        set_destinations(&mut pkg, &Prefixes::default())?;
        Ok(pkg.entries()[0].dst().map(Path::to_path_buf))
    }

    #[test]
    fn test_native_and_compat32_libraries() {
        let native = dst_of(
            EntryKind::ArchLib {
                ty: ArchLibType::OpenglLib,
                arch: Arch::Native,
                path: "lib".into(),
            },
            "usr/lib/libGL.so.1.0",
        )
        .unwrap();
        assert_eq!(native, Some(PathBuf::from("/usr/lib/libGL.so.1.0")));

        let compat = dst_of(
            EntryKind::TlsSymlink {
                arch: Arch::Compat32,
                class: TlsClass::New,
                path: "lib/tls".into(),
                target: "libnvidia-tls.so.1.0".into(),
            },
            "usr/lib32/tls/libnvidia-tls.so.1",
        )
        .unwrap();
        assert_eq!(
            compat,
            Some(PathBuf::from("/usr/lib32/tls/libnvidia-tls.so.1"))
        );
    }

    #[test]
    fn test_fixed_directories() {
        assert_eq!(
            dst_of(EntryKind::Plain(PlainType::UtilityBinary), "bin/nvidia-smi").unwrap(),
            Some(PathBuf::from("/usr/bin/nvidia-smi"))
        );
        assert_eq!(
            dst_of(EntryKind::Plain(PlainType::DotDesktop), "nvidia-settings.desktop").unwrap(),
            Some(PathBuf::from("/usr/share/applications/nvidia-settings.desktop"))
        );
        assert_eq!(
            dst_of(EntryKind::Plain(PlainType::KernelModuleSrc), "usr/src/nv/nv.c").unwrap(),
            Some(PathBuf::from("/usr/src/nvidia-1.0-1/nv.c"))
        );
        assert_eq!(
            dst_of(EntryKind::Plain(PlainType::KernelModuleCmd), "usr/src/nv/conftest.sh")
                .unwrap(),
            None
        );
        assert_eq!(
            dst_of(
                EntryKind::BinSymlink {
                    target: "nvidia-installer".into()
                },
                "nvidia-uninstall"
            )
            .unwrap(),
            Some(PathBuf::from("/usr/bin/nvidia-uninstall"))
        );
    }

    #[test]
    fn test_explicit_path_must_be_absolute() {
        let ok = dst_of(
            EntryKind::Placed {
                ty: PlacedType::CudaIcd,
                path: "/etc/OpenCL/vendors".into(),
            },
            "nvidia.icd",
        )
        .unwrap();
        assert_eq!(ok, Some(PathBuf::from("/etc/OpenCL/vendors/nvidia.icd")));

        let err = dst_of(
            EntryKind::Placed {
                ty: PlacedType::ExplicitPath,
                path: "etc/foo".into(),
            },
            "foo.conf",
        )
        .unwrap_err();
        assert!(matches!(err, InstallerError::InvalidPath(_)));
    }

    #[test]
    fn test_escaping_path_rejected() {
        let err = dst_of(
            EntryKind::Placed {
                ty: PlacedType::Documentation,
                path: "../../etc".into(),
            },
            "README",
        )
        .unwrap_err();
        assert!(matches!(err, InstallerError::InvalidPath(_)));
    }

    #[test]
    fn test_existing_destination_kept() {
        let mut pkg = package();
        pkg.add_entry(
            "usr/src/nv/nvidia.ko",
            EntryKind::KernelModule,
            0o644,
            Some(PathBuf::from("/lib/modules/6.1/video/nvidia.ko")),
        );
        set_destinations(&mut pkg, &Prefixes::default()).unwrap();
        assert_eq!(
            pkg.entries()[0].dst(),
            Some(Path::new("/lib/modules/6.1/video/nvidia.ko"))
        );
    }

    #[test]
    fn test_libgl_dir_follows_opengl_lib_path() {
        let mut pkg = package();
        pkg.add_entry(
            "libGL.so.1",
            EntryKind::ArchSymlink {
                ty: ArchSymlinkType::OpenglSymlink,
                arch: Arch::Native,
                path: "lib64".into(),
                target: "libGL.so.1.0".into(),
            },
            0o644,
            None,
        );
        pkg.add_entry(
            "libGL.so.1.0",
            EntryKind::ArchLib {
                ty: ArchLibType::OpenglLib,
                arch: Arch::Native,
                path: "lib64".into(),
            },
            0o755,
            None,
        );
        let prefixes = Prefixes::default();
        assert_eq!(
            libgl_dir(&pkg, Arch::Native, &prefixes).unwrap(),
            PathBuf::from("/usr/lib64")
        );
        assert_eq!(
            libgl_dir(&pkg, Arch::Compat32, &prefixes).unwrap(),
            PathBuf::from("/usr/lib32")
        );
    }
}
