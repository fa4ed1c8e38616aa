//! Host queries backed by `/proc`, `/sys` and `/etc`
//!
//! Every path is resolved under a root directory so the probe can be pointed
//! at a fake filesystem tree in tests.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::legacy;
use crate::options::Distro;
use crate::package::{Arch, FileId, Package};
use crate::process::HostCommand;
use crate::services::{DeviceSupport, GraphicsDevice, SystemProbe};

const NVIDIA_PCI_VENDOR: &str = "0x10de";

/// PCI base class of display controllers
const DISPLAY_CLASS_PREFIX: &str = "0x03";

/// X servers create `/tmp/.X<display>-lock`
const X_DISPLAYS: std::ops::Range<u32> = 0..8;

/// Directories searched for system utilities in addition to `$PATH`
const EXTRA_UTIL_DIRS: [&str; 5] = ["/sbin", "/usr/sbin", "/bin", "/usr/bin", "/usr/local/bin"];

/// Probes the machine we are running on
#[derive(Debug, Clone)]
pub struct HostProbe {
    root: PathBuf,
    /// Backup log of the last installation, relative to `root`
    backup_log: PathBuf,
}

impl HostProbe {
    pub fn new() -> Self {
        Self::with_root("/")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            backup_log: PathBuf::from(super::BACKUP_LOG),
        }
    }

    /// `path` resolved under the probe's root
    pub fn path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    fn pci_devices(&self) -> Result<Vec<(String, u16)>> {
        let dir = self.path("/sys/bus/pci/devices");
        let mut found = Vec::new();

        for entry in fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
            let dev = entry?.path();
            let read = |name: &str| {
                fs::read_to_string(dev.join(name))
                    .map(|s| s.trim().to_ascii_lowercase())
                    .unwrap_or_default()
            };
            if read("vendor") != NVIDIA_PCI_VENDOR || !read("class").starts_with(DISPLAY_CLASS_PREFIX)
            {
                continue;
            }
            let device = read("device");
            let Ok(id) = u16::from_str_radix(device.trim_start_matches("0x"), 16) else {
                warn!("Unparseable PCI device id '{}' in {}", device, dev.display());
                continue;
            };
            let slot = dev
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            found.push((slot, id));
        }

        found.sort();
        Ok(found)
    }

    fn lib_version(&self) -> Option<(u32, u32)> {
        let output = HostCommand::new("getconf").arg("GNU_LIBC_VERSION").run().ok()?;
        if !output.success {
            return None;
        }
        parse_glibc_version(&output.stdout)
    }

    fn ldconfig_cache(&self) -> Result<HashMap<String, Vec<(bool, PathBuf)>>> {
        let ldconfig = self
            .find_system_util("ldconfig")
            .context("ldconfig not found")?;
        let output = HostCommand::new(ldconfig)
            .arg("-p")
            .run_checked("ldconfig -p")?;
        Ok(parse_ldconfig_cache(&output.stdout))
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for HostProbe {
    fn running_kernel(&self) -> Result<String> {
        let uts = nix::sys::utsname::uname().context("uname failed")?;
        Ok(uts.release().to_string_lossy().into_owned())
    }

    fn graphics_devices(&self) -> Result<Vec<GraphicsDevice>> {
        let devices = self
            .pci_devices()?
            .into_iter()
            .map(|(slot, id)| {
                let support = match legacy::legacy_branch(id) {
                    Some(series) => DeviceSupport::Legacy(series.to_string()),
                    None => DeviceSupport::Supported,
                };
                let name = legacy::legacy_name(id)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("NVIDIA GPU at {}", slot));
                GraphicsDevice {
                    name,
                    pci_id: format!("10de:{:04x}", id),
                    support,
                }
            })
            .collect::<Vec<_>>();
        debug!("Found {} NVIDIA display device(s)", devices.len());
        Ok(devices)
    }

    fn display_lock_file(&self) -> Option<PathBuf> {
        X_DISPLAYS
            .map(|display| PathBuf::from(format!("/tmp/.X{}-lock", display)))
            .find(|lock| self.path(lock).exists())
    }

    fn is_module_loaded(&self, module: &str) -> Result<bool> {
        let modules = fs::read_to_string(self.path("/proc/modules"))
            .context("unable to read /proc/modules")?;
        Ok(modules
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .any(|name| name == module))
    }

    fn installed_driver_version(&self) -> Option<String> {
        let log = fs::read_to_string(self.path(&self.backup_log)).ok()?;
        let version = log.lines().next()?.trim();
        (!version.is_empty()).then(|| version.to_string())
    }

    fn supports_new_tls(&self, _arch: Arch) -> bool {
        // Both architectures share the C library release
        match self.lib_version() {
            Some(version) => version >= (2, 3),
            None => {
                warn!("Unable to determine the C library version; assuming classic TLS");
                false
            }
        }
    }

    fn supports_compat32(&self) -> bool {
        cfg!(target_arch = "x86_64") && self.path("/lib/ld-linux.so.2").exists()
    }

    fn find_system_util(&self, name: &str) -> Option<PathBuf> {
        let path_var = std::env::var_os("PATH").unwrap_or_default();
        std::env::split_paths(&path_var)
            .chain(EXTRA_UTIL_DIRS.iter().map(PathBuf::from))
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(&self.path(candidate)))
            .map(|candidate| self.path(candidate))
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.path(path).is_dir()
    }

    fn distro(&self) -> Distro {
        let distro = if self.path("/etc/SuSE-release").exists() {
            Distro::Suse
        } else if self.path("/etc/UnitedLinux-release").exists() {
            Distro::UnitedLinux
        } else if self.path("/etc/debian_version").exists() {
            Distro::Debian
        } else {
            Distro::Other
        };
        debug!("Detected distribution: {}", distro);
        distro
    }

    fn check_sysvipc(&self) -> Result<()> {
        use nix::libc;

        // SAFETY: the segment is private to this call and is detached and
        // removed before returning.
        unsafe {
            let size = libc::sysconf(libc::_SC_PAGESIZE).max(4096) as usize;
            let shmid = libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600);
            if shmid == -1 {
                bail!(
                    "Shared memory test failed ({}): please check that your kernel has \
                     CONFIG_SYSVIPC enabled.",
                    std::io::Error::last_os_error()
                );
            }
            let address = libc::shmat(shmid, std::ptr::null(), 0);
            let attach_error = std::io::Error::last_os_error();
            libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut());
            if address as isize == -1 {
                bail!(
                    "Shared memory test failed ({}): please check that your kernel has \
                     CONFIG_SYSVIPC enabled.",
                    attach_error
                );
            }
            libc::shmdt(address);
        }

        info!("Shared memory test passed.");
        Ok(())
    }

    fn check_runtime_configuration(&self, pkg: &Package) -> Result<()> {
        let installed: Vec<(bool, &str, &Path)> = pkg
            .entries()
            .iter()
            .filter(|e| e.kind().is_opengl_file() && e.kind().is_shared_library())
            .filter_map(|e| Some((e.kind().is_compat32(), e.name(), e.dst()?)))
            .collect();
        if installed.is_empty() {
            return Ok(());
        }

        let cache = self.ldconfig_cache()?;
        let native_is_64 = cfg!(target_pointer_width = "64");

        for (compat32, name, dst) in installed {
            let want_64 = native_is_64 && !compat32;
            let Some(resolved) = cache
                .get(name)
                .and_then(|paths| paths.iter().find(|(is_64, _)| *is_64 == want_64))
                .map(|(_, path)| path)
            else {
                continue;
            };
            if resolved != dst && !same_file(resolved, dst) {
                bail!(
                    "The runtime linker resolves '{}' to '{}' instead of the installed '{}'",
                    name,
                    resolved.display(),
                    dst.display()
                );
            }
        }

        info!("Runtime sanity check passed.");
        Ok(())
    }
}

pub(super) fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Whether both paths exist and name one file, e.g. `/lib` and `/usr/lib` on
/// a merged-/usr system
fn same_file(a: &Path, b: &Path) -> bool {
    matches!((FileId::of(a), FileId::of(b)), (Some(a), Some(b)) if a == b)
}

/// `glibc 2.35` → `(2, 35)`
fn parse_glibc_version(text: &str) -> Option<(u32, u32)> {
    let version = text.split_whitespace().nth(1)?;
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Parse `ldconfig -p` output into soname → [(is 64-bit, path)] in cache order
fn parse_ldconfig_cache(text: &str) -> HashMap<String, Vec<(bool, PathBuf)>> {
    let mut cache: HashMap<String, Vec<(bool, PathBuf)>> = HashMap::new();

    for line in text.lines().skip(1) {
        let Some((lhs, path)) = line.split_once("=>") else {
            continue;
        };
        let lhs = lhs.trim();
        let Some((name, flags)) = lhs.split_once(' ') else {
            continue;
        };
        cache
            .entry(name.to_string())
            .or_default()
            .push((flags.contains("64"), PathBuf::from(path.trim())));
    }
    cache
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, path: &str, contents: &str) {
        let path = root.join(path.trim_start_matches('/'));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_module_loaded() {
        let root = tempfile::tempdir().unwrap();
        write(
            root.path(),
            "proc/modules",
            "nvidia_drm 77824 2 - Live 0x0\nnouveau 2281472 0 - Live 0x0\n",
        );
        let probe = HostProbe::with_root(root.path());
        assert!(probe.is_module_loaded("nouveau").unwrap());
        assert!(!probe.is_module_loaded("nvidia").unwrap());
    }

    #[test]
    fn test_display_lock_file() {
        let root = tempfile::tempdir().unwrap();
        let probe = HostProbe::with_root(root.path());
        assert_eq!(probe.display_lock_file(), None);

        write(root.path(), "tmp/.X1-lock", "1234\n");
        assert_eq!(
            probe.display_lock_file(),
            Some(PathBuf::from("/tmp/.X1-lock"))
        );
    }

    #[test]
    fn test_distro_detection() {
        let root = tempfile::tempdir().unwrap();
        let probe = HostProbe::with_root(root.path());
        assert_eq!(probe.distro(), Distro::Other);

        write(root.path(), "etc/debian_version", "12.5\n");
        assert_eq!(probe.distro(), Distro::Debian);

        write(root.path(), "etc/SuSE-release", "SUSE LINUX 10.0\n");
        assert_eq!(probe.distro(), Distro::Suse);
    }

    #[test]
    fn test_graphics_devices() {
        let root = tempfile::tempdir().unwrap();
        let devices = "sys/bus/pci/devices";
        write(root.path(), &format!("{devices}/0000:01:00.0/vendor"), "0x10de\n");
        write(root.path(), &format!("{devices}/0000:01:00.0/class"), "0x030000\n");
        write(root.path(), &format!("{devices}/0000:01:00.0/device"), "0x0110\n");
        write(root.path(), &format!("{devices}/0000:02:00.0/vendor"), "0x10de\n");
        write(root.path(), &format!("{devices}/0000:02:00.0/class"), "0x030000\n");
        write(root.path(), &format!("{devices}/0000:02:00.0/device"), "0x2204\n");
        // Audio function of the same card
        write(root.path(), &format!("{devices}/0000:02:00.1/vendor"), "0x10de\n");
        write(root.path(), &format!("{devices}/0000:02:00.1/class"), "0x040300\n");
        write(root.path(), &format!("{devices}/0000:02:00.1/device"), "0x1aef\n");

        let found = HostProbe::with_root(root.path()).graphics_devices().unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "GeForce2 MX/MX 400");
        assert_eq!(found[0].support, DeviceSupport::Legacy("96.43.xx".into()));
        assert_eq!(found[1].pci_id, "10de:2204");
        assert_eq!(found[1].support, DeviceSupport::Supported);
    }

    #[test]
    fn test_installed_driver_version() {
        let root = tempfile::tempdir().unwrap();
        let probe = HostProbe::with_root(root.path());
        assert_eq!(probe.installed_driver_version(), None);

        write(root.path(), super::super::BACKUP_LOG, "1.0-7667\nNVIDIA driver\n");
        assert_eq!(probe.installed_driver_version().as_deref(), Some("1.0-7667"));
    }

    #[test]
    fn test_parse_glibc_version() {
        assert_eq!(parse_glibc_version("glibc 2.35\n"), Some((2, 35)));
        assert_eq!(parse_glibc_version("glibc"), None);
    }

    /// Package with one native OpenGL library installed at `dst`
    fn libgl_package(dst: PathBuf) -> Package {
        let mut pkg = Package::new("/nonexistent");
        pkg.add_entry(
            "libGL.so.1",
            crate::package::EntryKind::ArchLib {
                ty: crate::package::ArchLibType::OpenglLib,
                arch: Arch::Native,
                path: "lib".into(),
            },
            0o755,
            Some(dst),
        );
        pkg
    }

    /// Install an `ldconfig` under `root` that reports libGL.so.1 at `resolved`
    fn fake_ldconfig(root: &Path, resolved: &Path) {
        use std::os::unix::fs::PermissionsExt;
        let flags = if cfg!(target_pointer_width = "64") { "libc6,x86-64" } else { "libc6" };
        let script = root.join("sbin/ldconfig");
        write(
            root,
            "sbin/ldconfig",
            &format!(
                "#!/bin/sh\necho \"1 libs found in cache\"\nprintf '\\tlibGL.so.1 ({}) => {}\\n'\n",
                flags,
                resolved.display()
            ),
        );
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_runtime_check_accepts_symlinked_lib_dir() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "usr/lib/libGL.so.1", "ELF");
        std::os::unix::fs::symlink(root.path().join("usr/lib"), root.path().join("lib")).unwrap();
        fake_ldconfig(root.path(), &root.path().join("lib/libGL.so.1"));

        let pkg = libgl_package(root.path().join("usr/lib/libGL.so.1"));
        let probe = HostProbe::with_root(root.path());
        probe.check_runtime_configuration(&pkg).unwrap();
    }

    #[test]
    fn test_runtime_check_rejects_other_library() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "usr/lib/libGL.so.1", "ELF");
        write(root.path(), "usr/local/lib/libGL.so.1", "stale ELF");
        fake_ldconfig(root.path(), &root.path().join("usr/local/lib/libGL.so.1"));

        let pkg = libgl_package(root.path().join("usr/lib/libGL.so.1"));
        let probe = HostProbe::with_root(root.path());
        let err = probe.check_runtime_configuration(&pkg).unwrap_err();
        assert!(err.to_string().contains("usr/local/lib/libGL.so.1"), "{err}");
    }

    #[test]
    fn test_parse_ldconfig_cache() {
        let text = "2 libs found in cache `/etc/ld.so.cache'\n\
            \tlibGL.so.1 (libc6,x86-64) => /usr/lib/libGL.so.1\n\
            \tlibGL.so.1 (libc6) => /usr/lib32/libGL.so.1\n";
        let cache = parse_ldconfig_cache(text);
        assert_eq!(
            cache["libGL.so.1"],
            vec![
                (true, PathBuf::from("/usr/lib/libGL.so.1")),
                (false, PathBuf::from("/usr/lib32/libGL.so.1")),
            ]
        );
    }
}
