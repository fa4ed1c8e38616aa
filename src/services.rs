//! Collaborator interfaces
//!
//! The install pipeline only talks to the outside world through these traits.
//! [`crate::system`] implements them for a real host; tests use recording fakes.
//!
//! Collaborators report failures as `anyhow::Error`. The pipeline wraps them in
//! [`InstallerError::Tool`](crate::error::InstallerError) with the action that
//! was being attempted.

use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};
use tracing::debug;

use crate::options::Distro;
use crate::package::{Arch, EntryKind, Package, SymlinkType};

/// Distribution hook scripts run around an installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Hook {
    PreInstall,
    PostInstall,
    FailedInstall,
}

/// How well the driver supports a detected GPU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSupport {
    Supported,
    /// Only supported by the named legacy driver branch
    Legacy(String),
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsDevice {
    pub name: String,
    /// `vendor:device`, hexadecimal
    pub pci_id: String,
    pub support: DeviceSupport,
}

/// Parameters of a kernel module build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBuild {
    pub kernel: String,
    pub kernel_source: PathBuf,
    /// Build even though the compiler differs from the kernel's
    pub ignore_cc_mismatch: bool,
}

/// Interactive prompting and user-visible output
pub trait Ui {
    fn set_title(&mut self, title: &str);
    fn message(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
    /// Written to the log only
    fn log(&mut self, msg: &str);
    fn yes_no(&mut self, default: bool, question: &str) -> bool;
    fn get_input(&mut self, default: &str, prompt: &str) -> String;
    /// Show the license text, returning whether it was accepted
    fn accept_license(&mut self, license: &str) -> bool;
    fn approve_command_list(&mut self, commands: &CommandList) -> bool;
}

/// Read-only queries about the host
pub trait SystemProbe {
    /// Release of the running kernel (`uname -r`)
    fn running_kernel(&self) -> Result<String>;
    fn graphics_devices(&self) -> Result<Vec<GraphicsDevice>>;
    /// Lock file of a running X server, if any
    fn display_lock_file(&self) -> Option<PathBuf>;
    fn is_module_loaded(&self, module: &str) -> Result<bool>;
    /// Version of a driver already installed on the system
    fn installed_driver_version(&self) -> Option<String>;
    fn supports_new_tls(&self, arch: Arch) -> bool;
    fn supports_compat32(&self) -> bool;
    fn find_system_util(&self, name: &str) -> Option<PathBuf>;
    fn is_dir(&self, path: &Path) -> bool;
    fn distro(&self) -> Distro;
    /// Shared memory limits large enough for the driver
    fn check_sysvipc(&self) -> Result<()>;
    /// Libraries resolve to the freshly installed copies
    fn check_runtime_configuration(&self, pkg: &Package) -> Result<()>;
}

/// Distribution hook scripts
pub trait HookRunner {
    /// Run a hook. A missing hook script counts as success.
    fn run(&mut self, hook: Hook) -> Result<()>;
}

/// Kernel module operations
pub trait KernelTools {
    fn unload_module(&mut self, module: &str) -> Result<()>;
    fn create_install_dir(&mut self, path: &Path) -> Result<()>;
    /// The module loader can find modules in the installation path
    fn check_module_loader(&mut self) -> Result<()>;
    /// Precompiled kernel interface for `kernel` shipped with the package
    fn find_precompiled(&mut self, pkg: &Package, kernel: &str) -> Result<Option<PathBuf>>;
    fn link_precompiled(&mut self, pkg: &Package, interface: &Path) -> Result<()>;
    /// Err describes how the compiler differs from the one the kernel was built with
    fn check_cc_version(&mut self, pkg: &Package, kernel: &str) -> Result<()>;
    fn kernel_source_path(&mut self, requested: Option<&Path>, kernel: &str) -> Result<PathBuf>;
    fn build_module(&mut self, pkg: &Package, build: &ModuleBuild) -> Result<()>;
    fn test_load_module(&mut self, pkg: &Package) -> Result<()>;
    /// Build only the kernel interface object, returning its path
    fn build_interface(&mut self, pkg: &Package, build: &ModuleBuild) -> Result<PathBuf>;
    /// Store a built interface as the precompiled interface for `kernel`
    fn store_precompiled(&mut self, pkg: &Package, kernel: &str, interface: &Path)
    -> Result<PathBuf>;
}

/// Uninstall, command list construction and execution
pub trait CommandEngine {
    /// Remove a previously installed driver
    fn uninstall_existing(&mut self) -> Result<()>;

    fn build_command_list(&mut self, pkg: &Package) -> Result<CommandList> {
        CommandList::from_package(pkg)
    }

    fn execute(&mut self, commands: &CommandList, backup: &mut dyn BackupLog) -> Result<()>;
}

/// Record of what an installation changed, used to uninstall it later
pub trait BackupLog {
    fn init(&mut self, pkg: &Package) -> Result<()>;
    /// Save an existing file about to be replaced
    fn preserve(&mut self, path: &Path) -> Result<()>;
    fn record_installed(&mut self, path: &Path) -> Result<()>;
}

/// DKMS registration
pub trait ModuleTracker {
    fn is_available(&self) -> bool;
    /// Add, build and install the module sources for `kernel`
    fn register(&mut self, pkg: &Package, kernel: &str) -> Result<()>;
}

/// X server configuration tool
pub trait XConfigTool {
    fn is_available(&self) -> bool;
    fn run(&mut self) -> Result<()>;
}

/// Everything the pipeline needs from outside
pub struct Services {
    pub ui: Box<dyn Ui>,
    pub probe: Box<dyn SystemProbe>,
    pub hooks: Box<dyn HookRunner>,
    pub kernel: Box<dyn KernelTools>,
    pub engine: Box<dyn CommandEngine>,
    pub backup: Box<dyn BackupLog>,
    pub dkms: Box<dyn ModuleTracker>,
    pub xconfig: Box<dyn XConfigTool>,
}

/// A single filesystem change made by an installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallCommand {
    InstallFile {
        src: PathBuf,
        dst: PathBuf,
        mode: u32,
    },
    Symlink {
        dst: PathBuf,
        target: String,
        /// Leave an existing file in place instead
        keep_existing: bool,
    },
    Run {
        argv: Vec<String>,
    },
}

impl fmt::Display for InstallCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstallFile { src, dst, mode } => write!(
                f,
                "install '{}' to '{}' (mode {:04o})",
                src.display(),
                dst.display(),
                mode
            ),
            Self::Symlink { dst, target, .. } => {
                write!(f, "symlink '{}' -> '{}'", dst.display(), target)
            }
            Self::Run { argv } => write!(f, "run `{}`", argv.join(" ")),
        }
    }
}

/// Ordered filesystem changes for one installation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandList {
    commands: Vec<InstallCommand>,
}

impl CommandList {
    /// One command per entry with a destination, then the cache refresh commands.
    pub fn from_package(pkg: &Package) -> Result<Self> {
        let mut commands = Vec::with_capacity(pkg.num_entries() + 2);
        let mut has_libraries = false;
        let mut has_module = false;

        for entry in pkg.entries() {
            let Some(dst) = entry.dst() else {
                continue;
            };
            // Installing from an unpacked copy that already sits at its destination
            if entry.target().is_none() && entry.is_source_of(dst) {
                debug!("'{}' is already in place; not reinstalling it", dst.display());
                continue;
            }
            has_libraries |= entry.kind().is_shared_library();
            has_module |= matches!(entry.kind(), EntryKind::KernelModule);

            let command = match entry.target() {
                Some(target) => InstallCommand::Symlink {
                    dst: dst.to_path_buf(),
                    target: target.to_string(),
                    keep_existing: matches!(
                        entry.kind(),
                        EntryKind::Symlink {
                            ty: SymlinkType::XmoduleNewsym,
                            ..
                        }
                    ),
                },
                None => InstallCommand::InstallFile {
                    src: pkg.source_dir().join(entry.file()),
                    dst: dst.to_path_buf(),
                    mode: entry.mode(),
                },
            };
            commands.push(command);
        }

        if commands.is_empty() {
            anyhow::bail!("no files to install");
        }
        if has_libraries {
            commands.push(InstallCommand::Run {
                argv: vec!["ldconfig".to_string()],
            });
        }
        if has_module {
            commands.push(InstallCommand::Run {
                argv: vec!["depmod".to_string(), "-a".to_string()],
            });
        }

        Ok(Self { commands })
    }

    pub fn commands(&self) -> &[InstallCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{ArchLibType, PlainType};

    #[test]
    fn test_hook_names() {
        assert_eq!(Hook::PreInstall.to_string(), "pre-install");
        assert_eq!(Hook::FailedInstall.to_string(), "failed-install");
        assert_eq!("post-install".parse::<Hook>().unwrap(), Hook::PostInstall);
    }

    #[test]
    fn test_command_list_from_package() {
        let mut pkg = Package::new("/pkg");
        pkg.add_entry(
            "libGL.so.1",
            EntryKind::ArchLib {
                ty: ArchLibType::OpenglLib,
                arch: Arch::Native,
                path: "lib".into(),
            },
            0o755,
            Some(PathBuf::from("/usr/lib/libGL.so.1")),
        );
        pkg.add_entry(
            "libglx.so",
            EntryKind::Symlink {
                ty: SymlinkType::XmoduleNewsym,
                path: "lib/xorg/modules".into(),
                target: "libglx.so.1".into(),
            },
            0o755,
            Some(PathBuf::from("/usr/lib/xorg/modules/libglx.so")),
        );
        pkg.add_entry("mkprecompiled", EntryKind::Plain(PlainType::KernelModuleCmd), 0o755, None);
        pkg.add_entry(
            "/build/nvidia.ko",
            EntryKind::KernelModule,
            0o644,
            Some(PathBuf::from("/lib/modules/6.1/video/nvidia.ko")),
        );

        let list = CommandList::from_package(&pkg).unwrap();
        let commands = list.commands();
        assert_eq!(commands.len(), 5);
        assert_eq!(
            commands[0],
            InstallCommand::InstallFile {
                src: PathBuf::from("/pkg/libGL.so.1"),
                dst: PathBuf::from("/usr/lib/libGL.so.1"),
                mode: 0o755
            }
        );
        assert!(matches!(
            &commands[1],
            InstallCommand::Symlink { keep_existing: true, .. }
        ));
        assert_eq!(
            commands[2],
            InstallCommand::InstallFile {
                src: PathBuf::from("/build/nvidia.ko"),
                dst: PathBuf::from("/lib/modules/6.1/video/nvidia.ko"),
                mode: 0o644
            }
        );
        assert_eq!(commands[3].to_string(), "run `ldconfig`");
        assert_eq!(commands[4].to_string(), "run `depmod -a`");
    }

    #[test]
    fn test_file_already_at_destination_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("usr/bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("nvidia-smi"), b"binary").unwrap();
        std::fs::write(root.path().join("nvidia-settings"), b"binary").unwrap();

        let mut pkg = Package::new(root.path());
        let utility = EntryKind::Plain(PlainType::UtilityBinary);
        pkg.add_entry("usr/bin/nvidia-smi", utility.clone(), 0o755, Some(bin.join("nvidia-smi")));
        pkg.add_entry("nvidia-settings", utility, 0o755, Some(bin.join("nvidia-settings")));

        let list = CommandList::from_package(&pkg).unwrap();
        assert_eq!(
            list.commands(),
            [InstallCommand::InstallFile {
                src: root.path().join("nvidia-settings"),
                dst: bin.join("nvidia-settings"),
                mode: 0o755
            }]
        );
    }

    #[test]
    fn test_empty_command_list_is_error() {
        let pkg = Package::new("/pkg");
        assert!(CommandList::from_package(&pkg).is_err());
    }
}
