//! Kernel module acquisition
//!
//! Decides how the package's kernel module is obtained for the target kernel:
//! link a precompiled kernel interface shipped with the package, or compile
//! one from source. Either way the result is smoke-tested and added to the
//! package as a `KERNEL_MODULE` entry.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{InstallerError, Result, ToolResultExt};
use crate::options::Options;
use crate::package::{EntryKind, Package};
use crate::services::{KernelTools, ModuleBuild, SystemProbe, Ui};

/// How many times an expert is asked for a path before giving up
const PATH_QUESTION_ATTEMPTS: usize = 3;

/// Build tools required to compile a kernel interface, with the package
/// that usually provides each
const DEVELOPMENT_TOOLS: [(&str, &str); 2] = [("cc", "gcc"), ("make", "make")];

/// The kernel being installed for: `--kernel-name`, else the running kernel
pub fn kernel_name(options: &Options, probe: &dyn SystemProbe) -> Result<String> {
    match &options.kernel_name {
        Some(name) => Ok(name.clone()),
        None => probe
            .running_kernel()
            .tool_context("Unable to determine the running kernel version"),
    }
}

/// `/lib/modules/<kernel>/kernel/drivers/video` on kernels with the
/// `kernel/` hierarchy, `/lib/modules/<kernel>/video` otherwise
pub fn default_module_installation_path(kernel: &str, probe: &dyn SystemProbe) -> PathBuf {
    let base = Path::new("/lib/modules").join(kernel);
    if probe.is_dir(&base.join("kernel")) {
        base.join("kernel/drivers/video")
    } else {
        base.join("video")
    }
}

/// Where the module gets installed. Expert mode may replace the default.
pub fn module_installation_path(
    options: &Options,
    kernel: &str,
    ui: &mut dyn Ui,
    probe: &dyn SystemProbe,
) -> Result<PathBuf> {
    if let Some(path) = &options.kernel_module_installation_path {
        return Ok(path.clone());
    }

    let default = default_module_installation_path(kernel, probe);
    if !options.expert {
        return Ok(default);
    }

    let default_text = default.to_string_lossy().into_owned();
    for _ in 0..PATH_QUESTION_ATTEMPTS {
        let answer = ui.get_input(&default_text, "Kernel module installation path");
        let answer = answer.trim();
        if !answer.is_empty() && Path::new(answer).is_absolute() {
            return Ok(PathBuf::from(answer));
        }
        ui.warn("Invalid kernel module installation path.");
    }

    Err(InstallerError::invalid_path(
        "unable to determine the kernel module installation path",
    ))
}

/// Unload the package's own module and the known conflicting modules if they
/// are loaded, then make sure none of them still is.
pub fn unload_conflicting_modules(
    pkg: &Package,
    probe: &dyn SystemProbe,
    tools: &mut dyn KernelTools,
) -> Result<()> {
    let modules = std::iter::once(&pkg.kernel_module_name).chain(&pkg.bad_modules);

    for module in modules {
        let loaded = probe
            .is_module_loaded(module)
            .tool_context("Unable to query loaded kernel modules")?;
        if !loaded {
            continue;
        }

        info!("Kernel module '{}' is loaded, unloading it", module);
        if let Err(e) = tools.unload_module(module) {
            debug!("Unloading '{}' failed: {:#}", module, e);
        }

        let still_loaded = probe
            .is_module_loaded(module)
            .tool_context("Unable to query loaded kernel modules")?;
        if still_loaded {
            return Err(InstallerError::ModuleStillLoaded {
                module: module.clone(),
            });
        }
    }

    Ok(())
}

/// `cc` and `make` must be on PATH before anything is compiled
pub fn check_development_tools(probe: &dyn SystemProbe) -> Result<()> {
    for (tool, package) in DEVELOPMENT_TOOLS {
        match probe.find_system_util(tool) {
            Some(path) => debug!("Found {} at {}", tool, path.display()),
            None => {
                return Err(InstallerError::MissingBuildTool {
                    tool: tool.to_string(),
                    package: package.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Compiler check. Returns whether the build must ignore a compiler mismatch.
fn check_cc_version(
    pkg: &Package,
    options: &Options,
    kernel: &str,
    ui: &mut dyn Ui,
    tools: &mut dyn KernelTools,
) -> Result<bool> {
    if options.ignore_cc_version_check {
        return Ok(true);
    }

    let Err(mismatch) = tools.check_cc_version(pkg, kernel) else {
        return Ok(false);
    };

    let question = format!(
        "The CC version check failed:\n\n{:#}\n\nIf you know what you are doing and want to \
         ignore the gcc version check, select \"No\" to continue installation.  Otherwise, \
         select \"Yes\" to abort installation, set the CC environment variable to the name of \
         the compiler used to compile your kernel, and restart installation.  Abort now?",
        mismatch
    );
    if ui.yes_no(true, &question) {
        return Err(InstallerError::CompilerMismatch(format!("{:#}", mismatch)));
    }
    ui.log("Ignoring the CC version check.");
    Ok(true)
}

/// Precompiled interface for `kernel`, unless disabled or refused by an expert
fn find_precompiled(
    pkg: &Package,
    options: &Options,
    kernel: &str,
    ui: &mut dyn Ui,
    tools: &mut dyn KernelTools,
) -> Result<Option<PathBuf>> {
    if options.no_precompiled_interface {
        ui.log("Not probing for precompiled kernel interfaces.");
        return Ok(None);
    }

    let found = tools
        .find_precompiled(pkg, kernel)
        .tool_context("Unable to search for a precompiled kernel interface")?;

    match found {
        Some(path) if options.expert => {
            let question = format!(
                "A precompiled kernel interface for the kernel '{}' has been found.  Would you \
                 like to use this? (answering 'no' will require the installer to compile the \
                 interface)",
                kernel
            );
            Ok(ui.yes_no(true, &question).then_some(path))
        }
        Some(path) => Ok(Some(path)),
        None => {
            if options.expert {
                ui.message(
                    "No precompiled kernel interface was found to match your kernel; this \
                     means that the installer will need to compile a new kernel interface.",
                );
            }
            Ok(None)
        }
    }
}

fn prepare_build(
    pkg: &Package,
    options: &Options,
    kernel: &str,
    ui: &mut dyn Ui,
    tools: &mut dyn KernelTools,
    probe: &dyn SystemProbe,
) -> Result<ModuleBuild> {
    check_development_tools(probe)?;
    let ignore_cc_mismatch = check_cc_version(pkg, options, kernel, ui, tools)?;
    let kernel_source = tools
        .kernel_source_path(options.kernel_source_path.as_deref(), kernel)
        .tool_context("Unable to find the kernel source tree")?;
    info!("Kernel source path: {}", kernel_source.display());

    Ok(ModuleBuild {
        kernel: kernel.to_string(),
        kernel_source,
        ignore_cc_mismatch,
    })
}

/// Obtain a kernel module for the target kernel and add it to `pkg`.
///
/// Returns the module installation path.
pub fn acquire_kernel_module(
    pkg: &mut Package,
    options: &Options,
    ui: &mut dyn Ui,
    tools: &mut dyn KernelTools,
    probe: &dyn SystemProbe,
) -> Result<PathBuf> {
    let kernel = kernel_name(options, probe)?;

    let install_path = module_installation_path(options, &kernel, ui, probe)?;
    tools
        .create_install_dir(&install_path)
        .tool_context("Unable to create the kernel module installation directory")?;
    ui.log(&format!(
        "Kernel module installation path: {}",
        install_path.display()
    ));
    tools
        .check_module_loader()
        .tool_context("The module loader configuration check failed")?;

    match find_precompiled(pkg, options, &kernel, ui, tools)? {
        Some(interface) => {
            info!("Using precompiled kernel interface {}", interface.display());
            tools
                .link_precompiled(pkg, &interface)
                .tool_context("Unable to link the kernel module")?;
        }
        None => {
            let build = prepare_build(pkg, options, &kernel, ui, tools, probe)?;
            tools
                .build_module(pkg, &build)
                .tool_context("Unable to build the kernel module")?;
        }
    }

    // A module built for another kernel cannot be loaded into this one
    let running = probe
        .running_kernel()
        .tool_context("Unable to determine the running kernel version")?;
    if options.targets_other_kernel(&running) {
        ui.log(&format!(
            "Not test-loading the kernel module built for '{}' (running '{}').",
            kernel, running
        ));
    } else {
        tools
            .test_load_module(pkg)
            .tool_context("Unable to load the kernel module")?;
    }

    add_kernel_module_entry(pkg, &install_path);
    Ok(install_path)
}

/// Add the built module, `<build dir>/<module>.ko`, for installation into `install_path`
pub fn add_kernel_module_entry(pkg: &mut Package, install_path: &Path) {
    let filename = format!("{}.ko", pkg.kernel_module_name);
    let file = Path::new(&pkg.kernel_module_build_directory)
        .join(&filename)
        .to_string_lossy()
        .into_owned();
    let dst = install_path.join(&filename);

    pkg.add_entry(file, EntryKind::KernelModule, 0o644, Some(dst));
}

/// Build a kernel interface for the target kernel and store it with the
/// package's precompiled interfaces.
pub fn add_this_kernel(
    pkg: &Package,
    options: &Options,
    ui: &mut dyn Ui,
    tools: &mut dyn KernelTools,
    probe: &dyn SystemProbe,
) -> Result<PathBuf> {
    let kernel = kernel_name(options, probe)?;
    let kernel_source = tools
        .kernel_source_path(options.kernel_source_path.as_deref(), &kernel)
        .tool_context("Unable to find the kernel source tree")?;

    let build = ModuleBuild {
        kernel: kernel.clone(),
        kernel_source,
        ignore_cc_mismatch: options.ignore_cc_version_check,
    };
    let interface = tools
        .build_interface(pkg, &build)
        .tool_context("Unable to build the kernel interface")?;
    let stored = tools
        .store_precompiled(pkg, &kernel, &interface)
        .tool_context("Unable to store the precompiled kernel interface")?;

    ui.message(&format!(
        "Added a precompiled kernel interface for '{}' at '{}'.",
        kernel,
        stored.display()
    ));
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Distro;
    use crate::package::Arch;
    use std::cell::RefCell;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Probe {
        dirs: HashSet<PathBuf>,
        loaded: RefCell<HashSet<String>>,
        sticky: HashSet<String>,
    }

    impl SystemProbe for Probe {
        fn running_kernel(&self) -> anyhow::Result<String> {
            Ok("6.1.0".into())
        }
        fn graphics_devices(&self) -> anyhow::Result<Vec<crate::services::GraphicsDevice>> {
            Ok(Vec::new())
        }
        fn display_lock_file(&self) -> Option<PathBuf> {
            None
        }
        fn is_module_loaded(&self, module: &str) -> anyhow::Result<bool> {
            Ok(self.loaded.borrow().contains(module))
        }
        fn installed_driver_version(&self) -> Option<String> {
            None
        }
        fn supports_new_tls(&self, _arch: Arch) -> bool {
            true
        }
        fn supports_compat32(&self) -> bool {
            false
        }
        fn find_system_util(&self, _name: &str) -> Option<PathBuf> {
            None
        }
        fn is_dir(&self, path: &Path) -> bool {
            self.dirs.contains(path)
        }
        fn distro(&self) -> Distro {
            Distro::Other
        }
        fn check_sysvipc(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn check_runtime_configuration(&self, _pkg: &Package) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_installation_path() {
        let mut probe = Probe::default();
        assert_eq!(
            default_module_installation_path("6.1.0", &probe),
            PathBuf::from("/lib/modules/6.1.0/video")
        );

        probe.dirs.insert(PathBuf::from("/lib/modules/6.1.0/kernel"));
        assert_eq!(
            default_module_installation_path("6.1.0", &probe),
            PathBuf::from("/lib/modules/6.1.0/kernel/drivers/video")
        );
    }

    #[test]
    fn test_missing_cc_reported_first() {
        let err = check_development_tools(&Probe::default()).unwrap_err();
        match err {
            InstallerError::MissingBuildTool { tool, package } => {
                assert_eq!(tool, "cc");
                assert_eq!(package, "gcc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_kernel_module_entry() {
        let mut pkg = Package::new("/nonexistent");
        pkg.kernel_module_name = "nvidia".into();
        pkg.kernel_module_build_directory = "usr/src/nv".into();

        add_kernel_module_entry(&mut pkg, Path::new("/lib/modules/6.1.0/video"));

        let entry = &pkg.entries()[0];
        assert_eq!(entry.file(), "usr/src/nv/nvidia.ko");
        assert_eq!(entry.name(), "nvidia.ko");
        assert_eq!(entry.mode(), 0o644);
        assert_eq!(entry.kind(), &EntryKind::KernelModule);
        assert_eq!(
            entry.dst(),
            Some(Path::new("/lib/modules/6.1.0/video/nvidia.ko"))
        );
    }

    struct Unloader<'a> {
        probe: &'a Probe,
    }

    impl KernelTools for Unloader<'_> {
        fn unload_module(&mut self, module: &str) -> anyhow::Result<()> {
            if !self.probe.sticky.contains(module) {
                self.probe.loaded.borrow_mut().remove(module);
            }
            Ok(())
        }
        fn create_install_dir(&mut self, _path: &Path) -> anyhow::Result<()> {
            unreachable!()
        }
        fn check_module_loader(&mut self) -> anyhow::Result<()> {
            unreachable!()
        }
        fn find_precompiled(&mut self, _: &Package, _: &str) -> anyhow::Result<Option<PathBuf>> {
            unreachable!()
        }
        fn link_precompiled(&mut self, _: &Package, _: &Path) -> anyhow::Result<()> {
            unreachable!()
        }
        fn check_cc_version(&mut self, _: &Package, _: &str) -> anyhow::Result<()> {
            unreachable!()
        }
        fn kernel_source_path(&mut self, _: Option<&Path>, _: &str) -> anyhow::Result<PathBuf> {
            unreachable!()
        }
        fn build_module(&mut self, _: &Package, _: &ModuleBuild) -> anyhow::Result<()> {
            unreachable!()
        }
        fn test_load_module(&mut self, _: &Package) -> anyhow::Result<()> {
            unreachable!()
        }
        fn build_interface(&mut self, _: &Package, _: &ModuleBuild) -> anyhow::Result<PathBuf> {
            unreachable!()
        }
        fn store_precompiled(
            &mut self,
            _: &Package,
            _: &str,
            _: &Path,
        ) -> anyhow::Result<PathBuf> {
            unreachable!()
        }
    }

    #[test]
    fn test_loaded_modules_are_unloaded() {
        let probe = Probe::default();
        probe.loaded.borrow_mut().insert("nvidia".into());
        probe.loaded.borrow_mut().insert("nvnet".into());

        let mut pkg = Package::new("/nonexistent");
        pkg.kernel_module_name = "nvidia".into();
        pkg.bad_modules = vec!["nvnet".into()];

        unload_conflicting_modules(&pkg, &probe, &mut Unloader { probe: &probe }).unwrap();
        assert!(probe.loaded.borrow().is_empty());
    }

    #[test]
    fn test_module_that_stays_loaded_fails() {
        let mut probe = Probe::default();
        probe.sticky.insert("nvnet".into());
        probe.loaded.borrow_mut().insert("nvnet".into());

        let mut pkg = Package::new("/nonexistent");
        pkg.kernel_module_name = "nvidia".into();
        pkg.bad_modules = vec!["nvnet".into()];

        let err = unload_conflicting_modules(&pkg, &probe, &mut Unloader { probe: &probe })
            .unwrap_err();
        assert!(matches!(err, InstallerError::ModuleStillLoaded { module } if module == "nvnet"));
    }
}
