//! Kernel module tooling via `make`, `ld`, `insmod` and `rmmod`

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::probe::{HostProbe, is_executable};
use crate::package::Package;
use crate::process::HostCommand;
use crate::services::{KernelTools, ModuleBuild, SystemProbe};

/// Core object linked with the kernel interface into the module
const KERNEL_CORE_OBJECT: &str = "nv-kernel.o";

/// Compatibility checks shipped in the module build directory
const CONFTEST_SCRIPT: &str = "conftest.sh";

/// Names the helper the kernel runs to load modules on demand
const MODPROBE_PROC_FILE: &str = "/proc/sys/kernel/modprobe";

/// Kernel default when the proc file is unavailable
const DEFAULT_MODPROBE: &str = "/sbin/modprobe";

/// Name of a precompiled interface for `kernel` inside the package's
/// precompiled interface directory
pub fn precompiled_filename(kernel: &str) -> String {
    format!("precompiled-{}", kernel)
}

fn module_filename(pkg: &Package) -> String {
    format!("{}.ko", pkg.kernel_module_name)
}

/// Kernel tooling on the running host
#[derive(Debug, Default, Clone)]
pub struct HostKernelTools {
    probe: HostProbe,
}

impl HostKernelTools {
    pub fn new(probe: HostProbe) -> Self {
        Self { probe }
    }

    fn compiler() -> String {
        std::env::var("CC").unwrap_or_else(|_| "cc".to_string())
    }

    fn make(build: &ModuleBuild, dir: &Path, target: &str) -> HostCommand {
        let mut cmd = HostCommand::new("make")
            .current_dir(dir)
            .arg(target)
            .arg(format!("SYSSRC={}", build.kernel_source.display()));
        if build.ignore_cc_mismatch {
            cmd = cmd.env("IGNORE_CC_MISMATCH", "1");
        }
        cmd
    }
}

impl KernelTools for HostKernelTools {
    fn unload_module(&mut self, module: &str) -> Result<()> {
        HostCommand::new("rmmod")
            .arg(module)
            .run_checked(&format!("Unloading kernel module '{}'", module))?;
        Ok(())
    }

    fn create_install_dir(&mut self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))
    }

    fn check_module_loader(&mut self) -> Result<()> {
        let loader = match fs::read_to_string(self.probe.path(MODPROBE_PROC_FILE)) {
            Ok(contents) => contents.lines().next().unwrap_or_default().trim().to_string(),
            Err(e) => {
                debug!("Unable to read {}: {}", MODPROBE_PROC_FILE, e);
                DEFAULT_MODPROBE.to_string()
            }
        };

        if loader.is_empty() || !is_executable(&self.probe.path(&loader)) {
            bail!(
                "The path to the `modprobe` utility reported by '{}', `{}`, does not appear to \
                 point to a valid `modprobe` binary.  Please correct the path in '{}'.",
                MODPROBE_PROC_FILE,
                loader,
                MODPROBE_PROC_FILE
            );
        }

        if let Some(found) = self.probe.find_system_util("modprobe") {
            if found != self.probe.path(&loader) {
                warn!(
                    "The kernel loads modules with '{}' while '{}' was found in the search path",
                    loader,
                    found.display()
                );
            }
        }
        Ok(())
    }

    fn find_precompiled(&mut self, pkg: &Package, kernel: &str) -> Result<Option<PathBuf>> {
        let candidate = pkg
            .source_dir()
            .join(&pkg.precompiled_kernel_interface_directory)
            .join(precompiled_filename(kernel));
        debug!("Looking for a precompiled interface at {}", candidate.display());
        Ok(candidate.is_file().then_some(candidate))
    }

    fn link_precompiled(&mut self, pkg: &Package, interface: &Path) -> Result<()> {
        let build_dir = pkg.build_dir();
        fs::copy(interface, build_dir.join(&pkg.kernel_interface_filename)).with_context(|| {
            format!("copying {} into the build directory", interface.display())
        })?;

        HostCommand::new("ld")
            .current_dir(&build_dir)
            .args(["-r", "-o"])
            .arg(module_filename(pkg))
            .arg(&pkg.kernel_interface_filename)
            .arg(KERNEL_CORE_OBJECT)
            .run_checked("Linking the kernel module")?;
        info!("Kernel module linked successfully.");
        Ok(())
    }

    fn check_cc_version(&mut self, pkg: &Package, _kernel: &str) -> Result<()> {
        let build_dir = pkg.build_dir();
        let conftest = build_dir.join(CONFTEST_SCRIPT);
        if !conftest.is_file() {
            debug!("No {} in the package; skipping the compiler check", CONFTEST_SCRIPT);
            return Ok(());
        }

        let uts = nix::sys::utsname::uname().context("uname failed")?;
        let cc = Self::compiler();
        let output = HostCommand::new("sh")
            .current_dir(&build_dir)
            .arg(conftest)
            .arg(&cc)
            .arg(&cc)
            .arg(uts.machine())
            .args(["DUMMY_SOURCE_PATH", "DUMMY_OUTPUT_PATH", "cc_version_check", "just_msg"])
            .run()?;
        if output.success {
            return Ok(());
        }
        bail!("{}", output.stdout.trim())
    }

    fn kernel_source_path(&mut self, requested: Option<&Path>, kernel: &str) -> Result<PathBuf> {
        if let Some(path) = requested {
            if !path.is_dir() {
                bail!("the kernel source path '{}' does not exist", path.display());
            }
            return Ok(path.to_path_buf());
        }

        let modules = Path::new("/lib/modules").join(kernel);
        let candidates = std::env::var_os("SYSSRC")
            .map(PathBuf::from)
            .into_iter()
            .chain([
                modules.join("source"),
                modules.join("build"),
                PathBuf::from("/usr/src/linux"),
            ]);
        for candidate in candidates {
            if candidate.join("Makefile").is_file() {
                info!("Using the kernel source path '{}'", candidate.display());
                return Ok(candidate);
            }
        }

        bail!(
            "Unable to find the kernel source tree for '{}'.  Please make sure you have \
             installed the kernel source files for your kernel and that they are properly \
             configured",
            kernel
        )
    }

    fn build_module(&mut self, pkg: &Package, build: &ModuleBuild) -> Result<()> {
        let build_dir = pkg.build_dir();

        // A failing clean just means there was nothing to clean
        let _ = HostCommand::new("make").current_dir(&build_dir).arg("clean").run();

        Self::make(build, &build_dir, "module").run_checked("Building the kernel module")?;

        let module = build_dir.join(module_filename(pkg));
        if !module.is_file() {
            bail!("the kernel module '{}' was not created", module.display());
        }
        info!("Kernel module compilation complete.");
        Ok(())
    }

    fn test_load_module(&mut self, pkg: &Package) -> Result<()> {
        let module = pkg.build_dir().join(module_filename(pkg));
        HostCommand::new("insmod")
            .arg(&module)
            .run_checked("Loading the kernel module")?;
        HostCommand::new("rmmod")
            .arg(&pkg.kernel_module_name)
            .run_checked("Unloading the kernel module")?;
        Ok(())
    }

    fn build_interface(&mut self, pkg: &Package, build: &ModuleBuild) -> Result<PathBuf> {
        let build_dir = pkg.build_dir();
        let scratch = tempfile::Builder::new()
            .prefix("drvinst-build-")
            .tempdir()
            .context("Unable to create a temporary build directory")?;
        copy_dir_contents(&build_dir, scratch.path())?;

        Self::make(build, scratch.path(), &pkg.kernel_interface_filename)
            .run_checked("Building the kernel interface")?;

        let built = scratch.path().join(&pkg.kernel_interface_filename);
        if !built.is_file() {
            bail!("the kernel interface '{}' was not created", built.display());
        }

        let interface = build_dir.join(&pkg.kernel_interface_filename);
        fs::copy(&built, &interface)
            .with_context(|| format!("copying the kernel interface to {}", interface.display()))?;
        info!("Kernel module interface compilation complete.");
        Ok(interface)
    }

    fn store_precompiled(&mut self, pkg: &Package, kernel: &str, interface: &Path) -> Result<PathBuf> {
        let dir = pkg
            .source_dir()
            .join(&pkg.precompiled_kernel_interface_directory);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

        let stored = dir.join(precompiled_filename(kernel));
        fs::copy(interface, &stored)
            .with_context(|| format!("storing the kernel interface as {}", stored.display()))?;
        Ok(stored)
    }
}

/// Copy the regular files directly inside `src` into `dst`
fn copy_dir_contents(src: &Path, dst: &Path) -> Result<()> {
    for entry in fs::read_dir(src).with_context(|| format!("reading {}", src.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::copy(entry.path(), dst.join(entry.file_name()))?;
        }
    }
    Ok(())
}
