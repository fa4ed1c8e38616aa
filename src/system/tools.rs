//! Hook scripts, DKMS and nvidia-xconfig

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, info};

use super::probe::HostProbe;
use crate::package::Package;
use crate::process::HostCommand;
use crate::services::{Hook, HookRunner, ModuleTracker, SystemProbe, XConfigTool};

/// Runs distribution hook scripts from one directory, named after the hook
#[derive(Debug, Clone)]
pub struct ScriptHooks {
    dir: PathBuf,
}

impl ScriptHooks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl HookRunner for ScriptHooks {
    fn run(&mut self, hook: Hook) -> Result<()> {
        let script = self.dir.join(hook.to_string());
        if !script.is_file() {
            debug!("No {} hook at {}", hook, script.display());
            return Ok(());
        }
        info!("Running the {} hook", hook);
        HostCommand::new(&script).run_checked(&format!("The {} script", hook))?;
        Ok(())
    }
}

/// Registers the module sources with `dkms`
#[derive(Debug, Clone, Default)]
pub struct Dkms {
    probe: HostProbe,
}

impl Dkms {
    pub fn new(probe: HostProbe) -> Self {
        Self { probe }
    }
}

impl ModuleTracker for Dkms {
    fn is_available(&self) -> bool {
        self.probe.find_system_util("dkms").is_some()
    }

    fn register(&mut self, pkg: &Package, kernel: &str) -> Result<()> {
        let dkms = self
            .probe
            .find_system_util("dkms")
            .context("dkms is not installed")?;
        let module = ["-m", pkg.kernel_module_name.as_str(), "-v", pkg.version.as_str()];

        HostCommand::new(&dkms)
            .arg("add")
            .args(module)
            .run_checked("dkms add")?;
        for action in ["build", "install"] {
            HostCommand::new(&dkms)
                .arg(action)
                .args(module)
                .args(["-k", kernel])
                .run_checked(&format!("dkms {}", action))?;
        }
        info!(
            "Registered {}-{} with DKMS for kernel {}",
            pkg.kernel_module_name, pkg.version, kernel
        );
        Ok(())
    }
}

/// Updates the X configuration with `nvidia-xconfig`
#[derive(Debug, Clone, Default)]
pub struct NvidiaXConfig {
    probe: HostProbe,
}

impl NvidiaXConfig {
    pub fn new(probe: HostProbe) -> Self {
        Self { probe }
    }
}

impl XConfigTool for NvidiaXConfig {
    fn is_available(&self) -> bool {
        self.probe.find_system_util("nvidia-xconfig").is_some()
    }

    fn run(&mut self) -> Result<()> {
        let tool = self
            .probe
            .find_system_util("nvidia-xconfig")
            .context("nvidia-xconfig is not installed")?;
        HostCommand::new(tool).run_checked("nvidia-xconfig")?;
        Ok(())
    }
}
