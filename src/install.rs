//! Install orchestration
//!
//! [`Installer::run`] walks a driver package through a fixed sequence of
//! stages, from parsing the manifest to offering X configuration. Each stage
//! either continues, declines (the user said no) or fails.
//!
//! # Stage Flow
//!
//! ```text
//!  1 ParseManifest        8 CheckCompetingDriver  15 ApproveCommandList
//!  2 DetectHardware       9 KernelModule          16 InitBackup
//!  3 CheckDisplayServer  10 SelectEntries         17 Execute
//!  4 UnloadModules       11 ExcludeFiles          18 DkmsRegister
//!  5 License             12 Destinations          19 PostInstallHook
//!  6 ExistingDriver      13 UninstallExisting     20 VerifyInstallation
//!  7 PreInstallHook      14 BuildCommandList      21 XConfig
//! ```
//!
//! Uninstalling the old driver (13) always precedes building the command list
//! (14), and the backup log (16) is always initialized before anything is
//! executed (17).
//!
//! On failure the user is pointed at the log file and, if the pre-install hook
//! ran, the failed-install hook runs. Declining ends the install quietly.

use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::destinations;
use crate::error::{InstallerError, ToolResultExt};
use crate::kernel;
use crate::manifest;
use crate::options::{Options, Prefixes};
use crate::package::Package;
use crate::selection;
use crate::services::{CommandList, DeviceSupport, Hook, Services};

/// Name of the license file in the package directory
pub const LICENSE_FILE: &str = "LICENSE";

/// What happens to the install when a stage errors or is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// An error fails the install
    Hard,
    /// The install stops without failing, showing the error if there was one
    Soft,
    /// A warning is shown and the install continues
    Advisory,
}

/// Installation stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Stage {
    ParseManifest = 1,
    DetectHardware = 2,
    CheckDisplayServer = 3,
    UnloadModules = 4,
    License = 5,
    ExistingDriver = 6,
    PreInstallHook = 7,
    CheckCompetingDriver = 8,
    KernelModule = 9,
    SelectEntries = 10,
    ExcludeFiles = 11,
    Destinations = 12,
    UninstallExisting = 13,
    BuildCommandList = 14,
    ApproveCommandList = 15,
    InitBackup = 16,
    Execute = 17,
    DkmsRegister = 18,
    PostInstallHook = 19,
    VerifyInstallation = 20,
    XConfig = 21,
}

impl Stage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    pub const fn severity(self) -> Severity {
        match self {
            Self::License | Self::ExistingDriver | Self::ApproveCommandList => Severity::Soft,
            Self::DetectHardware | Self::PostInstallHook | Self::XConfig => Severity::Advisory,
            _ => Severity::Hard,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::ParseManifest => "Parsing the package manifest",
            Self::DetectHardware => "Detecting graphics hardware",
            Self::CheckDisplayServer => "Checking for a running X server",
            Self::UnloadModules => "Unloading conflicting kernel modules",
            Self::License => "License acceptance",
            Self::ExistingDriver => "Checking for an existing driver",
            Self::PreInstallHook => "Running the pre-install hook",
            Self::CheckCompetingDriver => "Checking for the nouveau driver",
            Self::KernelModule => "Acquiring the kernel module",
            Self::SelectEntries => "Selecting files to install",
            Self::ExcludeFiles => "Excluding files",
            Self::Destinations => "Computing installation destinations",
            Self::UninstallExisting => "Uninstalling the existing driver",
            Self::BuildCommandList => "Building the command list",
            Self::ApproveCommandList => "Approving the command list",
            Self::InitBackup => "Initializing the backup log",
            Self::Execute => "Installing files",
            Self::DkmsRegister => "Registering with DKMS",
            Self::PostInstallHook => "Running the post-install hook",
            Self::VerifyInstallation => "Verifying the installation",
            Self::XConfig => "Configuring X",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[
            Self::ParseManifest,
            Self::DetectHardware,
            Self::CheckDisplayServer,
            Self::UnloadModules,
            Self::License,
            Self::ExistingDriver,
            Self::PreInstallHook,
            Self::CheckCompetingDriver,
            Self::KernelModule,
            Self::SelectEntries,
            Self::ExcludeFiles,
            Self::Destinations,
            Self::UninstallExisting,
            Self::BuildCommandList,
            Self::ApproveCommandList,
            Self::InitBackup,
            Self::Execute,
            Self::DkmsRegister,
            Self::PostInstallHook,
            Self::VerifyInstallation,
            Self::XConfig,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Result of an install run
#[derive(Debug)]
pub enum InstallOutcome {
    Installed,
    /// The user said no at a soft stage
    Declined { stage: Stage },
    Failed { stage: Stage, error: InstallerError },
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Installed)
    }

    /// Process exit status; declining and failing are not distinguished
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// Why the pipeline stopped early
#[derive(Debug)]
enum Halt {
    /// Refused, or errored at a soft stage
    Declined(Stage, Option<InstallerError>),
    Failed(Stage, InstallerError),
}

trait StageResultExt<T> {
    /// Attribute an error to `stage`, halting as its severity says
    fn at(self, stage: Stage) -> Result<T, Halt>;
}

impl<T> StageResultExt<T> for crate::error::Result<T> {
    fn at(self, stage: Stage) -> Result<T, Halt> {
        self.map_err(|e| match stage.severity() {
            Severity::Soft => Halt::Declined(stage, Some(e)),
            Severity::Hard | Severity::Advisory => Halt::Failed(stage, e),
        })
    }
}

/// State decided during a run. `Options` stays untouched.
struct InstallContext {
    ran_pre_install_hook: bool,
    register_with_dkms: bool,
    prefixes: Prefixes,
    /// Holds rewritten libGL.la and .desktop files until the install is over
    scratch: Option<TempDir>,
    history: Vec<Stage>,
}

impl InstallContext {
    fn new(options: &Options) -> Self {
        Self {
            ran_pre_install_hook: false,
            register_with_dkms: false,
            prefixes: options.prefixes.clone(),
            scratch: None,
            history: Vec::with_capacity(Stage::all().len()),
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!("Stage {}: {}", stage.order(), stage);
        self.history.push(stage);
    }

    fn scratch_dir(&mut self) -> crate::error::Result<&Path> {
        let dir = match self.scratch.take() {
            Some(dir) => dir,
            None => tempfile::Builder::new().prefix("drvinst-").tempdir()?,
        };
        Ok(self.scratch.insert(dir).path())
    }
}

const EDIT_YOUR_X_CONFIG: &str = "Please update your XF86Config or xorg.conf file as \
     appropriate; see the file /usr/share/doc/NVIDIA_GLX-1.0/README.txt for details.";

const SUSE_EDIT_YOUR_X_CONFIG: &str =
    "On SuSE Linux/United Linux please use SaX2 now to enable the NVIDIA driver.";

/// Drives one installation
pub struct Installer<'a> {
    options: &'a Options,
    services: Services,
    history: Vec<Stage>,
}

impl<'a> Installer<'a> {
    pub fn new(options: &'a Options, services: Services) -> Self {
        Self {
            options,
            services,
            history: Vec::new(),
        }
    }

    /// Stages entered by the last run, in order
    pub fn stage_history(&self) -> &[Stage] {
        &self.history
    }

    pub fn run(&mut self) -> InstallOutcome {
        let mut ctx = InstallContext::new(self.options);
        let result = self.pipeline(&mut ctx);
        self.history = std::mem::take(&mut ctx.history);

        match result {
            Ok(()) => {
                info!("Installation complete");
                InstallOutcome::Installed
            }
            Err(Halt::Declined(stage, reason)) => {
                if let Some(err) = reason {
                    self.services.ui.error(&err.to_string());
                }
                info!("Installation stopped: declined at '{}'", stage);
                InstallOutcome::Declined { stage }
            }
            Err(Halt::Failed(stage, err)) => {
                error!("Installation failed at '{}': {}", stage, err);
                self.report_failure(&err, ctx.ran_pre_install_hook);
                InstallOutcome::Failed { stage, error: err }
            }
        }
    }

    fn report_failure(&mut self, err: &InstallerError, ran_pre_install_hook: bool) {
        let ui = &mut self.services.ui;
        ui.error(&err.to_string());

        let msg = match &self.options.log_file {
            Some(log) => format!(
                "Installation has failed.  Please see the file '{}' for details.  You may \
                 find suggestions on fixing installation problems in the README available on \
                 the Linux driver download page at www.nvidia.com.",
                log.display()
            ),
            None => "Installation has failed.  You may find suggestions on fixing installation \
                     problems in the README available on the Linux driver download page at \
                     www.nvidia.com."
                .to_string(),
        };
        ui.error(&msg);

        if ran_pre_install_hook {
            if let Err(e) = self.services.hooks.run(Hook::FailedInstall) {
                warn!("failed-install hook: {:#}", e);
            }
        }
    }

    /// Apply `stage`'s severity to a stage that can be refused, where
    /// `Ok(false)` means the user said no
    fn settle(&mut self, stage: Stage, accepted: crate::error::Result<bool>) -> Result<(), Halt> {
        match stage.severity() {
            Severity::Advisory => {
                if let Err(e) = accepted {
                    warn!("{}: {:#}", stage, e);
                    self.services.ui.warn(&e.to_string());
                }
                Ok(())
            }
            Severity::Hard | Severity::Soft => match accepted.at(stage)? {
                true => Ok(()),
                false => Err(Halt::Declined(stage, None)),
            },
        }
    }

    fn pipeline(&mut self, ctx: &mut InstallContext) -> Result<(), Halt> {
        let opts = self.options;

        ctx.enter(Stage::ParseManifest);
        let mut pkg = manifest::load(&opts.package_dir)
            .map_err(InstallerError::from)
            .at(Stage::ParseManifest)?;
        self.services
            .ui
            .set_title(&format!("{} ({})", pkg.description, pkg.version));

        ctx.enter(Stage::DetectHardware);
        let detected = self.detect_hardware().map(|()| true);
        self.settle(Stage::DetectHardware, detected)?;

        ctx.enter(Stage::CheckDisplayServer);
        self.check_display_server().at(Stage::CheckDisplayServer)?;

        ctx.enter(Stage::UnloadModules);
        self.unload_modules(&pkg).at(Stage::UnloadModules)?;

        ctx.enter(Stage::License);
        let accepted = self.license_accepted();
        self.settle(Stage::License, accepted)?;
        self.services
            .ui
            .log(&format!("Installing driver version {}.", pkg.version));

        ctx.enter(Stage::ExistingDriver);
        let overwrite = self.confirm_overwrite(&pkg);
        self.settle(Stage::ExistingDriver, Ok(overwrite))?;

        ctx.enter(Stage::PreInstallHook);
        self.pre_install_hook().at(Stage::PreInstallHook)?;
        ctx.ran_pre_install_hook = true;

        ctx.enter(Stage::CheckCompetingDriver);
        self.check_competing_driver().at(Stage::CheckCompetingDriver)?;

        ctx.enter(Stage::KernelModule);
        self.kernel_module(&mut pkg, ctx).at(Stage::KernelModule)?;

        ctx.enter(Stage::SelectEntries);
        self.select_entries(&mut pkg, ctx).at(Stage::SelectEntries)?;

        ctx.enter(Stage::ExcludeFiles);
        if opts.no_opengl_files {
            selection::remove_opengl_files(&mut pkg);
        }
        if opts.no_kernel_module_source {
            selection::remove_kernel_module_sources(&mut pkg);
        }

        ctx.enter(Stage::Destinations);
        destinations::set_destinations(&mut pkg, &ctx.prefixes).at(Stage::Destinations)?;

        if !opts.kernel_module_only {
            ctx.enter(Stage::UninstallExisting);
            self.services
                .engine
                .uninstall_existing()
                .tool_context("Unable to uninstall the existing driver")
                .at(Stage::UninstallExisting)?;
        }

        ctx.enter(Stage::BuildCommandList);
        let commands = self
            .services
            .engine
            .build_command_list(&pkg)
            .tool_context("Unable to build the installation command list")
            .at(Stage::BuildCommandList)?;

        ctx.enter(Stage::ApproveCommandList);
        let approved = self.services.ui.approve_command_list(&commands);
        self.settle(Stage::ApproveCommandList, Ok(approved))?;

        if !opts.kernel_module_only {
            ctx.enter(Stage::InitBackup);
            self.services
                .backup
                .init(&pkg)
                .tool_context("Unable to initialize the backup log")
                .at(Stage::InitBackup)?;
        }

        ctx.enter(Stage::Execute);
        self.execute(&commands).at(Stage::Execute)?;

        if ctx.register_with_dkms {
            ctx.enter(Stage::DkmsRegister);
            self.register_with_dkms(&pkg).at(Stage::DkmsRegister)?;
        }

        ctx.enter(Stage::PostInstallHook);
        let hook = self
            .services
            .hooks
            .run(Hook::PostInstall)
            .tool_context("The distribution-provided post-install script failed")
            .map(|()| true);
        self.settle(Stage::PostInstallHook, hook)?;

        ctx.enter(Stage::VerifyInstallation);
        self.verify_installation(&pkg).at(Stage::VerifyInstallation)?;

        ctx.enter(Stage::XConfig);
        let configured = self.run_xconfig();
        let updated = matches!(configured, Ok(true));
        self.settle(Stage::XConfig, configured)?;
        self.finish(&pkg, updated);

        Ok(())
    }

    fn detect_hardware(&mut self) -> crate::error::Result<()> {
        let devices = self
            .services
            .probe
            .graphics_devices()
            .tool_context("Unable to scan for graphics devices")?;
        let ui = &mut self.services.ui;

        let mut supported = false;
        for device in &devices {
            match &device.support {
                DeviceSupport::Supported => supported = true,
                DeviceSupport::Legacy(branch) => ui.warn(&format!(
                    "The GPU {} ({}) is only supported by the {} legacy driver branch; \
                     this driver will not work with it.",
                    device.name, device.pci_id, branch
                )),
                DeviceSupport::Unsupported => ui.warn(&format!(
                    "The GPU {} ({}) is not supported by this driver.",
                    device.name, device.pci_id
                )),
            }
        }
        if !supported {
            ui.warn("No supported GPU was found in this system.");
        }
        Ok(())
    }

    fn check_display_server(&self) -> crate::error::Result<()> {
        if self.options.no_x_check {
            info!("Skipping the check for a running X server");
            return Ok(());
        }
        match self.services.probe.display_lock_file() {
            Some(lock_file) => Err(InstallerError::DisplayServerRunning { lock_file }),
            None => Ok(()),
        }
    }

    fn unload_modules(&mut self, pkg: &Package) -> crate::error::Result<()> {
        let opts = self.options;
        if opts.no_kernel_module {
            return Ok(());
        }
        if opts.kernel_module_only && opts.kernel_name.is_some() {
            let running = self
                .services
                .probe
                .running_kernel()
                .tool_context("Unable to determine the running kernel version")?;
            if opts.targets_other_kernel(&running) {
                debug!("Installing for a kernel that is not running; nothing to unload");
                return Ok(());
            }
        }
        kernel::unload_conflicting_modules(pkg, &*self.services.probe, &mut *self.services.kernel)
    }

    fn license_accepted(&mut self) -> crate::error::Result<bool> {
        if self.options.accept_license {
            self.services
                .ui
                .log("License accepted by command line option.");
            return Ok(true);
        }
        let path = self.options.package_dir.join(LICENSE_FILE);
        let text = fs::read_to_string(&path).map_err(|e| {
            InstallerError::tool(
                format!("Unable to read the license file '{}'", path.display()),
                e.into(),
            )
        })?;
        let accepted = self.services.ui.accept_license(&text);
        if accepted {
            self.services.ui.log("License accepted.");
        }
        Ok(accepted)
    }

    fn confirm_overwrite(&mut self, pkg: &Package) -> bool {
        if self.options.kernel_module_only {
            return true;
        }
        let Some(installed) = self.services.probe.installed_driver_version() else {
            return true;
        };
        let question = format!(
            "There appears to already be a driver installed on your system (version: {}).  \
             As part of installing this driver (version: {}), the existing driver will be \
             uninstalled.  Are you sure you want to continue? ('no' will abort installation)",
            installed, pkg.version
        );
        self.services.ui.yes_no(true, &question)
    }

    fn pre_install_hook(&mut self) -> crate::error::Result<()> {
        if let Err(e) = self.services.hooks.run(Hook::PreInstall) {
            warn!("pre-install hook failed: {:#}", e);
            let go_on = self.services.ui.yes_no(
                true,
                "The distribution-provided pre-install script failed!  Continue installation \
                 anyway?",
            );
            if !go_on {
                return Err(InstallerError::PreInstallHookFailed);
            }
        }
        Ok(())
    }

    fn check_competing_driver(&self) -> crate::error::Result<()> {
        if self.options.no_nouveau_check {
            return Ok(());
        }
        let loaded = self
            .services
            .probe
            .is_module_loaded("nouveau")
            .tool_context("Unable to query loaded kernel modules")?;
        if loaded {
            return Err(InstallerError::CompetingDriverLoaded {
                module: "nouveau".to_string(),
            });
        }
        Ok(())
    }

    fn kernel_module(
        &mut self,
        pkg: &mut Package,
        ctx: &mut InstallContext,
    ) -> crate::error::Result<()> {
        let opts = self.options;
        let Services {
            ui,
            probe,
            kernel: tools,
            dkms,
            ..
        } = &mut self.services;

        if opts.no_kernel_module {
            ui.warn(
                "You specified the '--no-kernel-module' command line option; the installer \
                 will not install a kernel module as part of this driver installation, and it \
                 will not remove existing kernel modules not part of an earlier driver \
                 installation.  Please ensure that a kernel module matching this driver \
                 version is installed separately.",
            );
            if opts.dkms {
                ui.warn(
                    "You have specified both the '--no-kernel-module' and the '--dkms' command \
                     line options.  The '--dkms' option will be ignored.",
                );
            }
            ctx.register_with_dkms = false;
            return Ok(());
        }

        if dkms.is_available() && !opts.no_kernel_module_source {
            ctx.register_with_dkms = ui.yes_no(
                opts.dkms,
                "Would you like to register the kernel module sources with DKMS? This will \
                 allow DKMS to automatically build a new module, if you install a different \
                 kernel later.",
            );
        }

        if ctx.register_with_dkms {
            info!("Kernel module build deferred to DKMS");
            return Ok(());
        }

        kernel::acquire_kernel_module(pkg, opts, &mut **ui, &mut **tools, &**probe)?;
        Ok(())
    }

    fn select_entries(
        &mut self,
        pkg: &mut Package,
        ctx: &mut InstallContext,
    ) -> crate::error::Result<()> {
        let opts = self.options;
        if opts.kernel_module_only {
            selection::keep_kernel_module_files(pkg);
            return Ok(());
        }

        let ui = &mut *self.services.ui;
        if opts.expert {
            prompt_prefixes(ui, &mut ctx.prefixes);
        }
        ctx.prefixes.validate()?;

        selection::select_opengl_headers(pkg, opts, ui);
        selection::select_tls_class(pkg, &*self.services.probe);

        if pkg.any_entry(|e| e.kind().is_libgl_la() || e.kind().is_dot_desktop()) {
            let prefixes = ctx.prefixes.clone();
            let scratch = ctx.scratch_dir()?;
            selection::substitute_placeholders(pkg, &prefixes, scratch)?;
        }

        selection::select_compat32_files(pkg, &*self.services.probe, &mut *self.services.ui);
        Ok(())
    }

    fn execute(&mut self, commands: &CommandList) -> crate::error::Result<()> {
        let Services {
            engine,
            backup,
            ui,
            ..
        } = &mut self.services;
        ui.message(&format!("Installing {} files...", commands.len()));
        engine
            .execute(commands, &mut **backup)
            .tool_context("Unable to install the driver files")
    }

    fn register_with_dkms(&mut self, pkg: &Package) -> crate::error::Result<()> {
        let kernel = kernel::kernel_name(self.options, &*self.services.probe)?;
        self.services
            .dkms
            .register(pkg, &kernel)
            .tool_context("Failed to install the kernel module through DKMS")
    }

    fn verify_installation(&mut self, pkg: &Package) -> crate::error::Result<()> {
        let problems = verify_installed_files(pkg);
        for problem in &problems {
            self.services.ui.warn(problem);
        }
        self.services.ui.log(&format!(
            "Post-install sanity check {}.",
            if problems.is_empty() { "passed" } else { "failed" }
        ));

        self.services
            .probe
            .check_sysvipc()
            .tool_context("System V IPC check failed")?;
        self.services
            .probe
            .check_runtime_configuration(pkg)
            .tool_context("Runtime configuration check failed")
    }

    fn xconfig_offered(&self) -> bool {
        !self.options.kernel_module_only && !self.options.no_nvidia_xconfig_question
    }

    /// Offer to run nvidia-xconfig; `Ok(true)` if it updated the X configuration
    fn run_xconfig(&mut self) -> crate::error::Result<bool> {
        let offered = self.xconfig_offered();
        let default = self.options.run_nvidia_xconfig;
        let Services { ui, xconfig, .. } = &mut self.services;
        if offered
            && xconfig.is_available()
            && ui.yes_no(
                default,
                "Would you like to run the nvidia-xconfig utility to automatically update your \
                 X configuration file so that the NVIDIA X driver will be used when you restart \
                 X?  Any pre-existing X configuration file will be backed up.",
            )
        {
            xconfig
                .run()
                .tool_context("nvidia-xconfig failed to update your X configuration file")?;
            return Ok(true);
        }
        Ok(false)
    }

    fn finish(&mut self, pkg: &Package, xconfig_updated: bool) {
        let opts = self.options;
        let offered = self.xconfig_offered();
        let Services { ui, probe, .. } = &mut self.services;

        if !offered {
            ui.message(&format!(
                "Installation of the kernel module for the {} (version {}) is now complete.",
                pkg.description, pkg.version
            ));
            return;
        }

        if xconfig_updated {
            ui.message(&format!(
                "Your X configuration file has been successfully updated.  Installation of the \
                 {} (version: {}) is now complete.",
                pkg.description, pkg.version
            ));
        } else {
            let distro = opts.distro.unwrap_or_else(|| probe.distro());
            let guidance = if distro.uses_sax2() {
                SUSE_EDIT_YOUR_X_CONFIG
            } else {
                EDIT_YOUR_X_CONFIG
            };
            ui.message(&format!(
                "Installation of the {} (version: {}) is now complete.  {}",
                pkg.description, pkg.version, guidance
            ));
        }
    }
}

/// Ask for each installation prefix, keeping the current value on an empty answer
fn prompt_prefixes(ui: &mut dyn crate::services::Ui, prefixes: &mut Prefixes) {
    let fields = [
        ("X installation prefix", &mut prefixes.x),
        ("OpenGL installation prefix", &mut prefixes.opengl),
        (
            "32-bit compatibility installation prefix",
            &mut prefixes.compat32,
        ),
        ("utility installation prefix", &mut prefixes.utility),
        ("documentation installation prefix", &mut prefixes.documentation),
    ];
    for (label, value) in fields {
        let answer = ui.get_input(&value.to_string_lossy(), label);
        let answer = answer.trim();
        if !answer.is_empty() {
            *value = answer.into();
        }
    }
}

/// Check every installed entry: symlinks point at their target, files exist
/// with the expected permissions. Returns one message per problem.
pub fn verify_installed_files(pkg: &Package) -> Vec<String> {
    let mut problems = Vec::new();

    for entry in pkg.entries() {
        let Some(dst) = entry.dst() else {
            continue;
        };

        if let Some(target) = entry.target() {
            match fs::read_link(dst) {
                Ok(actual) if actual == Path::new(target) => {}
                Ok(actual) => problems.push(format!(
                    "The symbolic link '{}' points to '{}' instead of '{}'.",
                    dst.display(),
                    actual.display(),
                    target
                )),
                Err(e) => problems.push(format!(
                    "The symbolic link '{}' is missing: {}.",
                    dst.display(),
                    e
                )),
            }
            continue;
        }

        match fs::metadata(dst) {
            Ok(meta) if !meta.is_file() => {
                problems.push(format!("'{}' is not a regular file.", dst.display()))
            }
            Ok(meta) => {
                let mode = meta.permissions().mode() & 0o7777;
                if mode != entry.mode() {
                    problems.push(format!(
                        "The file '{}' has permissions {:04o} instead of {:04o}.",
                        dst.display(),
                        mode,
                        entry.mode()
                    ));
                }
            }
            Err(e) => problems.push(format!(
                "The file '{}' is missing: {}.",
                dst.display(),
                e
            )),
        }
    }

    problems
}
