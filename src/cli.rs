use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::options::{Distro, Options};

/// drvinst - install a GPU driver package
#[derive(Parser, Debug)]
#[command(name = "drvinst")]
#[command(about = "Install a GPU driver package from its extracted package directory")]
#[command(version)]
pub struct Cli {
    /// JSON file with installer options; command line flags override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub flags: InstallFlags,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Install the driver (the default)
    Install,
    /// Build a kernel interface for the target kernel and add it to the
    /// package's precompiled interfaces
    AddThisKernel,
    /// Parse a package manifest and print a summary
    CheckManifest {
        /// Package directory (defaults to --package-dir)
        dir: Option<PathBuf>,
    },
    /// Remove the currently installed driver using its backup log
    Uninstall,
}

#[derive(Args, Debug, Default, Clone)]
pub struct InstallFlags {
    /// Extracted package directory containing `.manifest`
    #[arg(long, global = true)]
    pub package_dir: Option<PathBuf>,

    /// Accept the license without showing it
    #[arg(short = 'a', long, global = true)]
    pub accept_license: bool,

    /// Ask about details normally decided automatically
    #[arg(short = 'e', long, global = true)]
    pub expert: bool,

    /// Take the default answer for every question (except the license)
    #[arg(short = 'q', long, global = true)]
    pub no_questions: bool,

    /// Print errors only; implies --no-questions and --accept-license
    #[arg(short = 's', long, global = true)]
    pub silent: bool,

    /// Only install the kernel module
    #[arg(short = 'K', long, global = true, conflicts_with = "no_kernel_module")]
    pub kernel_module_only: bool,

    /// Install everything except the kernel module
    #[arg(long, global = true)]
    pub no_kernel_module: bool,

    /// Do not install the kernel module sources
    #[arg(long, global = true)]
    pub no_kernel_module_source: bool,

    /// Register the kernel module sources with DKMS by default
    #[arg(long, global = true)]
    pub dkms: bool,

    #[arg(long, global = true)]
    pub no_opengl_files: bool,

    #[arg(long, global = true)]
    pub opengl_headers: bool,

    /// Do not check for a running X server
    #[arg(long, global = true)]
    pub no_x_check: bool,

    /// Do not check for a loaded nouveau module
    #[arg(long, global = true)]
    pub no_nouveau_check: bool,

    #[arg(long, global = true)]
    pub no_nvidia_xconfig_question: bool,

    /// Run nvidia-xconfig by default at the end of the installation
    #[arg(long, global = true)]
    pub run_nvidia_xconfig: bool,

    /// Build the kernel module even if the compiler differs from the kernel's
    #[arg(long = "no-cc-version-check", global = true)]
    pub ignore_cc_version_check: bool,

    /// Always build the kernel interface from source
    #[arg(short = 'n', long, global = true)]
    pub no_precompiled_interface: bool,

    /// Install for this kernel release instead of the running one
    #[arg(short = 'k', long, global = true)]
    pub kernel_name: Option<String>,

    #[arg(long, global = true)]
    pub kernel_install_path: Option<PathBuf>,

    #[arg(long, global = true)]
    pub kernel_source_path: Option<PathBuf>,

    #[arg(long, global = true)]
    pub x_prefix: Option<PathBuf>,

    #[arg(long, global = true)]
    pub opengl_prefix: Option<PathBuf>,

    #[arg(long, global = true)]
    pub compat32_prefix: Option<PathBuf>,

    /// Library directory below the 32-bit compatibility prefix
    #[arg(long, global = true)]
    pub compat32_libdir: Option<String>,

    #[arg(long, global = true)]
    pub utility_prefix: Option<PathBuf>,

    #[arg(long, global = true)]
    pub documentation_prefix: Option<PathBuf>,

    #[arg(long, global = true)]
    pub installer_prefix: Option<PathBuf>,

    #[arg(long, global = true)]
    pub module_source_prefix: Option<PathBuf>,

    #[arg(short = 'l', long, global = true, conflicts_with = "no_log")]
    pub log_file_name: Option<PathBuf>,

    /// Do not write a log file
    #[arg(long, global = true)]
    pub no_log: bool,

    /// Distribution-specific behavior (suse, unitedlinux, debian, other)
    #[arg(long, global = true)]
    pub distro: Option<Distro>,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Options from `--config` (or defaults) with the command line flags applied
    pub fn options(&self) -> Result<Options> {
        let base = match &self.config {
            Some(path) => Options::load_from_file(path)?,
            None => Options::default(),
        };
        Ok(self.flags.apply(base))
    }
}

impl InstallFlags {
    /// Overlay the flags on `options`. Switches only ever turn things on.
    pub fn apply(&self, mut options: Options) -> Options {
        let f = self;

        options.accept_license |= f.accept_license || f.silent;
        options.expert |= f.expert;
        options.no_questions |= f.no_questions || f.silent;
        options.silent |= f.silent;
        options.kernel_module_only |= f.kernel_module_only;
        options.no_kernel_module |= f.no_kernel_module;
        options.no_kernel_module_source |= f.no_kernel_module_source;
        options.dkms |= f.dkms;
        options.no_opengl_files |= f.no_opengl_files;
        options.opengl_headers |= f.opengl_headers;
        options.no_x_check |= f.no_x_check;
        options.no_nouveau_check |= f.no_nouveau_check;
        options.no_nvidia_xconfig_question |= f.no_nvidia_xconfig_question;
        options.run_nvidia_xconfig |= f.run_nvidia_xconfig;
        options.ignore_cc_version_check |= f.ignore_cc_version_check;
        options.no_precompiled_interface |= f.no_precompiled_interface;

        if let Some(name) = &f.kernel_name {
            options.kernel_name = Some(name.clone());
            // Precompiled interfaces are only matched against the running kernel
            options.no_precompiled_interface = true;
        }
        overlay(&mut options.kernel_module_installation_path, &f.kernel_install_path);
        overlay(&mut options.kernel_source_path, &f.kernel_source_path);

        let prefixes = &mut options.prefixes;
        set(&mut prefixes.x, &f.x_prefix);
        set(&mut prefixes.opengl, &f.opengl_prefix);
        set(&mut prefixes.compat32, &f.compat32_prefix);
        set(&mut prefixes.compat32_libdir, &f.compat32_libdir);
        set(&mut prefixes.utility, &f.utility_prefix);
        set(&mut prefixes.documentation, &f.documentation_prefix);
        set(&mut prefixes.module_source, &f.module_source_prefix);
        overlay(&mut prefixes.installer, &f.installer_prefix);

        if f.no_log {
            options.log_file = None;
        } else {
            overlay(&mut options.log_file, &f.log_file_name);
        }
        overlay(&mut options.distro, &f.distro);
        set(&mut options.package_dir, &f.package_dir);

        options
    }
}

fn set<T: Clone>(field: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *field = value.clone();
    }
}

fn overlay<T: Clone>(field: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        field.clone_from(value);
    }
}
