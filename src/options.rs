//! Installer options
//!
//! `Options` is built once (JSON config file, then command-line flags) and is
//! read-only for the rest of the run. Anything an install decides along the way
//! lives in the install context instead.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString};

use crate::error::InstallerError;

/// Default installer log
pub const DEFAULT_LOG_FILE: &str = "/var/log/nvidia-installer.log";

/// Linux distribution family, for distro-specific guidance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Distro {
    Suse,
    #[strum(serialize = "unitedlinux")]
    #[serde(rename = "unitedlinux")]
    UnitedLinux,
    Debian,
    #[default]
    Other,
}

impl Distro {
    /// SuSE-style X configuration (SaX2) applies
    pub fn uses_sax2(self) -> bool {
        matches!(self, Self::Suse | Self::UnitedLinux)
    }
}

/// Installation prefixes. All of them must be absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prefixes {
    pub x: PathBuf,
    pub opengl: PathBuf,
    pub compat32: PathBuf,
    /// Library directory under `compat32`, e.g. `lib32`
    pub compat32_libdir: String,
    pub utility: PathBuf,
    pub documentation: PathBuf,
    /// Where the installer itself goes; `utility` when unset
    pub installer: Option<PathBuf>,
    pub module_source: PathBuf,
}

impl Default for Prefixes {
    fn default() -> Self {
        Self {
            x: PathBuf::from("/usr"),
            opengl: PathBuf::from("/usr"),
            compat32: PathBuf::from("/usr"),
            compat32_libdir: "lib32".to_string(),
            utility: PathBuf::from("/usr"),
            documentation: PathBuf::from("/usr"),
            installer: None,
            module_source: PathBuf::from("/usr/src"),
        }
    }
}

impl Prefixes {
    /// Labelled prefixes, in prompt order
    pub fn labelled(&self) -> Vec<(&'static str, &Path)> {
        let mut all = vec![
            ("X installation prefix", self.x.as_path()),
            ("OpenGL installation prefix", self.opengl.as_path()),
            ("32-bit compatibility installation prefix", self.compat32.as_path()),
            ("utility installation prefix", self.utility.as_path()),
            ("documentation installation prefix", self.documentation.as_path()),
            ("kernel module source installation prefix", self.module_source.as_path()),
        ];
        if let Some(installer) = &self.installer {
            all.push(("installer installation prefix", installer.as_path()));
        }
        all
    }

    /// Reject relative prefixes and a compat32 libdir that escapes its prefix
    pub fn validate(&self) -> Result<(), InstallerError> {
        for (label, path) in self.labelled() {
            if !path.is_absolute() {
                return Err(InstallerError::invalid_path(format!(
                    "the {} '{}' is not an absolute path",
                    label,
                    path.display()
                )));
            }
        }
        let libdir = Path::new(&self.compat32_libdir);
        if self.compat32_libdir.is_empty() || libdir.is_absolute() {
            return Err(InstallerError::invalid_path(format!(
                "the 32-bit compatibility library directory '{}' must be a relative path",
                self.compat32_libdir
            )));
        }
        Ok(())
    }

    pub fn installer_prefix(&self) -> &Path {
        self.installer.as_deref().unwrap_or(&self.utility)
    }
}

/// Immutable snapshot of everything the user asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub accept_license: bool,
    /// Ask about details normally decided automatically
    pub expert: bool,
    /// Take the default answer for every question
    pub no_questions: bool,
    /// Print errors only
    pub silent: bool,
    pub kernel_module_only: bool,
    pub no_kernel_module: bool,
    pub no_kernel_module_source: bool,
    /// Default answer for the DKMS registration question
    pub dkms: bool,
    pub no_opengl_files: bool,
    pub opengl_headers: bool,
    pub no_x_check: bool,
    pub no_nouveau_check: bool,
    pub no_nvidia_xconfig_question: bool,
    pub run_nvidia_xconfig: bool,
    pub ignore_cc_version_check: bool,
    pub no_precompiled_interface: bool,
    /// Build for this kernel instead of the running one
    pub kernel_name: Option<String>,
    pub kernel_module_installation_path: Option<PathBuf>,
    pub kernel_source_path: Option<PathBuf>,
    pub prefixes: Prefixes,
    /// `None` disables logging
    pub log_file: Option<PathBuf>,
    /// Detected from the running system when unset
    pub distro: Option<Distro>,
    /// Extracted package directory holding `.manifest`
    pub package_dir: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            accept_license: false,
            expert: false,
            no_questions: false,
            silent: false,
            kernel_module_only: false,
            no_kernel_module: false,
            no_kernel_module_source: false,
            dkms: false,
            no_opengl_files: false,
            opengl_headers: false,
            no_x_check: false,
            no_nouveau_check: false,
            no_nvidia_xconfig_question: false,
            run_nvidia_xconfig: false,
            ignore_cc_version_check: false,
            no_precompiled_interface: false,
            kernel_name: None,
            kernel_module_installation_path: None,
            kernel_source_path: None,
            prefixes: Prefixes::default(),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            distro: None,
            package_dir: PathBuf::from("."),
        }
    }
}

impl Options {
    /// Load options from a JSON file. Missing fields keep their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let options: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(options)
    }

    pub fn validate(&self) -> Result<(), InstallerError> {
        self.prefixes.validate()?;

        if let Some(path) = &self.kernel_module_installation_path {
            if !path.is_absolute() {
                return Err(InstallerError::invalid_path(format!(
                    "kernel module installation path '{}' is not absolute",
                    path.display()
                )));
            }
        }
        if self.kernel_module_only && self.no_kernel_module {
            return Err(InstallerError::invalid_path(
                "kernel-module-only and no-kernel-module cannot be combined",
            ));
        }
        Ok(())
    }

    /// Installing a kernel module for a kernel other than the running one
    pub fn targets_other_kernel(&self, running: &str) -> bool {
        self.kernel_name.as_deref().is_some_and(|name| name != running)
    }
}
