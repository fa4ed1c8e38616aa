//! Error handling module for drvinst
//!
//! Provides the stage-failure error type used by the install pipeline.
//! Manifest parsing has its own narrower type in [`crate::manifest`], which
//! converts into this one.

use std::path::PathBuf;
use thiserror::Error;

use crate::manifest::ManifestError;

/// Main error type for the installer core
#[derive(Error, Debug)]
pub enum InstallerError {
    /// The package manifest could not be loaded or parsed
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// IO errors (generated files, installed file checks)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A display server lock file is present
    #[error("an X server appears to be running (lock file '{}' exists); please exit X before installing", lock_file.display())]
    DisplayServerRunning { lock_file: PathBuf },

    /// A module that must be replaced is still loaded after an unload attempt
    #[error("kernel module '{module}' appears to already be loaded in your kernel")]
    ModuleStillLoaded { module: String },

    /// The open-source driver module is active
    #[error("the '{module}' kernel module is loaded and in use; it must be disabled before installing")]
    CompetingDriverLoaded { module: String },

    /// The user chose to stop after a failing pre-install hook
    #[error("the distribution-provided pre-install script failed")]
    PreInstallHookFailed,

    /// A development tool is missing from PATH
    #[error("unable to find the development tool `{tool}` in your PATH; please install the '{package}' package")]
    MissingBuildTool { tool: String, package: String },

    /// The user aborted after a compiler/kernel mismatch
    #[error("the CC version check failed: {0}")]
    CompilerMismatch(String),

    /// Invalid installation prefix or destination
    #[error("invalid installation path: {0}")]
    InvalidPath(String),

    /// Kernel module acquisition failures
    #[error("kernel module error: {0}")]
    KernelModule(String),

    /// A stage's external collaborator failed
    #[error("{context}: {source}")]
    Tool {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Result type alias for installer operations
pub type Result<T> = std::result::Result<T, InstallerError>;

// Convenient error constructors
impl InstallerError {
    /// Wrap a collaborator failure with the action being attempted
    pub fn tool(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Tool {
            context: context.into(),
            source,
        }
    }

    /// Create an invalid path error
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    /// Create a kernel module error
    pub fn kernel_module(msg: impl Into<String>) -> Self {
        Self::KernelModule(msg.into())
    }
}

/// Attach context to collaborator results
pub trait ToolResultExt<T> {
    fn tool_context(self, context: &str) -> Result<T>;
}

impl<T> ToolResultExt<T> for anyhow::Result<T> {
    fn tool_context(self, context: &str) -> Result<T> {
        self.map_err(|e| InstallerError::tool(context, e))
    }
}
