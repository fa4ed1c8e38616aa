//! drvinst Library
//!
//! Core of a manifest-driven GPU driver installer: parses a driver package's
//! `.manifest`, obtains a kernel module for the target kernel and walks the
//! installation through its stages. Everything outside the process goes
//! through the traits in [`services`]; [`system`] implements them for a real
//! host.

pub mod cli;
pub mod destinations;
pub mod error;
pub mod install;
pub mod kernel;
pub mod logging;
pub mod manifest;
pub mod options;
pub mod package;
pub mod process;
pub mod selection;
pub mod services;
pub mod system;

// Re-export main types for convenience
pub use error::{InstallerError, ToolResultExt};
pub use install::{InstallOutcome, Installer, Severity, Stage};
pub use manifest::{ManifestError, load, parse};
pub use options::{Distro, Options, Prefixes};
pub use package::{Arch, EntryKind, Package, PackageEntry, TlsClass, TypeTag};
pub use process::{ChildRegistry, CommandProcessGroup, HostCommand};
pub use services::{CommandList, InstallCommand, Services};
