//! Host implementations of the collaborator traits
//!
//! [`host_services`] wires them together for a real installation.

pub mod files;
pub mod kernel;
pub mod legacy;
pub mod probe;
pub mod tools;
pub mod ui;

use std::io;

use crate::options::Options;
use crate::services::Services;

pub use files::{BackupDir, FileCommandEngine};
pub use kernel::HostKernelTools;
pub use probe::HostProbe;
pub use tools::{Dkms, NvidiaXConfig, ScriptHooks};
pub use ui::{LOG_TARGET, StreamUi, UiMode};

/// Where the backup log and saved files live
pub const BACKUP_DIR: &str = "/var/lib/nvidia";

/// Backup log of the installed driver; its first line is the version
pub const BACKUP_LOG: &str = "/var/lib/nvidia/log";

/// Distribution hook scripts, one file per hook
pub const HOOK_DIR: &str = "/usr/lib/nvidia";

/// Collaborators for installing on this machine, prompting on stdin/stdout
pub fn host_services(options: &Options) -> Services {
    let mode = UiMode {
        no_questions: options.no_questions,
        silent: options.silent,
        expert: options.expert,
    };
    let probe = HostProbe::new();

    Services {
        ui: Box::new(StreamUi::new(io::stdin().lock(), io::stdout(), mode)),
        probe: Box::new(probe.clone()),
        hooks: Box::new(ScriptHooks::new(HOOK_DIR)),
        kernel: Box::new(HostKernelTools::new(probe.clone())),
        engine: Box::new(FileCommandEngine::new(BACKUP_DIR)),
        backup: Box::new(BackupDir::new(BACKUP_DIR)),
        dkms: Box::new(Dkms::new(probe.clone())),
        xconfig: Box::new(NvidiaXConfig::new(probe)),
    }
}
