//! drvinst - Main entry point

use anyhow::{Result, bail};
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, info, warn};

use drvinst::cli::{Cli, Commands};
use drvinst::services::CommandEngine;
use drvinst::system::{self, BACKUP_DIR, FileCommandEngine, LOG_TARGET};
use drvinst::{Installer, Options, kernel, logging, manifest, process};

fn require_root() -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        bail!("drvinst must be run as root");
    }
    Ok(())
}

fn install(options: &Options) -> Result<ExitCode> {
    require_root()?;
    let mut installer = Installer::new(options, system::host_services(options));
    let outcome = installer.run();
    debug!("Stages run: {:?}", installer.stage_history());
    Ok(ExitCode::from(outcome.exit_code() as u8))
}

fn add_this_kernel(options: &Options) -> Result<ExitCode> {
    let pkg = manifest::load(&options.package_dir)?;
    let mut services = system::host_services(options);
    kernel::add_this_kernel(
        &pkg,
        options,
        &mut *services.ui,
        &mut *services.kernel,
        &*services.probe,
    )?;
    Ok(ExitCode::SUCCESS)
}

fn check_manifest(dir: &Path) -> Result<ExitCode> {
    let pkg = manifest::load(dir)?;

    println!("{} ({})", pkg.description, pkg.version);
    println!("  kernel module:      {}", pkg.kernel_module_name);
    println!("  kernel interface:   {}", pkg.kernel_interface_filename);
    println!("  build directory:    {}", pkg.kernel_module_build_directory);
    println!("  precompiled:        {}", pkg.precompiled_kernel_interface_directory);
    if !pkg.bad_modules.is_empty() {
        println!("  conflicting modules: {}", pkg.bad_modules.join(" "));
    }
    println!("  {} entries:", pkg.num_entries());

    let mut counts: Vec<(&str, usize)> = Vec::new();
    for entry in pkg.entries() {
        let name = entry.kind().type_name();
        match counts.iter_mut().find(|(n, _)| *n == name) {
            Some((_, count)) => *count += 1,
            None => counts.push((name, 1)),
        }
    }
    for (name, count) in counts {
        println!("    {:<28} {}", name, count);
    }
    Ok(ExitCode::SUCCESS)
}

fn uninstall() -> Result<ExitCode> {
    require_root()?;
    FileCommandEngine::new(BACKUP_DIR).uninstall_existing()?;
    println!("The driver has been uninstalled.");
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let mut options = match cli.options().and_then(|options| {
        options.validate()?;
        Ok(options)
    }) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&mut options) {
        eprintln!("WARNING: {:#}", e);
    }
    info!("drvinst {} starting up", env!("CARGO_PKG_VERSION"));

    // Terminate build and hook children if we are interrupted
    if let Err(e) = process::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let result = match cli.command.unwrap_or(Commands::Install) {
        Commands::Install => install(&options),
        Commands::AddThisKernel => add_this_kernel(&options),
        Commands::CheckManifest { dir } => {
            check_manifest(dir.as_deref().unwrap_or(&options.package_dir))
        }
        Commands::Uninstall => uninstall(),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(target: LOG_TARGET, "{:#}", e);
            eprintln!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
