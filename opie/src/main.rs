mod logging;

use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use opie_core::{BackupFile, Config, DeviceLocator, LocatorEvent, MetadataStore};
use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

#[derive(Parser)]
#[command(name = "opie")]
#[command(about = "Back up, verify and restore your OP-1", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding backups (defaults to ~/opie/backups)
    #[arg(long, global = true)]
    backups_dir: Option<PathBuf>,

    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

/// Each variant is one command; its doc comment is the description shown in
/// `--help`.
#[derive(Subcommand)]
enum Commands {
    /// Performs a full backup of your device
    Backup,
    /// Verify the integrity of a backup file
    ///
    /// The result is recorded in the backups directory's metadata whether or
    /// not the backup passes. A backup with structural issues still exits
    /// with status 1.
    Verify {
        /// Backup to verify (prompts for one if omitted)
        backup: Option<PathBuf>,
    },
    /// Choose a backup file and restore it to a plugged-in OP-1
    Restore {
        /// Backup to restore (prompts for one if omitted)
        backup: Option<PathBuf>,

        /// Do not ask before overwriting the device
        #[arg(short = 'y', long)]
        yes: bool,

        /// Restore even if the backup fails verification
        #[arg(long)]
        force: bool,
    },
    /// List backups and their last verification
    List,
    /// Print where the OP-1 is mounted
    Locate,
}

/// A helper struct that, on Unix, disables `ECHOCTL` for the terminal.
///
/// `ECHOCTL` is the terminal flag that causes Ctrl+C to be printed as `^C`.
/// With it off, cancelling a wait prints only our own message.
/// The original terminal state is restored when this struct is dropped.
struct TermRestorer {
    #[cfg(unix)]
    original_termios: Option<Termios>,
}

impl TermRestorer {
    fn new() -> Self {
        #[cfg(unix)]
        {
            Self {
                original_termios: Self::disable_echoctl(),
            }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    #[cfg(unix)]
    fn disable_echoctl() -> Option<Termios> {
        if !stdout().is_terminal() {
            return None;
        }
        let fd = stdout().as_raw_fd();
        let original = Termios::from_fd(fd).ok()?;
        let mut quiet = original;
        quiet.c_lflag &= !ECHOCTL;
        tcsetattr(fd, TCSANOW, &quiet).ok()?;
        Some(original)
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(ref original_termios) = self.original_termios {
            tcsetattr(stdout().as_raw_fd(), TCSANOW, original_termios).ok();
        }
    }
}

fn bar_style(color: &str, counter: &str) -> Result<ProgressStyle> {
    let template =
        format!("{{prefix:12}} [{{elapsed_precise}}] [{{bar:40.{color}/black}}] {counter}");
    Ok(ProgressStyle::default_bar()
        .template(&template)?
        .progress_chars("■ "))
}

/// Presents an interactive menu for the user to select a backup.
///
/// Returns `None` when there is nothing to choose from.
fn select_backup(dir: &Path, prompt: &str) -> Result<Option<PathBuf>> {
    let backups = opie_core::list_backups(dir)?;
    if backups.is_empty() {
        println!("No backups found in {}", style(dir.display()).cyan());
        println!("Please create a backup first using the 'backup' command.");
        return Ok(None);
    }

    let items: Vec<String> = backups.iter().map(BackupFile::to_string).collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .interact()?;

    Ok(Some(backups[selection].path.clone()))
}

/// Presents a final "Yes/No" confirmation to the user.
fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmation)
}

/// Waits for the OP-1 and returns its mount point.
///
/// `None` means the user interrupted the wait, which is not an error.
fn locate_device(config: &Config, running: Arc<AtomicBool>) -> Result<Option<PathBuf>> {
    let locator = DeviceLocator::new(config, running);
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);

    let result = locator.ensure_device_mount(|event| match event {
        LocatorEvent::WaitingForConnection => {
            spinner.set_message("Waiting for OP-1 to connect in disk mode (shift+COM -> 3)...");
            spinner.tick();
        }
        LocatorEvent::Connected => spinner.set_message("OP-1 connected!"),
        LocatorEvent::WaitingForMount { attempt, attempts } => {
            spinner.set_message(format!("Checking for OP-1 mount ({attempt}/{attempts})..."));
            spinner.tick();
        }
        LocatorEvent::Found(_) => {}
        LocatorEvent::TimedOut => spinner.set_message("Timed out waiting for mount."),
    });
    spinner.finish_and_clear();

    match result {
        Ok(mount) => {
            println!("OP-1 found at {}", style(mount.display()).cyan());
            Ok(Some(mount))
        }
        Err(e) if e.is_cancelled() => {
            println!("\nOperation cancelled by user");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn run_backup(config: &Config, running: Arc<AtomicBool>) -> Result<()> {
    config.ensure_dirs()?;

    let Some(mount) = locate_device(config, running.clone())? else {
        return Ok(());
    };

    println!();
    let pb = ProgressBar::new(0);
    pb.set_prefix("Backing up");
    pb.set_style(bar_style("green", "{pos}/{len} items ({eta})")?);

    let result = opie_core::create_archive(&mount, &config.backups_dir, running, |p| {
        pb.set_length(p.total);
        pb.set_position(p.processed);
    });

    match result {
        Ok(archive) => {
            pb.finish_with_message("Backup complete.");
            println!(
                "\n✨ Backup completed successfully. Archive saved at: {}",
                style(archive.display()).cyan()
            );
            Ok(())
        }
        Err(e) => {
            pb.finish_with_message("❌ Operation failed.");
            Err(e.into())
        }
    }
}

fn run_verify(config: &Config, running: Arc<AtomicBool>, backup: Option<PathBuf>) -> Result<()> {
    let path = match backup {
        Some(path) => path,
        None => match select_backup(&config.backups_dir, "Choose a backup to verify")? {
            Some(path) => path,
            None => return Ok(()),
        },
    };
    opie_core::check_backup_file(&path)?;

    let name = path.file_name().unwrap_or_default().to_string_lossy();
    println!("\nVerifying backup: {}", style(&name).cyan());

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Checking structure and calculating checksum...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let report = opie_core::verify_archive(&path, running);
    spinner.finish_and_clear();
    let report = match report {
        Ok(report) => report,
        Err(e) if e.is_cancelled() => {
            println!("\nOperation cancelled by user");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    // Recorded whichever way verification went.
    let mut store = MetadataStore::open(&config.backups_dir);
    opie_core::record_verification(&mut store, &path, &report);

    if !report.structurally_valid {
        println!("\n{} Backup verification failed!", style("✗").red().bold());
        for issue in &report.issues {
            println!(" - {issue}");
        }
        bail!("{name} is not a complete OP-1 backup");
    }

    println!(
        "\n{} Backup verification successful!",
        style("✓").green().bold()
    );
    println!("Backup size: {:.1}MB", report.size_bytes as f64 / (1024.0 * 1024.0));
    println!("SHA-256: {}", report.digest);
    println!("Verified: {}", report.verified_at.to_rfc3339());
    Ok(())
}

fn run_restore(
    config: &Config,
    running: Arc<AtomicBool>,
    backup: Option<PathBuf>,
    yes: bool,
    force: bool,
) -> Result<()> {
    let path = match backup {
        Some(path) => path,
        None => match select_backup(&config.backups_dir, "Choose a backup to restore")? {
            Some(path) => path,
            None => return Ok(()),
        },
    };
    opie_core::check_backup_file(&path)?;

    println!("\nVerifying backup integrity...");
    let structure = opie_core::verify_structure(&path);
    if structure.valid {
        println!("{} Backup verification passed!", style("✓").green().bold());
    } else {
        println!("\n{} Backup verification failed!", style("✗").red().bold());
        for issue in &structure.issues {
            println!(" - {issue}");
        }
        if !force
            && !confirm_operation(
                "This backup may be corrupted or incomplete. Proceed with restoration anyway?",
            )?
        {
            println!("Operation cancelled.");
            return Ok(());
        }
        println!("\nProceeding with restoration despite verification warnings...");
    }

    println!("\nConnecting to OP-1...");
    let Some(mount) = locate_device(config, running.clone())? else {
        return Ok(());
    };

    println!(
        "{} This will overwrite data on your OP-1 at {}.",
        style("WARNING:").red().bold(),
        style(mount.display()).cyan()
    );
    if !yes && !confirm_operation("Are you sure you want to proceed?")? {
        println!("Operation cancelled.");
        return Ok(());
    }

    println!();
    let pb = ProgressBar::new(100);
    pb.set_prefix("Restoring");
    pb.set_style(bar_style("magenta", "{pos}%")?);

    let result = opie_core::restore_archive(&path, &mount, running, |p| {
        pb.set_position(u64::from(p.percent()));
    });

    match result {
        Ok(()) => {
            pb.finish_with_message("Restore complete.");
            println!("\n✨ Restore completed successfully!");
            println!("Please safely eject your OP-1 before unplugging it.");
            Ok(())
        }
        Err(e) => {
            pb.finish_with_message("❌ Operation failed.");
            Err(anyhow!(e).context("Restore failed. Please try again with a fresh backup"))
        }
    }
}

fn run_list(config: &Config) -> Result<()> {
    let backups = opie_core::list_backups(&config.backups_dir)?;
    if backups.is_empty() {
        println!(
            "No backups found in {}",
            style(config.backups_dir.display()).cyan()
        );
        return Ok(());
    }

    let store = MetadataStore::open(&config.backups_dir);
    println!(
        "Found {} backups in {}:",
        backups.len(),
        style(config.backups_dir.display()).cyan()
    );
    println!(
        "\n  {:<38} {:>10}  {:<16}  {}",
        "NAME", "SIZE", "MODIFIED", "VERIFIED"
    );
    println!("  {:-<38} {:->10}  {:-<16}  {:-<20}", "", "", "", "");
    for backup in &backups {
        let verified = match store.get(&backup.name()) {
            Some(m) if m.structure_verified => {
                format!("✓ {}", m.last_verified.format("%Y-%m-%d %H:%M"))
            }
            Some(m) => format!("✗ {}", m.last_verified.format("%Y-%m-%d %H:%M")),
            None => "never".to_string(),
        };
        println!(
            "  {:<38} {:>8.1}MB  {:<16}  {}",
            backup.name(),
            backup.size_mb(),
            backup.modified.format("%Y-%m-%d %H:%M"),
            verified
        );
    }
    Ok(())
}

fn run_locate(config: &Config, running: Arc<AtomicBool>) -> Result<()> {
    locate_device(config, running)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(logging::LogConfig {
        json: cli.log_json,
        verbose: cli.verbose,
    });

    // This guard will be dropped when main() exits, restoring the terminal.
    let _term_restorer = TermRestorer::new();

    // This flag allows for graceful cancellation of waits and transfers.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    // Set up the Ctrl+C handler to toggle the `running` flag.
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut config = Config::resolve()?;
    if let Some(dir) = cli.backups_dir {
        config = config.with_backups_dir(dir);
    }
    tracing::debug!(
        home = %config.home.display(),
        backups_dir = %config.backups_dir.display(),
        "resolved configuration"
    );

    match cli.command {
        Commands::Backup => run_backup(&config, running),
        Commands::Verify { backup } => run_verify(&config, running, backup),
        Commands::Restore {
            backup,
            yes,
            force,
        } => run_restore(&config, running, backup, yes, force),
        Commands::List => run_list(&config),
        Commands::Locate => run_locate(&config, running),
    }
}
