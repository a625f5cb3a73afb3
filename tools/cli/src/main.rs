//! pdvbackup CLI - back up and restore the POS database to Google Drive.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use pdvbackup_storage::{
    timestamped_name, BackupClient, ClientConfig, DuplicatePolicy, Progress, DEFAULT_FOLDER,
};

#[derive(Parser)]
#[command(name = "pdvbackup")]
#[command(about = "pdvbackup - Google Drive backups for the POS database")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: <config dir>/pdvbackup/config.json if present).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage root for relative paths and credential files.
    #[arg(short, long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file into a Drive folder.
    Backup {
        /// Local file to upload.
        file: PathBuf,

        /// Remote folder name.
        #[arg(short, long, default_value = DEFAULT_FOLDER)]
        folder: String,

        /// Remote file name (default: the file's basename).
        #[arg(short, long, conflicts_with = "timestamped")]
        name: Option<String>,

        /// Name the backup <stem>_backup_<date_time>.<ext>.
        #[arg(short, long)]
        timestamped: bool,

        /// Replace a same-named file in the folder instead of adding another.
        #[arg(long)]
        overwrite: bool,
    },

    /// Download a backup to a local path.
    Restore {
        /// Local destination path.
        dest: PathBuf,

        /// Remote file name.
        #[arg(required_unless_present = "latest", conflicts_with = "latest")]
        name: Option<String>,

        /// Restore the newest file whose name starts with this prefix.
        #[arg(short, long)]
        latest: Option<String>,

        /// Remote folder name.
        #[arg(short, long, default_value = DEFAULT_FOLDER)]
        folder: String,
    },

    /// List files in a Drive folder, newest first.
    List {
        /// Remote folder name.
        #[arg(short, long, default_value = DEFAULT_FOLDER)]
        folder: String,
    },

    /// Verify the stored credentials against the server.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = load_config(cli.config.as_deref()).await?;
    if let Some(root) = cli.root {
        config.storage_root = root;
    }

    match cli.command {
        Commands::Backup {
            file,
            folder,
            name,
            timestamped,
            overwrite,
        } => {
            if overwrite {
                config.duplicate_policy = DuplicatePolicy::Overwrite;
            }
            let name = if timestamped {
                Some(stamped_name(&file))
            } else {
                name
            };
            cmd_backup(config, &file, &folder, name.as_deref()).await
        }

        Commands::Restore {
            dest,
            name,
            latest,
            folder,
        } => match (latest, name) {
            (Some(prefix), _) => cmd_restore_latest(config, &dest, &prefix, &folder).await,
            (None, Some(name)) => cmd_restore(config, &dest, &name, &folder).await,
            (None, None) => anyhow::bail!("Either a remote name or --latest is required"),
        },

        Commands::List { folder } => cmd_list(config, &folder).await,

        Commands::Check => cmd_check(config).await,
    }
}

/// Load the explicit config file, else the per-user default if it exists.
async fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    if let Some(path) = path {
        return ClientConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display()));
    }

    match dirs::config_dir().map(|d| d.join("pdvbackup").join("config.json")) {
        Some(default) if default.exists() => {
            debug!("Using config {}", default.display());
            ClientConfig::load(&default)
                .await
                .with_context(|| format!("Failed to load config {}", default.display()))
        }
        _ => Ok(ClientConfig::default()),
    }
}

fn stamped_name(file: &Path) -> String {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    let ext = file
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    timestamped_name(&stem, &ext, chrono::Local::now().naive_local())
}

async fn connect(config: ClientConfig) -> Result<BackupClient> {
    let client = BackupClient::connect(config)
        .await
        .context("Failed to create backup client")?;

    if !client.is_authenticated().await {
        anyhow::bail!("Not authenticated. Check credentials.json / token.json in the storage root");
    }
    Ok(client)
}

/// Upload a file.
async fn cmd_backup(
    config: ClientConfig,
    file: &Path,
    folder: &str,
    name: Option<&str>,
) -> Result<()> {
    let client = connect(config).await?;
    info!("Backing up {} to folder '{}'", file.display(), folder);

    let id = client
        .try_backup(file, folder, name)
        .await
        .context("Backup failed")?;

    println!("Backup uploaded!");
    println!("  File ID: {}", id);
    println!("  Folder: {}", folder);

    Ok(())
}

/// Download a named backup.
async fn cmd_restore(config: ClientConfig, dest: &Path, name: &str, folder: &str) -> Result<()> {
    let client = connect(config).await?;
    info!("Restoring '{}' from folder '{}'", name, folder);

    let written = client
        .try_restore(dest, name, folder, report_progress)
        .await
        .context("Restore failed")?;

    println!(
        "Restored {} to {} ({} bytes)",
        name,
        dest.display(),
        written
    );

    Ok(())
}

/// Download the newest backup matching a prefix.
async fn cmd_restore_latest(
    config: ClientConfig,
    dest: &Path,
    prefix: &str,
    folder: &str,
) -> Result<()> {
    let client = connect(config).await?;

    let restored = client
        .try_restore_latest(dest, prefix, folder, report_progress)
        .await
        .context("Restore failed")?;

    println!("Restored {} to {}", restored.name, dest.display());
    if let Some(modified) = restored.modified_time {
        println!("  Modified: {}", modified);
    }

    Ok(())
}

/// List a backup folder.
async fn cmd_list(config: ClientConfig, folder: &str) -> Result<()> {
    let client = connect(config).await?;

    let files = client
        .try_list_files_in_folder(folder)
        .await
        .context("Failed to list folder")?;

    if files.is_empty() {
        println!("Folder is empty.");
    } else {
        println!("Contents of {}:", folder);
        for file in files {
            let size_str = file
                .size
                .map(|s| format!("{} bytes", s))
                .unwrap_or_default();
            let modified = file
                .modified_time
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            println!("  {}  {} ({})  {}", modified, file.name, size_str, file.id);
        }
    }

    Ok(())
}

/// Verify credentials.
async fn cmd_check(config: ClientConfig) -> Result<()> {
    let client = connect(config).await?;

    let about = client.check().await.context("Credential check failed")?;

    println!("Credentials are valid.");
    if let Some(user) = about.user {
        if let Some(name) = user.display_name {
            println!("  User: {}", name);
        }
        if let Some(email) = user.email_address {
            println!("  Email: {}", email);
        }
    }

    Ok(())
}

fn report_progress(progress: Progress) {
    match progress {
        Progress::Percent(p) => debug!("Download {}%", p),
        Progress::Bytes(n) => debug!("Downloaded {} bytes", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_restore_requires_name_or_latest() {
        assert!(Cli::try_parse_from(["pdvbackup", "restore", "out.sqlite"]).is_err());
        assert!(Cli::try_parse_from(["pdvbackup", "restore", "out.sqlite", "snap.sqlite"]).is_ok());
        assert!(
            Cli::try_parse_from(["pdvbackup", "restore", "out.sqlite", "--latest", "pdvDB"]).is_ok()
        );
    }

    #[test]
    fn test_backup_defaults_to_backup_folder() {
        let cli = Cli::try_parse_from(["pdvbackup", "backup", "pdvDB.sqlite"]).unwrap();
        match cli.command {
            Commands::Backup { folder, name, .. } => {
                assert_eq!(folder, DEFAULT_FOLDER);
                assert!(name.is_none());
            }
            _ => panic!("expected backup"),
        }
    }

    #[test]
    fn test_stamped_name_keeps_extension() {
        let name = stamped_name(Path::new("data/pdvDB.sqlite"));
        assert!(name.starts_with("pdvDB_backup_"));
        assert!(name.ends_with(".sqlite"));
    }
}
