use anyhow::Context;
use clap::{Parser, Subcommand};
use objgraph::{BackupArchive, Config, ExportOptions, Exporter, Importer};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Cycle-safe XML backup and restore of object graphs
#[derive(Parser, Debug)]
#[command(name = "objgraph")]
#[command(about = "Inspect, reformat and archive object graph backups", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a backup document and log a summary of its node tree
    Inspect { file: PathBuf },

    /// Import a backup document and write it again with new export options
    Reformat {
        file: PathBuf,

        /// Attribute carrying the node discriminator on output; empty disables it
        #[arg(long)]
        meta_type_key: Option<String>,

        /// Indentation width for pretty output
        #[arg(long)]
        indent: Option<usize>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage compressed backups in a directory
    Archive {
        /// Path to the archive directory
        #[arg(short, long, default_value = "./backups")]
        dir: PathBuf,

        #[command(subcommand)]
        action: ArchiveAction,
    },
}

#[derive(Subcommand, Debug)]
enum ArchiveAction {
    /// List archives, newest first
    List,

    /// Validate a backup document and store it as a new archive
    Store {
        file: PathBuf,

        /// Archive name prefix (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Decompress an archive back into a document
    Restore {
        archive: String,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    match args.command {
        Command::Inspect { file } => inspect(&config, &file),
        Command::Reformat {
            file,
            meta_type_key,
            indent,
            output,
        } => {
            let mut options = config.export.clone();
            if let Some(key) = meta_type_key {
                options.meta_type_key = key;
            }
            if indent.is_some() {
                options.indent = indent;
            }
            reformat(&config, &file, options, output.as_deref())
        }
        Command::Archive { dir, action } => {
            let archive = BackupArchive::new(&dir)?;
            match action {
                ArchiveAction::List => {
                    let entries = archive.list()?;
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                    Ok(())
                }
                ArchiveAction::Store { file, name } => {
                    let document = fs::read(&file)
                        .with_context(|| format!("failed to read {}", file.display()))?;
                    // Refuse to archive something that would not restore.
                    Importer::from_options(&config.export).import(&document)?;
                    let name = match name {
                        Some(name) => name,
                        None => file
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .map(|s| s.trim_end_matches(".xml").to_string())
                            .unwrap_or_else(|| "backup".to_string()),
                    };
                    let entry = archive.create(&name, &document)?;
                    println!("{}", serde_json::to_string_pretty(&entry)?);
                    Ok(())
                }
                ArchiveAction::Restore { archive: file, output } => {
                    let document = archive.load(&file)?;
                    write_output(output.as_deref(), &document)
                }
            }
        }
    }
}

fn inspect(config: &Config, file: &Path) -> anyhow::Result<()> {
    let document =
        fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let node = Importer::from_options(&config.export).import(&document)?;
    let stats = node.stats();

    info!("Root: {} ({})", node.name(), node.class().unwrap_or("-"));
    info!("Tree: {}", stats);
    println!("{}", stats);
    Ok(())
}

fn reformat(
    config: &Config,
    file: &Path,
    options: ExportOptions,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let document =
        fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let node = Importer::from_options(&config.export).import(&document)?;
    let bytes = Exporter::new(options).export(&node)?;
    info!("Reformatted {} ({} bytes)", file.display(), bytes.len());
    write_output(output, &bytes)
}

fn write_output(output: Option<&Path>, bytes: &[u8]) -> anyhow::Result<()> {
    use std::io::Write;

    match output {
        Some(path) => {
            fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
