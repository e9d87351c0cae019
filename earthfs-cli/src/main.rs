//! EarthFS CLI - Command-line interface for content-addressed repositories

use clap::{Parser, Subcommand};
use earthfs_core::Repository;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "earthfs")]
#[command(about = "Content-addressed file repository with metadata search", long_about = None)]
struct Cli {
    /// Repository root (defaults to the current directory)
    #[arg(long, global = true, env = "EARTHFS_REPO")]
    repo: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create config.toml, data/ and repo.db
    Init,

    /// Ingest a file into the repository
    Add {
        /// Path of the file to ingest
        file: PathBuf,

        /// Media type of the file
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
    },

    /// Ingest a meta-file (target URI, blank line, JSON object)
    Meta {
        /// Path of the meta-file body
        file: PathBuf,
    },

    /// Full-text search over indexed metadata
    Search {
        /// Search terms (all must match)
        terms: Vec<String>,
    },

    /// Find meta-files with an exact field value
    Find {
        field: String,
        value: String,
    },

    /// List meta-files annotating a target URI
    Targets {
        uri: String,
    },

    /// Replicate from the peers configured in config.toml
    Pull,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.repo.clone().unwrap_or_else(|| PathBuf::from("."));

    let result = match cli.command {
        Commands::Init => cmd_init(&root),
        Commands::Add { file, content_type } => cmd_add(&root, &file, &content_type, cli.json),
        Commands::Meta { file } => {
            cmd_add(&root, &file, earthfs_core::META_TYPE, cli.json)
        }
        Commands::Search { terms } => cmd_show(&root, cli.json, |repo| {
            repo.search(&terms.join(" "))
        }),
        Commands::Find { field, value } => cmd_show(&root, cli.json, |repo| {
            repo.find(&field, &value)
        }),
        Commands::Targets { uri } => cmd_show(&root, cli.json, |repo| {
            repo.metafiles_for_target(&uri)
        }),
        Commands::Pull => cmd_pull(&root),
    };

    if let Err(e) = result {
        if cli.json {
            let error_json = serde_json::json!({ "error": e.to_string() });
            eprintln!("{}", serde_json::to_string_pretty(&error_json).unwrap());
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn cmd_init(root: &std::path::Path) -> earthfs_core::Result<()> {
    use colored::Colorize;

    let repo = Repository::create(root)?;
    println!("{} {}", "Initialized".green(), repo.path().display());
    Ok(())
}

fn cmd_add(
    root: &std::path::Path,
    file: &std::path::Path,
    content_type: &str,
    json: bool,
) -> earthfs_core::Result<()> {
    use colored::Colorize;

    let body = std::fs::read(file)?;
    let mut repo = Repository::open(root)?;
    let receipt = repo.ingest(content_type, body)?;

    if json {
        let view = serde_json::json!({
            "file_id": receipt.file_id,
            "uri": receipt.uri.to_string(),
            "metafile_id": receipt.metafile_id,
        });
        println!("{}", serde_json::to_string_pretty(&view).unwrap());
    } else {
        println!("{} {}", "Stored".green(), receipt.uri);
        if let Some(id) = receipt.metafile_id {
            println!("{} meta-file {}", "Indexed".blue(), id);
        }
    }
    Ok(())
}

/// One row of search/find/targets output.
#[derive(Serialize)]
struct MetaFileView {
    metafile_id: u64,
    file_id: u64,
    target_uri: String,
    fields: Vec<(String, String)>,
}

fn cmd_show<F>(root: &std::path::Path, json: bool, lookup: F) -> earthfs_core::Result<()>
where
    F: FnOnce(&mut Repository) -> earthfs_core::Result<Vec<u64>>,
{
    use colored::Colorize;

    let mut repo = Repository::open(root)?;
    let ids = lookup(&mut repo)?;

    let mut views = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(record) = repo.metafile(id)? else {
            continue;
        };
        views.push(MetaFileView {
            metafile_id: id,
            file_id: record.file_id,
            target_uri: record.target_uri,
            fields: repo.metafile_fields(id)?,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&views).unwrap());
        return Ok(());
    }
    if views.is_empty() {
        println!("{}", "No matches".yellow());
        return Ok(());
    }
    for view in views {
        println!(
            "{} {} {}",
            format!("#{}", view.metafile_id).blue(),
            "->".dimmed(),
            view.target_uri
        );
        for (field, value) in view.fields {
            println!("    {} = {}", field.green(), value);
        }
    }
    Ok(())
}

fn cmd_pull(root: &std::path::Path) -> earthfs_core::Result<()> {
    use colored::Colorize;
    use earthfs_pull::{HttpPeer, Pull, PullOptions};

    let repo = Repository::open(root)?;
    let jobs = repo.config().pull.clone();
    if jobs.is_empty() {
        println!("{} no [[pull]] peers in config.toml", "Nothing to do:".yellow());
        return Ok(());
    }

    let mut pulls = Vec::with_capacity(jobs.len());
    for job in &jobs {
        let peer = HttpPeer::new(job)?;
        pulls.push(Pull::start(&repo, &peer, PullOptions::default())?);
        println!("{} {}", "Pulling from".green(), job.host);
    }

    println!("{}", "Replicating; press Ctrl-C to stop".dimmed());
    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}
