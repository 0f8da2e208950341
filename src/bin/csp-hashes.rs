use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use site_guard::config::{DeploymentMode, ObservabilityConfig};
use site_guard::hashes::{csp_hash, HashCollector, HashManifest};
use site_guard::observability::logging;

#[derive(Parser)]
#[command(name = "csp-hashes")]
#[command(about = "Collect and manage CSP hashes for inline animation styles", long_about = None)]
struct Cli {
    /// Manifest file read by the server
    #[arg(short, long, default_value = "csp-hashes.json")]
    manifest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash inline styles found in rendered HTML files or directories
    Collect {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Component name for styles without a data-component attribute
        #[arg(short, long)]
        component: Option<String>,
        /// Print what would change without writing the manifest
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the style-src hash sources, one per line
    Export {
        /// Print a complete style-src directive instead
        #[arg(long)]
        directive: bool,
    },
    /// Show manifest statistics
    Stats,
    /// Print the CSP hash source for a literal style string
    Hash { content: String },
    /// Add a hash source (or raw style content with --content) to the manual list
    AddManual {
        value: String,
        #[arg(long)]
        content: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let observability = ObservabilityConfig {
        log_level: "warn".to_string(),
        ..ObservabilityConfig::default()
    };
    logging::init_tracing(&observability, DeploymentMode::Development);

    match cli.command {
        Commands::Collect {
            paths,
            component,
            dry_run,
        } => {
            let collector = HashCollector::new();
            collector.start();

            let mut files = Vec::new();
            for path in &paths {
                html_files(path, &mut files)?;
            }
            for file in &files {
                let html = fs::read_to_string(file)?;
                let seen = collector.observe_html(&html, component.as_deref());
                println!("{:>5}  {}", seen, file.display());
            }
            collector.stop();

            let stats = collector.get_stats();
            println!("\n{} distinct inline styles in {} files", stats.total_hashes, files.len());
            for (name, count) in &stats.by_component {
                println!("  {name}: {count}");
            }

            let mut manifest = HashManifest::load_or_default(&cli.manifest);
            let added = manifest.merge_collected(&collector);
            if dry_run {
                println!("{added} new hashes (dry run, manifest not written)");
            } else {
                manifest.save(&cli.manifest)?;
                println!("{added} new hashes written to {}", cli.manifest.display());
            }
        }
        Commands::Export { directive } => {
            let manifest = HashManifest::load(&cli.manifest)?;
            let sources = manifest.csp_sources();
            if directive {
                let mut parts = vec!["style-src".to_string(), "'self'".to_string()];
                if !sources.is_empty() {
                    parts.push("'unsafe-hashes'".to_string());
                }
                parts.extend(sources);
                println!("{}", parts.join(" "));
            } else {
                for source in sources {
                    println!("{source}");
                }
            }
        }
        Commands::Stats => {
            let manifest = HashManifest::load(&cli.manifest)?;
            println!("{}", serde_json::to_string_pretty(&manifest.stats)?);
            for (component, hashes) in &manifest.components {
                println!("  {component}: {}", hashes.len());
            }
        }
        Commands::Hash { content } => {
            println!("{}", csp_hash(&content));
        }
        Commands::AddManual { value, content } => {
            let source = if content { csp_hash(&value) } else { value };
            let mut manifest = HashManifest::load_or_default(&cli.manifest);
            if manifest.add_manual(&source) {
                manifest.save(&cli.manifest)?;
                println!("Added {source}");
            } else {
                return Err(format!("{source} is malformed or already in the manifest").into());
            }
        }
    }

    Ok(())
}

/// Expand `path` into HTML files. Files named directly are always taken;
/// directories contribute their `.html`/`.htm` files recursively.
fn html_files(path: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if !path.is_dir() {
        out.push(path.to_path_buf());
        return Ok(());
    }

    let mut entries: Vec<_> = fs::read_dir(path)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();
    entries.sort();
    for entry in entries {
        if entry.is_dir() {
            html_files(&entry, out)?;
        } else if entry.extension().is_some_and(|ext| ext == "html" || ext == "htm") {
            out.push(entry);
        }
    }
    Ok(())
}
