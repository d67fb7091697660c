use clap::{Parser, Subcommand};
use rayon::prelude::*;
use siena::cache::{self, CacheStats};
use siena::config::{self, GcScope};
use siena::pipeline::{DocumentReport, Pipeline};
use siena::{markdown, output, render};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "siena")]
#[command(version)]
#[command(about = "Responsive, content-addressed images for markdown sites")]
#[command(long_about = "\
Responsive, content-addressed images for markdown sites

Every markdown image is replaced by a <picture> with a size-capped jpg plus
webp/avif sources. Variants are named by the SHA-256 of the source bytes, so
an image is encoded once no matter how many documents use it.

Layout:

  site/
  ├── siena.toml            # Optional config ('siena gen-config' prints one)
  ├── content/
  │   └── posts/hello.md    # ![A cat](./cat.png)
  └── public/
      ├── posts/hello.html
      └── .siena/           # <hash>.jpg, <hash>.webp, <hash>.avif

Logging goes to stderr and is controlled with RUST_LOG (default: warn).")]
struct Cli {
    /// Build root; siena.toml and output_dir are relative to it
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Markdown directory, relative to the build root
    #[arg(long, default_value = "content", global = true)]
    content: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render every markdown document, generating image variants
    Build,
    /// List the variant cache
    Inspect {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print a stock siena.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), BoxError> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Build => build(&cli.root, &cli.root.join(&cli.content))?,
        Command::Inspect { json } => {
            let config = config::load_config(&cli.root)?;
            let entries = cache::list_entries(&config.cache_dir(&cli.root))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for line in output::format_inspect(&entries) {
                    println!("{}", line);
                }
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn build(root: &Path, content: &Path) -> Result<(), BoxError> {
    let config = config::load_config(root)?;
    init_thread_pool(&config.processing);
    let out_dir = root.join(&config.output_dir);
    let scope = config.gc_scope;
    let pipeline = Pipeline::new(config, root)?;

    let documents = find_documents(content)?;
    println!("==> Building {} documents from {}", documents.len(), content.display());

    let (tx, rx) = mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_transform_event(&event) {
                println!("{}", line);
            }
        }
    });

    pipeline.begin_session()?;
    let build_one = |path: &PathBuf| {
        let path = path.as_path();
        let relative = path.strip_prefix(content).unwrap_or(path);
        build_document(&pipeline, relative, &out_dir, path, &tx)
            .map_err(|e| format!("{}: {}", relative.display(), e))
    };
    let results: Vec<Result<(String, String, DocumentReport), String>> = match scope {
        GcScope::Session => documents.par_iter().map(build_one).collect(),
        GcScope::PerDocument => documents.iter().map(build_one).collect(),
    };
    drop(tx);
    printer.join().map_err(|_| "output thread panicked")?;

    let mut total = CacheStats::default();
    let mut built = 0;
    let mut failed = 0;
    for result in &results {
        match result {
            Ok((source, target, report)) => {
                built += 1;
                total.merge(&report.stats);
                for line in output::format_document_report(source, target, report) {
                    println!("{}", line);
                }
            }
            Err(message) => {
                failed += 1;
                eprintln!("{}", output::format_document_failure(message));
            }
        }
    }
    println!();
    println!("{}", output::format_build_summary(built, failed, &total));

    if failed > 0 {
        if scope == GcScope::Session {
            println!("Cache cleanup skipped: not every document was built");
        }
        return Err(format!("{} of {} documents failed", failed, results.len()).into());
    }
    if scope == GcScope::Session {
        for line in output::format_gc_report(&pipeline.finish_session()) {
            println!("{}", line);
        }
    }
    println!("==> Build complete: {}", out_dir.display());
    Ok(())
}

/// Markdown files under `content`, sorted by path.
fn find_documents(content: &Path) -> Result<Vec<PathBuf>, BoxError> {
    let mut documents = Vec::new();
    for entry in WalkDir::new(content).sort_by_file_name() {
        let entry = entry?;
        let is_markdown = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));
        if entry.file_type().is_file() && is_markdown {
            documents.push(entry.into_path());
        }
    }
    Ok(documents)
}

/// Parse, transform, render and write one document.
///
/// `relative` is the document's path below the content directory. Returns
/// display paths for the source and output alongside the report.
fn build_document(
    pipeline: &Pipeline,
    relative: &Path,
    out_dir: &Path,
    path: &Path,
    events: &Sender<siena::walk::TransformEvent>,
) -> Result<(String, String, DocumentReport), BoxError> {
    let text = std::fs::read_to_string(path)?;
    let mut tree = markdown::parse(&text);

    let report = pipeline.transform(&mut tree, Some(path), Some(events))?;

    let title = markdown::title(&tree).unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let html = render::render_page(&title, &tree).into_string();

    let target = out_dir.join(relative).with_extension("html");
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, html)?;

    let shown_target = target.strip_prefix(pipeline.build_root()).unwrap_or(&target);
    Ok((
        relative.display().to_string(),
        shown_target.display().to_string(),
        report,
    ))
}
