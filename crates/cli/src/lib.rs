use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdf_viewer_core::export::{self, ExportPayload, ReadwiseExporter};
use pdf_viewer_core::search::{filter_files, scan_pdfs};
use pdf_viewer_core::{
    Annotation, AnnotationStore, ContentSearcher, JsonAnnotationStore, Origin, QueryMode, Rect,
    RipgrepAll, SearchRequest, ViewerConfig,
};
use pdf_viewer_scheduler::CancellationToken;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pdf-viewer")]
#[command(about = "PDF viewer command-line tools")]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Search PDF contents under the configured roots.
    Search {
        #[arg(value_name = "QUERY")]
        query: String,
        /// Directory to search; repeat for several (replaces the configured roots)
        #[arg(long = "root", value_name = "DIR")]
        roots: Vec<PathBuf>,
        #[arg(long)]
        max_count: Option<usize>,
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Search program to run instead of the configured one
        #[arg(long)]
        program: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// List PDFs under the file roots whose name matches.
    Files {
        #[arg(value_name = "QUERY", default_value = "")]
        query: String,
        /// Directory to scan; repeat for several (replaces the configured roots)
        #[arg(long = "root", value_name = "DIR")]
        roots: Vec<PathBuf>,
        /// Subsequence instead of substring matching
        #[arg(long)]
        fuzzy: bool,
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Inspect or edit the stored annotations of a document.
    Annotations {
        #[command(subcommand)]
        action: AnnotationAction,
    },
    /// Send a document's highlights to Readwise.
    Export {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
        /// Title to export under (defaults to the file name)
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Print the request body instead of sending it
        #[arg(long)]
        dry_run: bool,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Subcommand)]
enum AnnotationAction {
    /// List annotations in page order.
    List {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Add a highlight.
    Highlight {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// 1-based page number
        #[arg(long)]
        page: usize,
        #[arg(long)]
        text: String,
        #[arg(long, num_args = 4, value_names = ["X0", "Y0", "X1", "Y1"], allow_negative_numbers = true)]
        rect: Option<Vec<f64>>,
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
    },
    /// Remove an annotation by id.
    Remove {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "ID")]
        id: String,
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
    },
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_tracing();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Search {
            query,
            roots,
            max_count,
            timeout_ms,
            program,
            json,
        } => {
            let options = SearchOptions {
                roots,
                max_count,
                timeout_ms,
                program,
                json,
            };
            run_search(&config, &query, options)
        }
        Commands::Files {
            query,
            roots,
            fuzzy,
            depth,
        } => {
            run_files(&config, &query, roots, fuzzy, depth);
            Ok(())
        }
        Commands::Annotations { action } => match action {
            AnnotationAction::List { file, store, json } => {
                run_list(&open_store(store)?, &file, json)
            }
            AnnotationAction::Highlight {
                file,
                page,
                text,
                rect,
                store,
            } => run_highlight(&open_store(store)?, &file, page, text, rect),
            AnnotationAction::Remove { file, id, store } => {
                run_remove(&open_store(store)?, &file, &id)
            }
        },
        Commands::Export {
            file,
            store,
            title,
            author,
            dry_run,
        } => {
            let store = open_store(store)?;
            run_export(&config, &store, &file, title, author, dry_run)
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<ViewerConfig> {
    let config = match path {
        Some(path) => ViewerConfig::from_file(path)?,
        None => ViewerConfig::load_default()?,
    };
    let mut config = config
        .with_env_overrides()
        .context("invalid cache settings in environment")?;
    for warning in config.normalize() {
        tracing::warn!("{warning}");
    }
    Ok(config)
}

fn open_store(root: Option<PathBuf>) -> Result<JsonAnnotationStore> {
    match root {
        Some(root) => Ok(JsonAnnotationStore::new(root)),
        None => JsonAnnotationStore::open_default().context("failed to locate annotation store"),
    }
}

struct SearchOptions {
    roots: Vec<PathBuf>,
    max_count: Option<usize>,
    timeout_ms: Option<u64>,
    program: Option<PathBuf>,
    json: bool,
}

fn run_search(config: &ViewerConfig, query: &str, options: SearchOptions) -> Result<()> {
    let query = query.trim();
    if query.is_empty() {
        anyhow::bail!("search query is empty");
    }

    let roots = if options.roots.is_empty() {
        config.search.resolved_roots()
    } else {
        options.roots
    };
    let request = SearchRequest {
        query: query.to_string(),
        roots,
        max_count: options.max_count.unwrap_or(config.search.max_count).max(1),
        timeout: options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.search.timeout()),
    };
    let searcher = RipgrepAll::new(
        options
            .program
            .unwrap_or_else(|| PathBuf::from(&config.search.program)),
    );

    let hits = searcher
        .search(&request, &CancellationToken::new())
        .with_context(|| format!("search for {query:?} failed"))?;

    if options.json {
        let rows: Vec<_> = hits
            .iter()
            .map(|hit| {
                serde_json::json!({
                    "path": hit.path.display().to_string(),
                    "page": hit.page,
                    "line": hit.line,
                    "content": hit.content,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for hit in &hits {
            println!("{}", hit.display(config.search.preview_chars));
        }
    }
    Ok(())
}

fn run_files(
    config: &ViewerConfig,
    query: &str,
    roots: Vec<PathBuf>,
    fuzzy: bool,
    depth: Option<usize>,
) {
    let roots = if roots.is_empty() {
        config.search.resolved_file_roots()
    } else {
        roots
    };
    let files = scan_pdfs(&roots, depth.unwrap_or(config.search.scan_depth));
    let mode = if fuzzy {
        QueryMode::Fuzzy
    } else {
        QueryMode::Exact
    };
    for path in filter_files(&files, query, mode) {
        println!("{}", path.display());
    }
}

fn sorted_annotations(store: &dyn AnnotationStore, file: &Path) -> Result<Vec<Annotation>> {
    let mut annotations = store
        .list(file)
        .with_context(|| format!("failed to read annotations for {}", file.display()))?;
    annotations.sort_by_key(|annotation| (annotation.page(), annotation.created_at()));
    Ok(annotations)
}

fn run_list(store: &dyn AnnotationStore, file: &Path, json: bool) -> Result<()> {
    let annotations = sorted_annotations(store, file)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&annotations)?);
        return Ok(());
    }
    for annotation in &annotations {
        let kind = if annotation.is_highlight() {
            "highlight"
        } else {
            "note"
        };
        println!(
            "{}\tpage {}\t{}\t{}\t{}",
            annotation.id(),
            annotation.page() + 1,
            kind,
            annotation.color(),
            annotation.text().unwrap_or_default()
        );
    }
    Ok(())
}

fn run_highlight(
    store: &dyn AnnotationStore,
    file: &Path,
    page: usize,
    text: String,
    rect: Option<Vec<f64>>,
) -> Result<()> {
    if page == 0 {
        anyhow::bail!("--page is 1-based and must be >= 1");
    }
    let rect = match rect.as_deref() {
        Some(&[x0, y0, x1, y1]) => Rect::new(x0, y0, x1, y1),
        Some(_) => anyhow::bail!("--rect takes exactly four numbers"),
        None => Rect::default(),
    };
    let annotation = Annotation::highlight(page - 1, vec![rect], Some(text), Origin::Database);
    store
        .add(file, &annotation)
        .with_context(|| format!("failed to store highlight for {}", file.display()))?;
    println!("{}", annotation.id());
    Ok(())
}

fn run_remove(store: &dyn AnnotationStore, file: &Path, id: &str) -> Result<()> {
    let removed = store
        .remove(file, id)
        .with_context(|| format!("failed to update annotations for {}", file.display()))?;
    if !removed {
        anyhow::bail!("no annotation with id {id}");
    }
    println!("removed {id}");
    Ok(())
}

fn run_export(
    config: &ViewerConfig,
    store: &dyn AnnotationStore,
    file: &Path,
    title: Option<String>,
    author: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let annotations = sorted_annotations(store, file)?;
    let title = title.unwrap_or_else(|| {
        file.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string())
    });
    let payload = ExportPayload::from_annotations(&title, author.as_deref(), &annotations);

    if dry_run {
        println!("{}", payload.to_json()?);
        return Ok(());
    }

    let token = export::token_from_env(&config.export.token_env)
        .map_err(|err| anyhow::anyhow!(err.user_message()))?;
    let exporter = ReadwiseExporter::new(&config.export.endpoint, config.export.timeout());
    let count = export::export(&exporter, &token, &payload)
        .map_err(|err| anyhow::anyhow!(err.user_message()))
        .context("export failed")?;

    if count == 0 {
        println!("No highlights to export");
    } else {
        println!("Exported {count} highlights");
    }
    Ok(())
}
