//! NeoBridge CLI: load gazetteer and annotation data into a graph, then link them.
//!
//! Usage:
//!   neobridge [--db path] places --input ipn.csv [--year 2023]
//!   neobridge [--db path] annotations --input docs.json [--tokens] [--entities] [--pymusas]
//!   neobridge [--db path] link [--page-size 500]
//!   neobridge [--db path] stats

use clap::{Args, Parser, Subcommand};
use neobridge::adapter::{
    annotation, geographic, linker, read_documents, AdapterInput, AnnotationOptions,
    ReferenceReader,
};
use neobridge::{
    AnnotationAdapter, BridgeError, CancellationToken, Config, CorpusLinker, GeographicAdapter,
    IngestPipeline, Label, NodeId, RelType, StoreConfig, ToolchainConfig, UpsertEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "neobridge",
    version,
    about = "Bridge gazetteer data and annotated text in one property graph"
)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Path to SQLite database file
    #[arg(long, env = "NEOBRIDGE_DB", global = true)]
    db: Option<PathBuf>,

    /// Neo4j bolt URI; when set, Neo4j is used instead of SQLite
    #[cfg(feature = "neo4j")]
    #[arg(long, env = "DB_URI", global = true)]
    neo4j_uri: Option<String>,

    #[cfg(feature = "neo4j")]
    #[arg(long, env = "DB_USER", default_value = "neo4j", global = true)]
    neo4j_user: String,

    #[cfg(feature = "neo4j")]
    #[arg(long, env = "DB_PASS", default_value = "", hide_env_values = true, global = true)]
    neo4j_password: String,
}

impl StoreArgs {
    fn into_config(self) -> StoreConfig {
        #[cfg(feature = "neo4j")]
        if let Some(uri) = self.neo4j_uri {
            return StoreConfig::Neo4j {
                uri,
                user: self.neo4j_user,
                password: self.neo4j_password,
            };
        }
        match self.db {
            Some(path) => StoreConfig::Sqlite { path },
            None => StoreConfig::default_sqlite(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Import gazetteer rows from a CSV file
    Places {
        /// CSV file with a header row
        #[arg(short, long)]
        input: PathBuf,
        /// Dataset year stamped on imported places
        #[arg(long, default_value_t = geographic::DEFAULT_DATASET_YEAR)]
        year: i64,
    },
    /// Import annotated documents from a JSON file
    Annotations {
        /// JSON file holding one document or an array of documents
        #[arg(short, long)]
        input: PathBuf,
        /// Insert tokens into the graph
        #[arg(long)]
        tokens: bool,
        /// Insert entity spans into the graph
        #[arg(long)]
        entities: bool,
        /// Include auxiliary (pymusas) tags
        #[arg(long)]
        pymusas: bool,
    },
    /// Link entities and lemmas to geographic names
    Link {
        /// Nodes fetched per page
        #[arg(long, default_value_t = linker::DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },
    /// Print node and relationship counts
    Stats,
}

/// Cancel the token on Ctrl-C. Work already committed stays.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next boundary");
            cancel.cancel();
        }
    });
}

async fn open(config: &Config) -> Result<(Arc<UpsertEngine>, NodeId), BridgeError> {
    let engine = config.engine().await?;
    let toolchain = engine
        .register_toolchain(&config.toolchain.name, &config.toolchain.version)
        .await?;
    info!(name = %config.toolchain.name, version = %config.toolchain.version, %toolchain, "toolchain");
    Ok((engine, toolchain))
}

async fn cmd_places(config: Config, input: PathBuf, cancel: CancellationToken) -> i32 {
    let (engine, toolchain) = match open(&config).await {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let reader = match ReferenceReader::open(&input) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    info!(header = ?reader.header(), "reading {}", input.display());

    let adapter = GeographicAdapter::new(engine, toolchain).with_year(config.dataset_year);
    let mut pipeline = IngestPipeline::new(cancel);
    pipeline.register_adapter(Arc::new(adapter));

    let inputs = reader.records().map(|row| {
        row.map(|(line, record)| {
            AdapterInput::new(geographic::INPUT_KIND, record, format!("row {}", line))
        })
        .map_err(BridgeError::from)
    });

    match pipeline.run(inputs).await {
        Ok(summary) => {
            println!("Places: {}", summary);
            0
        }
        Err(aborted) => {
            eprintln!("Error: {}", aborted);
            1
        }
    }
}

async fn cmd_annotations(
    config: Config,
    input: PathBuf,
    options: AnnotationOptions,
    cancel: CancellationToken,
) -> i32 {
    if !options.tokens && !options.entities {
        warn!("neither --tokens nor --entities given; only sources will be written");
    }
    let (engine, _toolchain) = match open(&config).await {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let documents = match read_documents(&input) {
        Ok(docs) => docs,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    info!(documents = documents.len(), "reading {}", input.display());

    let adapter = AnnotationAdapter::new(engine).with_options(options);
    let mut pipeline = IngestPipeline::new(cancel);
    pipeline.register_adapter(Arc::new(adapter));

    let inputs = documents.into_iter().map(|doc| {
        let origin = format!("{} <{}>", doc.title, doc.url);
        Ok::<_, BridgeError>(AdapterInput::new(annotation::INPUT_KIND, doc, origin))
    });

    match pipeline.run(inputs).await {
        Ok(summary) => {
            println!("Documents: {}", summary);
            0
        }
        Err(aborted) => {
            eprintln!("Error: {}", aborted);
            1
        }
    }
}

async fn cmd_link(config: Config, cancel: CancellationToken) -> i32 {
    let (engine, _toolchain) = match open(&config).await {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let linker = CorpusLinker::new(engine).with_page_size(config.page_size);
    match linker.run(&cancel).await {
        Ok(report) => {
            for pass in &report.passes {
                println!(
                    "  {:<40} {:>8} candidates {:>8} created",
                    pass.pass.to_string(),
                    pass.candidates,
                    pass.created
                );
            }
            println!(
                "Linked: {} candidates, {} edges created",
                report.total_candidates(),
                report.total_created()
            );
            0
        }
        Err(e) => {
            error!(error = %e, "linking aborted");
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_stats(config: Config) -> i32 {
    let store = match config.open_store().await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    println!("Nodes:");
    for label in Label::ALL {
        match store.count_nodes(label).await {
            Ok(count) => println!("  {:<24} {:>10}", label, count),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    }
    println!("Relationships:");
    for rel in RelType::ALL {
        match store.count_edges(rel).await {
            Ok(count) => println!("  {:<24} {:>10}", rel, count),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    }
    0
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "neobridge=debug" } else { "neobridge=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let store = cli.store.into_config();
    let code = rt.block_on(async {
        let cancel = CancellationToken::new();
        cancel_on_ctrl_c(cancel.clone());

        match cli.command {
            Commands::Places { input, year } => {
                let mut config = Config::new(
                    store,
                    ToolchainConfig::new(geographic::TOOLCHAIN_NAME, geographic::TOOLCHAIN_VERSION),
                );
                config.dataset_year = year;
                cmd_places(config, input, cancel).await
            }
            Commands::Annotations {
                input,
                tokens,
                entities,
                pymusas,
            } => {
                let config = Config::new(
                    store,
                    ToolchainConfig::new(annotation::TOOLCHAIN_NAME, annotation::TOOLCHAIN_VERSION),
                );
                let options = AnnotationOptions {
                    tokens,
                    entities,
                    auxiliary_tags: pymusas,
                };
                cmd_annotations(config, input, options, cancel).await
            }
            Commands::Link { page_size } => {
                let mut config = Config::new(
                    store,
                    ToolchainConfig::new(linker::TOOLCHAIN_NAME, linker::TOOLCHAIN_VERSION),
                );
                config.page_size = page_size;
                cmd_link(config, cancel).await
            }
            Commands::Stats => {
                let config = Config::new(
                    store,
                    ToolchainConfig::new(linker::TOOLCHAIN_NAME, linker::TOOLCHAIN_VERSION),
                );
                cmd_stats(config).await
            }
        }
    });
    std::process::exit(code);
}
