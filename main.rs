//! `migrator` CLI: wraps `engine::facade` with CSV file I/O, a config file
//! for mapping policies and seed queries, and a progress bar.

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use engine::{
    DefaultMapping, DumpOptions, DumpQuery, DumpTarget, FieldSelection, IdMap, LoadDataset, MappingPolicy,
    ObjectName, ProgressEvent, ProgressSink, UploadOptions,
};
use restclient::{HttpClient, HttpClientConfig};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "migrator", author, version, about = "Moves records between two instances of a record-management service")]
struct Cli {
    /// Base URL of the target/source instance's REST API.
    #[arg(long, global = true)]
    base_url: String,

    /// Bearer token used to authenticate against the service.
    #[arg(long, global = true, env = "MIGRATOR_TOKEN")]
    token: String,

    /// Package namespace prefix to try as a fallback when an object or
    /// field isn't found under its literal name.
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// `-q` for warnings only, `-v` for debug-level spans.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load one CSV file per object (named `<Object>.csv`) from a directory.
    Load {
        #[arg(long)]
        input_dir: PathBuf,
        /// JSON array of `{object, keyField|keyFields, defaultMapping?}`.
        #[arg(long)]
        mapping_policies: Option<PathBuf>,
        /// JSON `{sourceId: targetId}` map to seed the run with.
        #[arg(long)]
        id_map: Option<PathBuf>,
        /// JSON array of source ids to restrict the upload to; their
        /// referenced parents/children are pulled in automatically.
        /// Omit to upload everything in scope.
        #[arg(long)]
        target_ids: Option<PathBuf>,
    },
    /// Run seed/related queries and write one CSV file per query.
    Dump {
        #[arg(long)]
        queries: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long, default_value_t = 10_000)]
        max_fetch_size: u64,
        /// Reverses this map and rewrites id/reference columns through it.
        #[arg(long)]
        id_map: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
struct MappingPolicyConfig {
    object: String,
    #[serde(default)]
    key_field: Option<String>,
    #[serde(default)]
    key_fields: Option<Vec<String>>,
    #[serde(default)]
    default_mapping: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DumpQueryConfig {
    object: String,
    #[serde(default)]
    fields: Option<Vec<String>>,
    #[serde(default)]
    ignore_fields: Option<Vec<String>>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    orderby: Option<String>,
    #[serde(default)]
    limit: Option<u64>,
    #[serde(default)]
    offset: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

struct ProgressBarSink {
    bar: indicatif::ProgressBar,
    seen: Mutex<usize>,
}

impl ProgressSink for ProgressBarSink {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Upload(progress) => {
                self.bar.set_length(progress.total_count as u64);
                self.bar.set_position((progress.success_count + progress.failure_count) as u64);
                self.bar.set_message(format!("{} ok, {} failed", progress.success_count, progress.failure_count));
            }
            ProgressEvent::Dump(progress) => {
                let mut seen = self.seen.lock().unwrap();
                *seen = progress.total_fetched;
                self.bar.set_position(progress.total_fetched as u64);
                self.bar.set_message(format!("round {}", progress.round));
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbosity = if cli.quiet {
        logger::Verbosity::Quiet
    } else if cli.verbose {
        logger::Verbosity::Verbose
    } else {
        logger::Verbosity::Normal
    };
    logger::init(verbosity);

    let client = HttpClient::new(HttpClientConfig {
        base_url: cli.base_url.clone(),
        bearer_token: cli.token.clone(),
        timeout: Duration::from_secs(180),
    })?;

    let bar = indicatif::ProgressBar::new(0);
    bar.set_style(
        indicatif::ProgressStyle::with_template("{spinner} [{elapsed_precise}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
    );
    let sink = ProgressBarSink { bar: bar.clone(), seen: Mutex::new(0) };

    match cli.command {
        Command::Load {
            input_dir,
            mapping_policies,
            id_map,
            target_ids,
        } => {
            run_load(
                &client,
                cli.namespace.as_deref(),
                &input_dir,
                mapping_policies.as_deref(),
                id_map.as_deref(),
                target_ids.as_deref(),
                &sink,
            )
            .await?
        }
        Command::Dump {
            queries,
            output_dir,
            max_fetch_size,
            id_map,
        } => run_dump(&client, cli.namespace.as_deref(), &queries, &output_dir, max_fetch_size, id_map.as_deref(), &sink).await?,
    }

    bar.finish_and_clear();
    Ok(())
}

async fn run_load(
    client: &HttpClient,
    namespace: Option<&str>,
    input_dir: &Path,
    mapping_policies_path: Option<&Path>,
    id_map_path: Option<&Path>,
    target_ids_path: Option<&Path>,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let mut datasets = Vec::new();
    for entry in fs::read_dir(input_dir).with_context(|| format!("reading {}", input_dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let object = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow::anyhow!("cannot derive object name from {}", path.display()))?;
        let parsed = csvio::parse_csv_file(&path, &csvio::CsvParseOptions::default())
            .with_context(|| format!("parsing {}", path.display()))?;
        let dataset = LoadDataset::from_parsed(ObjectName::new(object), parsed)?;
        datasets.push(dataset);
        info!(object, "loaded CSV input");
    }

    let mapping_policies = match mapping_policies_path {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            let configs: Vec<MappingPolicyConfig> = serde_json::from_str(&raw)?;
            configs.into_iter().map(build_mapping_policy).collect()
        }
        None => Vec::new(),
    };

    let seeded_id_map = match id_map_path {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            let pairs: std::collections::BTreeMap<String, String> = serde_json::from_str(&raw)?;
            let mut id_map = IdMap::new();
            for (source_id, target_id) in pairs {
                id_map.insert_if_absent(source_id, target_id);
            }
            Some(id_map)
        }
        None => None,
    };

    let target_ids = match target_ids_path {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            let ids: Vec<String> = serde_json::from_str(&raw)?;
            engine::TargetIdSet::seeded(ids)
        }
        None => engine::TargetIdSet::new(),
    };

    let options = UploadOptions {
        default_namespace: namespace.map(str::to_string),
        id_map: seeded_id_map,
        target_ids,
        ..Default::default()
    };

    let status = engine::load_csv_data(datasets, mapping_policies, options, client, client, progress).await?;

    println!(
        "{} succeeded, {} failed, {} blocked",
        status.successes.len(),
        status.failures.len(),
        status.blocked.len()
    );
    if !status.blocked.is_empty() {
        warn!(count = status.blocked.len(), "some rows never became uploadable");
    }
    Ok(())
}

fn build_mapping_policy(config: MappingPolicyConfig) -> MappingPolicy {
    let key_fields = config
        .key_fields
        .or_else(|| config.key_field.map(|f| vec![f]))
        .unwrap_or_default();
    let mut policy = MappingPolicy {
        object: ObjectName::new(config.object),
        key_fields,
        default_mapping: None,
    };
    if let Some(literal) = config.default_mapping {
        policy = policy.with_default_mapping(DefaultMapping::Literal(literal));
    }
    policy
}

async fn run_dump(
    client: &HttpClient,
    namespace: Option<&str>,
    queries_path: &Path,
    output_dir: &Path,
    max_fetch_size: u64,
    id_map_path: Option<&Path>,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let raw = fs::read_to_string(queries_path)?;
    let configs: Vec<DumpQueryConfig> = serde_json::from_str(&raw)?;
    let queries: Vec<DumpQuery> = configs.into_iter().map(build_dump_query).collect();

    let id_map = match id_map_path {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            let pairs: std::collections::BTreeMap<String, String> = serde_json::from_str(&raw)?;
            let mut id_map = IdMap::new();
            for (source_id, target_id) in pairs {
                id_map.insert_if_absent(source_id, target_id);
            }
            Some(id_map)
        }
        None => None,
    };

    let options = DumpOptions {
        default_namespace: namespace.map(str::to_string),
        max_fetch_size,
        id_map,
    };

    let object_names: Vec<String> = queries.iter().map(|q| q.object.as_str().to_string()).collect();
    let outputs = engine::dump_as_csv(queries, options, client, client, progress).await?;

    fs::create_dir_all(output_dir)?;
    for (object, csv) in object_names.iter().zip(outputs) {
        let path = output_dir.join(format!("{object}.csv"));
        fs::write(&path, csv).with_context(|| format!("writing {}", path.display()))?;
        info!(object, path = %path.display(), "wrote dump output");
    }
    Ok(())
}

fn build_dump_query(config: DumpQueryConfig) -> DumpQuery {
    let fields = match (config.fields, config.ignore_fields) {
        (Some(fields), _) => FieldSelection::Explicit(fields),
        (None, Some(ignored)) => FieldSelection::AllExcept(ignored),
        (None, None) => FieldSelection::All,
    };
    let target = match config.target.as_deref() {
        Some("related") => DumpTarget::Related,
        _ => DumpTarget::Query,
    };
    DumpQuery {
        object: ObjectName::new(config.object),
        fields,
        target,
        condition: config.condition,
        orderby: config.orderby,
        limit: config.limit,
        offset: config.offset,
        scope: config.scope,
    }
}
