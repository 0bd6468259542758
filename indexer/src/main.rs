use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use ezsearch_core::persist::DEFAULT_MAX_DEPTH;
use ezsearch_core::{Engine, EngineConfig, Namespace};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ezsearch-indexer")]
#[command(about = "Bootstrap a data directory and bulk-load JSON documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data layout including all 65,536 postings buckets
    Init {
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },
    /// Index every document found in JSON/JSONL files under a path
    Load {
        #[arg(long, default_value = "./data")]
        data_dir: String,
        /// Index name of the target namespace
        #[arg(long)]
        index: String,
        /// Type name of the target namespace
        #[arg(long = "type")]
        kind: String,
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: usize,
        /// Log and skip documents that fail to index instead of stopping
        #[arg(long, default_value_t = false)]
        keep_going: bool,
    },
}

#[derive(Debug, Default, PartialEq, Eq)]
struct LoadReport {
    indexed: usize,
    failed: usize,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { data_dir } => {
            let engine = Engine::open(EngineConfig::new(&data_dir).with_precreate_buckets(true))?;
            engine.flush()?;
            tracing::info!(data_dir = %data_dir, "data directory ready");
            Ok(())
        }
        Commands::Load { data_dir, index, kind, input, max_depth, keep_going } => {
            let engine = Engine::open(EngineConfig::new(&data_dir).with_max_depth(max_depth))?;
            let ns = Namespace::new(index, kind)?;
            let report = load_path(&engine, &ns, Path::new(&input), keep_going)?;
            engine.flush()?;
            tracing::info!(namespace = %ns, indexed = report.indexed, failed = report.failed, "load complete");
            Ok(())
        }
    }
}

fn input_files(input_path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(input_path) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let p = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        // an explicitly named file is taken whatever its extension
        let wanted = entry.depth() == 0
            || matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl"));
        if wanted {
            files.push(p.to_path_buf());
        }
    }
    files.sort();
    files
}

fn load_path(engine: &Engine, ns: &Namespace, input: &Path, keep_going: bool) -> Result<LoadReport> {
    let files = input_files(input);
    if files.is_empty() {
        return Err(anyhow!("no .json or .jsonl input under {}", input.display()));
    }
    let mut report = LoadReport::default();
    for file in files {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            index_jsonl(engine, ns, &file, keep_going, &mut report)?;
        } else {
            index_json(engine, ns, &file, keep_going, &mut report)?;
        }
        tracing::debug!(file = %file.display(), indexed = report.indexed, "file done");
    }
    Ok(report)
}

fn index_jsonl(engine: &Engine, ns: &Namespace, file: &Path, keep_going: bool, report: &mut LoadReport) -> Result<()> {
    let f = File::open(file)?;
    let reader = BufReader::new(f);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let doc: serde_json::Value = serde_json::from_str(&line)
            .map_err(|e| anyhow!("{}:{}: {e}", file.display(), lineno + 1))?;
        ingest_doc(engine, ns, &doc, keep_going, report)?;
    }
    Ok(())
}

fn index_json(engine: &Engine, ns: &Namespace, file: &Path, keep_going: bool, report: &mut LoadReport) -> Result<()> {
    let f = File::open(file)?;
    let reader = BufReader::new(f);
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    match json {
        serde_json::Value::Array(arr) => {
            for doc in arr {
                ingest_doc(engine, ns, &doc, keep_going, report)?;
            }
        }
        doc => ingest_doc(engine, ns, &doc, keep_going, report)?,
    }
    Ok(())
}

fn ingest_doc(engine: &Engine, ns: &Namespace, doc: &serde_json::Value, keep_going: bool, report: &mut LoadReport) -> Result<()> {
    match engine.add_document(ns, doc) {
        Ok(_) => {
            report.indexed += 1;
            if report.indexed % 1000 == 0 {
                tracing::info!(indexed = report.indexed, "progress");
            }
            Ok(())
        }
        Err(e) if keep_going && e.is_client_error() => {
            tracing::warn!(error = %e, "skipping document");
            report.failed += 1;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
