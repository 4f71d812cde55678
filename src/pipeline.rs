//! Per-file orchestration: normalize, sample, combine, rename, and hand a
//! [`LoadPlan`] to the bulk loader.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    cancel::CancellationToken,
    combine,
    config::PipelineConfig,
    io_utils::{self, Compression, RawFile},
    naming,
    normalize::{self, NormalizeStats},
    patterns::CANONICAL_NULL,
    printable_delimiter,
    sampler::{self, Sample},
    schema::{ColumnTypeMap, TableSchema},
};

/// Everything the loader needs to fill one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadPlan {
    pub run_id: Uuid,
    pub prepared_at: DateTime<Utc>,
    pub source: PathBuf,
    pub compression: Compression,
    pub normalized_path: PathBuf,
    pub schema: TableSchema,
    /// Leading lines the loader must ignore, header row included.
    pub skip_lines: usize,
    pub separator: String,
    pub quote: String,
    pub null_marker: String,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub lines: u64,
    pub sha256: String,
}

impl LoadPlan {
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating load plan {path:?}"))?;
        serde_yaml::to_writer(BufWriter::new(file), self).context("Writing load plan YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening load plan {path:?}"))?;
        serde_yaml::from_reader(file).with_context(|| format!("Parsing load plan {path:?}"))
    }
}

/// Paths written next to the normalized file for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub schema: PathBuf,
    pub ddl: PathBuf,
    pub plan: PathBuf,
}

impl Artifacts {
    pub fn for_table(staging_dir: &Path, table: &str) -> Self {
        Artifacts {
            schema: staging_dir.join(format!("{table}.schema.yml")),
            ddl: staging_dir.join(format!("{table}.sql")),
            plan: staging_dir.join(format!("{table}.plan.yml")),
        }
    }
}

/// Samples a delimited file and builds its table schema. Normalized files are
/// always UTF-8.
pub fn infer_schema(
    path: &Path,
    table: &str,
    separator: u8,
    encoding: &'static Encoding,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<(TableSchema, Sample)> {
    let options = config.sample_options(separator, encoding);
    let sample = sampler::sample(path, &options, cancel)
        .with_context(|| format!("Sampling column types of {path:?}"))?;
    if sample.decode_errors > 0 {
        warn!(
            "{} value(s) in {:?} could not be decoded and were treated as text",
            sample.decode_errors, path
        );
    }
    let types = merged_types(&sample, config.row_cap)
        .with_context(|| format!("Combining column types of {path:?}"))?;
    let names = naming::normalize_names(&sample.header, &config.acronyms, config.collision_policy)
        .with_context(|| format!("Naming columns of {path:?}"))?;

    let overridden = |header: &String, safe: &String| {
        config.column_types.contains(safe) || config.column_types.contains(header)
    };
    for (header, safe) in sample.header.iter().zip(&names) {
        if !types.contains(header) && !overridden(header, safe) {
            warn!(
                "Column {header:?} of {path:?} had no sampled values; using {}",
                config.fallback_type
            );
        }
    }
    let schema = TableSchema::from_types(
        table,
        &sample.header,
        &names,
        &types,
        &config.column_types,
        config.fallback_type,
    );
    Ok((schema, sample))
}

/// Merged chunk guesses. A sample with no data rows yields an empty map, so
/// every column falls back; the combiner itself rejects that input.
fn merged_types(sample: &Sample, row_cap: usize) -> Result<ColumnTypeMap> {
    if row_cap == 0 {
        warn!("Row cap is 0; only the header was read and every column gets the fallback type");
        return Ok(ColumnTypeMap::new());
    }
    if sample.chunks.iter().all(Option::is_none) {
        warn!("No data rows after the header; every column gets the fallback type");
        return Ok(ColumnTypeMap::new());
    }
    Ok(combine::combine(&sample.chunks)?)
}

/// Runs the whole pipeline for `input` and writes the normalized file, schema,
/// DDL and load plan into `staging_dir`.
///
/// The normalized file is removed again if any later step fails, so a
/// failed run never leaves a loadable file behind.
pub fn prepare_file(
    input: &Path,
    staging_dir: &Path,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<LoadPlan> {
    let raw = RawFile::identify(input)?;
    let separator = config.separator_for(input);
    let patterns = config
        .compile_patterns(separator)
        .with_context(|| format!("Building null patterns for {input:?}"))?;
    let encoding = config.encoding()?;
    let table = naming::table_name_for(input, &config.acronyms);
    let run_id = Uuid::new_v4();
    let extension = if separator == b',' { "csv" } else { "tsv" };
    let normalized_path = staging_dir.join(format!("{table}-{run_id}.{extension}"));

    info!(
        "Preparing '{}' as table '{}' (separator '{}')",
        input.display(),
        table,
        printable_delimiter(separator)
    );
    let stats = normalize::normalize_file(
        &raw,
        &normalized_path,
        patterns.as_ref(),
        &config.normalize_options(&raw),
        encoding,
        cancel,
    )?;

    let finished = finish_plan(
        &raw,
        &normalized_path,
        &table,
        separator,
        run_id,
        stats,
        config,
        staging_dir,
        cancel,
    );
    match finished {
        Ok(plan) => Ok(plan),
        Err(err) => {
            if let Err(remove_err) = fs::remove_file(&normalized_path) {
                warn!("Could not remove {normalized_path:?} after failure: {remove_err}");
            }
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn finish_plan(
    raw: &RawFile,
    normalized_path: &Path,
    table: &str,
    separator: u8,
    run_id: Uuid,
    stats: NormalizeStats,
    config: &PipelineConfig,
    staging_dir: &Path,
    cancel: &CancellationToken,
) -> Result<LoadPlan> {
    let (schema, sample) = infer_schema(normalized_path, table, separator, UTF_8, config, cancel)?;
    let plan = LoadPlan {
        run_id,
        prepared_at: Utc::now(),
        source: raw.path.clone(),
        compression: raw.compression,
        normalized_path: normalized_path.to_path_buf(),
        schema,
        skip_lines: config.skip_rows + 1,
        separator: printable_delimiter(separator),
        quote: printable_delimiter(config.quote),
        null_marker: CANONICAL_NULL.to_string(),
        bytes_read: stats.bytes_read,
        bytes_written: stats.bytes_written,
        lines: stats.lines,
        sha256: stats.sha256,
    };
    let artifacts = write_artifacts(&plan, staging_dir)?;
    info!(
        "Table '{}': {} column(s) from {} sampled row(s); plan at {:?}",
        plan.schema.table,
        plan.schema.columns.len(),
        sample.rows_read,
        artifacts.plan
    );
    Ok(plan)
}

/// Writes the schema YAML, `CREATE TABLE` DDL and plan YAML for `plan`.
pub fn write_artifacts(plan: &LoadPlan, staging_dir: &Path) -> Result<Artifacts> {
    let artifacts = Artifacts::for_table(staging_dir, &plan.schema.table);
    plan.schema
        .save(&artifacts.schema)
        .with_context(|| format!("Writing schema to {:?}", artifacts.schema))?;
    io_utils::write_all(&artifacts.ddl, plan.schema.create_table_sql().as_bytes())?;
    plan.save(&artifacts.plan)
        .with_context(|| format!("Writing load plan to {:?}", artifacts.plan))?;
    Ok(artifacts)
}

/// Prepares every input on a pool of `workers` threads. Results come back in
/// input order; one failing file does not stop the others.
pub fn prepare_many(
    inputs: &[PathBuf],
    staging_dir: &Path,
    config: &PipelineConfig,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Result<LoadPlan>>> {
    fs::create_dir_all(staging_dir)
        .with_context(|| format!("Creating staging directory {staging_dir:?}"))?;
    ensure_distinct_tables(inputs, config)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .context("Building worker pool")?;
    info!(
        "Preparing {} file(s) with {} worker(s)",
        inputs.len(),
        workers.max(1)
    );
    let results = pool.install(|| {
        inputs
            .par_iter()
            .map(|input| {
                prepare_file(input, staging_dir, config, cancel)
                    .with_context(|| format!("Preparing {input:?}"))
            })
            .collect::<Vec<_>>()
    });
    Ok(results)
}

fn ensure_distinct_tables(inputs: &[PathBuf], config: &PipelineConfig) -> Result<()> {
    let mut seen: HashMap<String, &PathBuf> = HashMap::new();
    for input in inputs {
        let table = naming::table_name_for(input, &config.acronyms);
        if let Some(previous) = seen.insert(table.clone(), input) {
            return Err(anyhow!(
                "{previous:?} and {input:?} would both load into table '{table}'"
            ));
        }
    }
    Ok(())
}
