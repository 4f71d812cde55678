pub mod cancel;
pub mod cli;
pub mod combine;
pub mod config;
pub mod error;
pub mod io_utils;
pub mod naming;
pub mod normalize;
pub mod patterns;
pub mod pipeline;
pub mod sampler;
pub mod schema;
pub mod table;

use std::{
    env,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    sync::OnceLock,
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cancel::CancellationToken,
    cli::{Cli, Commands},
    config::PipelineConfig,
    io_utils::RawFile,
    schema::{ColumnTypeMap, TextualTypeMap},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging(verbose: bool) {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            let level = if verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            };
            builder.filter_module("loadprep", level);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Normalize(args) => handle_normalize(&args),
        Commands::Infer(args) => handle_infer(&args),
        Commands::Combine(args) => handle_combine(&args),
        Commands::Columns(args) => handle_columns(&args),
        Commands::Prepare(args) => handle_prepare(&args),
    }
}

fn handle_normalize(args: &cli::NormalizeArgs) -> Result<()> {
    let config = args.common.resolve()?;
    let raw = RawFile::identify(&args.input)?;
    let separator = config.separator_for(&args.input);
    let patterns = config
        .compile_patterns(separator)
        .with_context(|| format!("Building null patterns for {:?}", args.input))?;
    debug!(
        "Null tokens {:?} with separator '{}'",
        config.null_tokens,
        printable_delimiter(separator)
    );
    let stats = normalize::normalize_file(
        &raw,
        &args.output,
        patterns.as_ref(),
        &config.normalize_options(&raw),
        config.encoding()?,
        &CancellationToken::new(),
    )?;
    info!(
        "Normalized {} byte(s) into {} byte(s), sha256 {}",
        stats.bytes_read, stats.bytes_written, stats.sha256
    );
    Ok(())
}

fn handle_infer(args: &cli::InferArgs) -> Result<()> {
    let config = args.common.resolve()?;
    let separator = config.separator_for(&args.input);
    let table = args
        .table
        .clone()
        .unwrap_or_else(|| naming::table_name_for(&args.input, &config.acronyms));
    info!(
        "Inferring types for '{}' using delimiter '{}'",
        args.input.display(),
        printable_delimiter(separator)
    );
    let (schema, sample) = pipeline::infer_schema(
        &args.input,
        &table,
        separator,
        config.encoding()?,
        &config,
        &CancellationToken::new(),
    )?;

    if let Some(path) = &args.chunks_out {
        let file = File::create(path).with_context(|| format!("Creating {path:?}"))?;
        serde_json::to_writer_pretty(file, &sample.chunks)
            .with_context(|| format!("Writing chunk type maps to {path:?}"))?;
        info!("{} chunk type map(s) written to {:?}", sample.chunks.len(), path);
    }
    if let Some(path) = &args.schema_out {
        schema
            .save(path)
            .with_context(|| format!("Writing schema to {path:?}"))?;
        info!("Schema for {} column(s) written to {:?}", schema.columns.len(), path);
    }
    let (headers, rows) = table::schema_rows(&schema);
    table::print_table(&headers, &rows);
    Ok(())
}

fn handle_combine(args: &cli::CombineArgs) -> Result<()> {
    let mut chunks: Vec<Option<TextualTypeMap>> = Vec::new();
    for path in &args.inputs {
        let file = File::open(path).with_context(|| format!("Opening {path:?}"))?;
        let mut parsed: Vec<Option<TextualTypeMap>> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing chunk type maps from {path:?}"))?;
        debug!("{} chunk(s) read from {:?}", parsed.len(), path);
        chunks.append(&mut parsed);
    }
    let merged = combine::combine_tokens(&chunks)?;
    match &args.output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Creating {path:?}"))?;
            serde_json::to_writer_pretty(file, &merged)
                .with_context(|| format!("Writing merged type map to {path:?}"))?;
            info!("Merged {} chunk(s) into {:?}", chunks.len(), path);
        }
        None => print_type_map(&merged),
    }
    Ok(())
}

fn print_type_map(types: &ColumnTypeMap) {
    let (headers, rows) = table::type_map_rows(types);
    table::print_table(&headers, &rows);
}

fn handle_columns(args: &cli::ColumnsArgs) -> Result<()> {
    let config = args.common.resolve()?;
    let raws = match &args.input {
        Some(path) => read_header(path, &config)?,
        None => args.names.clone(),
    };
    if raws.is_empty() {
        return Err(anyhow!("No column names given"));
    }
    let names = naming::normalize_names(&raws, &config.acronyms, config.collision_policy)?;
    let headers = vec!["column".to_string(), "name".to_string()];
    let rows = raws
        .into_iter()
        .zip(names)
        .map(|(raw, name)| vec![raw, name])
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    Ok(())
}

fn read_header(path: &Path, config: &PipelineConfig) -> Result<Vec<String>> {
    let raw = RawFile::identify(path)?;
    let reader = io_utils::open_decompressed(&raw)?;
    let mut buffered = BufReader::new(io_utils::transcode_to_utf8(reader, config.encoding()?));
    io_utils::skip_lines(&mut buffered, config.skip_rows)
        .with_context(|| format!("Skipping leading lines of {path:?}"))?;
    let strip_vcf = config.strip_vcf_header.unwrap_or_else(|| raw.is_vcf());
    if strip_vcf {
        while buffered
            .fill_buf()
            .with_context(|| format!("Reading {path:?}"))?
            .starts_with(b"##")
        {
            io_utils::skip_lines(&mut buffered, 1)?;
        }
    }
    let mut csv_reader = io_utils::open_csv_reader(
        buffered,
        config.separator_for(path),
        config.quote,
        config.quoting,
        true,
    );
    let header = csv_reader
        .byte_headers()
        .with_context(|| format!("Reading header of {path:?}"))?;
    let mut names = io_utils::decode_record(header, encoding_rs::UTF_8)?;
    if strip_vcf
        && let Some(first) = names.first_mut()
        && let Some(stripped) = first.strip_prefix('#')
    {
        *first = stripped.to_string();
    }
    Ok(names)
}

fn handle_prepare(args: &cli::PrepareArgs) -> Result<()> {
    let config = args.common.resolve()?;
    let results = pipeline::prepare_many(
        &args.inputs,
        &args.staging,
        &config,
        args.workers,
        &CancellationToken::new(),
    )?;

    let headers = ["input", "table", "columns", "lines", "normalized"]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let mut rows = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (input, result) in args.inputs.iter().zip(results) {
        match result {
            Ok(plan) => rows.push(vec![
                input.display().to_string(),
                plan.schema.table.clone(),
                plan.schema.columns.len().to_string(),
                plan.lines.to_string(),
                plan.normalized_path.display().to_string(),
            ]),
            Err(err) => {
                log::error!("{err:#}");
                failures.push(input.display().to_string());
            }
        }
    }
    if !rows.is_empty() {
        table::print_table(&headers, &rows);
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "{} of {} file(s) failed: {}",
            failures.len(),
            args.inputs.len(),
            failures.join(", ")
        ))
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
