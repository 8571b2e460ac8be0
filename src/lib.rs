pub mod cli;
pub mod config;
pub mod data;
pub mod dataset;
pub mod encoding;
pub mod error;
pub mod io_utils;
pub mod loader;
pub mod lookup;
pub mod pipeline;
pub mod profile;
pub mod quality;
pub mod report;
pub mod schema;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{
        AnalyzeArgs, Cli, Commands, LoadArgs, NormalizeArgs, RunArgs, SourceArgs, StorageMode,
        TargetArgs,
    },
    config::{ColumnStorage, DEFAULT_TEXT_WIDTH, PipelineConfig},
    dataset::TabularDataset,
    error::PipelineError,
    io_utils::AppendLog,
    loader::{LoadSummary, LogProgress, SqliteSink},
    lookup::{CachedLookup, StaticLookup},
    report::{ReportOptions, RunSummary},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("admission_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Normalize(args) => handle_normalize(&args),
        Commands::Analyze(args) => handle_analyze(&args),
        Commands::Load(args) => handle_load(&args),
        Commands::Run(args) => handle_run(&args),
    }
}

fn source_config(args: &SourceArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if !args.encodings.is_empty() {
        config.encodings = args.encodings.clone();
    }
    if args.lenient {
        config.lenient = true;
    }
    config.validate()?;
    debug!("Effective configuration:\n{}", config.to_yaml_string()?);
    Ok(config)
}

fn apply_target(config: &mut PipelineConfig, target: &TargetArgs) -> Result<()> {
    if let Some(batch_size) = target.batch_size {
        config.load.batch_size = batch_size;
    }
    if let Some(sample_rows) = target.sample_rows {
        config.load.sample_rows = sample_rows;
    }
    if let Some(table) = &target.table {
        config.load.table_name = Some(table.clone());
    }
    let width = match (target.width, config.load.storage) {
        (Some(width), _) => width,
        (None, ColumnStorage::BoundedText { width }) => width,
        (None, ColumnStorage::Inferred) => DEFAULT_TEXT_WIDTH,
    };
    config.load.storage = match target.storage {
        Some(StorageMode::Inferred) => ColumnStorage::Inferred,
        Some(StorageMode::Bounded) => ColumnStorage::BoundedText { width },
        None => match config.load.storage {
            ColumnStorage::BoundedText { .. } => ColumnStorage::BoundedText { width },
            ColumnStorage::Inferred => ColumnStorage::Inferred,
        },
    };
    config.validate()
}

fn entity_lookup(path: Option<&Path>) -> Result<CachedLookup<StaticLookup>> {
    let names = match path {
        Some(path) => StaticLookup::from_yaml_file(path)?,
        None => StaticLookup::default(),
    };
    Ok(CachedLookup::new(names))
}

fn prepare(
    args: &SourceArgs,
    config: &PipelineConfig,
) -> Result<(encoding::ResolvedText, TabularDataset)> {
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    info!(
        "Reading '{}' with delimiter '{}'",
        args.input.display(),
        printable_delimiter(delimiter)
    );
    pipeline::prepare(&args.input, delimiter, config)
        .with_context(|| format!("Preparing {:?}", args.input))
}

/// Writes the normalized text and its repair report; returns the report.
fn write_normalized(
    input: &Path,
    output: Option<&Path>,
    report: Option<&Path>,
    resolved: &encoding::ResolvedText,
) -> Result<String> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| io_utils::sibling_path(input, "_utf8.csv"));
    io_utils::write_text(&output, &resolved.text)?;
    let report_path = report
        .map(Path::to_path_buf)
        .unwrap_or_else(|| io_utils::sibling_path(input, "_encoding_report.txt"));
    let rendered = resolved.report.render(resolved.encoding);
    io_utils::write_text(&report_path, &rendered)?;
    info!(
        "Normalized {} line(s) from {} into {output:?}; repair report at {report_path:?}",
        resolved.report.total_lines,
        resolved.encoding.name()
    );
    Ok(rendered)
}

fn handle_normalize(args: &NormalizeArgs) -> Result<()> {
    let config = source_config(&args.source)?;
    let resolved = pipeline::normalize_source(&args.source.input, &config)
        .with_context(|| format!("Normalizing {:?}", args.source.input))?;
    let report = write_normalized(
        &args.source.input,
        args.output.as_deref(),
        args.report.as_deref(),
        &resolved,
    )?;
    print!("{report}");
    Ok(())
}

fn handle_analyze(args: &AnalyzeArgs) -> Result<()> {
    let mut config = source_config(&args.source)?;
    let (_, mut dataset) = prepare(&args.source, &config)?;
    if !args.only_entities.is_empty() {
        config.rules.hospitals = args.only_entities.clone();
        dataset = pipeline::restrict_to_entities(dataset, &config)?;
    }
    let report = pipeline::analyze(&dataset, &config);
    let lookup = entity_lookup(args.entity_names.as_deref())?;
    let options = ReportOptions {
        incompleteness_warning: config.rules.incompleteness_warning,
        max_listed_rows: args.max_rows,
    };
    print!("{}", report::render_quality_report(&report, &lookup, &options));
    if args.completeness {
        println!();
        print!(
            "{}",
            report::render_completeness(&quality::completeness_report(&dataset))
        );
    }
    if let Some(path) = &args.json {
        report::write_json(path, &report)?;
        info!("Findings written to {path:?}");
    }
    if let Some(path) = &args.export {
        let delimiter = io_utils::resolve_input_delimiter(path, args.source.delimiter);
        pipeline::export_dataset(&dataset, path, delimiter)?;
        info!("Exported {} row(s) to {path:?}", dataset.row_count());
    }
    Ok(())
}

fn load_into_target(
    source: &SourceArgs,
    target: &TargetArgs,
    config: &PipelineConfig,
    dataset: &mut TabularDataset,
) -> Result<LoadSummary> {
    let table = pipeline::table_name_for(&source.input, config);
    let schema = pipeline::infer_schema(dataset, &table, config)?;
    let ddl_path = target
        .ddl
        .clone()
        .unwrap_or_else(|| io_utils::sibling_path(&target.database, "_schema.sql"));
    io_utils::write_text(&ddl_path, &schema.create_table_sql())?;
    info!("DDL for '{}' written to {ddl_path:?}", schema.table);

    let audit_path = target
        .audit_log
        .clone()
        .unwrap_or_else(|| io_utils::sibling_path(&target.database, "_load_errors.log"));
    let audit_log = AppendLog::open(&audit_path)?;
    let sink = SqliteSink::open(&target.database)?;
    let summary = pipeline::load(
        dataset,
        &schema,
        config,
        sink,
        Some(audit_log),
        &mut LogProgress,
    )
    .with_context(|| format!("Loading into {:?}", target.database))?;
    if summary.rows_failed > 0 {
        info!("Rejected batches recorded in {audit_path:?}");
    }
    Ok(summary)
}

/// Turns a halted load into an error once its summary has been shown.
fn ensure_completed(summary: &LoadSummary) -> Result<()> {
    match &summary.halted {
        Some(reason) => Err(PipelineError::ConnectionFailure(reason.clone())).with_context(|| {
            format!(
                "Loading into '{}' stopped with {} row(s) not attempted",
                summary.table,
                summary.rows_unprocessed()
            )
        }),
        None => Ok(()),
    }
}

fn handle_load(args: &LoadArgs) -> Result<()> {
    let mut config = source_config(&args.source)?;
    apply_target(&mut config, &args.target)?;
    let (_, mut dataset) = prepare(&args.source, &config)?;
    let summary = load_into_target(&args.source, &args.target, &config, &mut dataset)?;
    let outcome = ensure_completed(&summary);
    let run_summary = RunSummary {
        rows_processed: dataset.row_count(),
        load: Some(summary),
        ..RunSummary::default()
    };
    print!("{}", run_summary.render());
    outcome
}

fn handle_run(args: &RunArgs) -> Result<()> {
    let mut config = source_config(&args.source)?;
    apply_target(&mut config, &args.target)?;
    let (resolved, mut dataset) = prepare(&args.source, &config)?;
    write_normalized(&args.source.input, args.output.as_deref(), None, &resolved)?;

    let report = pipeline::analyze(&dataset, &config);
    let lookup = entity_lookup(args.entity_names.as_deref())?;
    let options = ReportOptions {
        incompleteness_warning: config.rules.incompleteness_warning,
        ..ReportOptions::default()
    };
    let rendered = report::render_quality_report(&report, &lookup, &options);
    match &args.quality_report {
        Some(path) => {
            io_utils::write_text(path, &rendered)?;
            info!("Quality report written to {path:?}");
        }
        None => print!("{rendered}"),
    }

    let mut summary = RunSummary {
        rows_processed: dataset.row_count(),
        encoding: Some(resolved.encoding.name().to_string()),
        problematic_lines: resolved.report.problematic.len(),
        ..RunSummary::default()
    };
    summary.record_quality(&report);
    let load = load_into_target(&args.source, &args.target, &config, &mut dataset)?;
    let outcome = ensure_completed(&load);
    summary.load = Some(load);

    let rendered = summary.render();
    for line in rendered.lines() {
        info!("{line}");
    }
    println!();
    print!("{rendered}");
    if let Some(path) = &args.summary_json {
        report::write_json(path, &summary)?;
    }
    outcome
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
