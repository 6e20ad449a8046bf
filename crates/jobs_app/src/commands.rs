//! Subcommand execution. Every command returns the process exit code.

use std::process::ExitCode;

use anyhow::{Context, Result};
use jobs_core::{CanonicalRecord, ErrorKind, RawRecord};
use jobs_engine::{
    read_jsonl, write_jsonl, JsonLinesSink, OrchestrationError, PipelineConfig, RunOrchestrator,
    RunReport, SiteSelection, StagingSink,
};
use pipeline_logging::{pipeline_error, pipeline_info, pipeline_warn};

use crate::cli::Command;

pub async fn execute(command: Command, config: PipelineConfig) -> Result<ExitCode> {
    match command {
        Command::Extract { sites } => extract(config, selection(sites)).await,
        Command::Transform => transform(config).await,
        Command::Load => load(config).await,
        Command::RunAll { sites } => run_all(config, selection(sites)).await,
    }
}

fn selection(sites: Vec<String>) -> SiteSelection {
    if sites.is_empty() {
        SiteSelection::All
    } else {
        SiteSelection::Only(sites)
    }
}

/// First Ctrl-C stops new fetches; records already extracted still finish the run.
fn cancel_on_interrupt(orchestrator: &RunOrchestrator) {
    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            pipeline_warn!("Interrupt received, no new pages will be fetched");
            token.cancel();
        }
    });
}

async fn extract(config: PipelineConfig, selection: SiteSelection) -> Result<ExitCode> {
    let orchestrator = RunOrchestrator::new(config).context("setting up the pipeline")?;
    cancel_on_interrupt(&orchestrator);

    let summary = orchestrator.extract(&selection).await?;
    let path = orchestrator.layout().staging_raw();
    write_jsonl(&path, &summary.records)
        .with_context(|| format!("writing {}", path.display()))?;

    for report in &summary.sites {
        match &report.failure {
            Some(failure) => pipeline_warn!(
                "site={} pages={} records={} aborted: {}",
                report.site,
                report.pages_fetched,
                report.extracted,
                failure.message
            ),
            None => pipeline_info!(
                "site={} pages={} records={}",
                report.site,
                report.pages_fetched,
                report.extracted
            ),
        }
    }
    pipeline_info!(
        "Staged {} raw record(s) in {:?} ({} listing failure(s))",
        summary.records.len(),
        path,
        summary.listing_failures.len()
    );

    let all_failed = summary.sites.iter().all(|report| report.failure.is_some());
    if orchestrator.cancellation_token().is_cancelled() || all_failed {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn transform(config: PipelineConfig) -> Result<ExitCode> {
    let orchestrator = RunOrchestrator::new(config).context("setting up the pipeline")?;
    let layout = orchestrator.layout().clone();
    let orchestrator = orchestrator.with_sink(StagingSink::new(layout.staging_canonical()));

    let raw_path = layout.staging_raw();
    let raw: Vec<RawRecord> = read_jsonl(&raw_path)
        .with_context(|| format!("reading {} (run `jobs extract` first)", raw_path.display()))?;
    pipeline_info!("Transforming {} staged raw record(s)", raw.len());

    let report = orchestrator.run_staged(raw).await?;
    Ok(finish(&report))
}

async fn load(config: PipelineConfig) -> Result<ExitCode> {
    let orchestrator = RunOrchestrator::new(config).context("setting up the pipeline")?;
    let layout = orchestrator.layout().clone();
    let orchestrator = orchestrator.with_sink(JsonLinesSink::new(layout.output_dir()));

    let canonical_path = layout.staging_canonical();
    let records: Vec<CanonicalRecord> = read_jsonl(&canonical_path).with_context(|| {
        format!("reading {} (run `jobs transform` first)", canonical_path.display())
    })?;
    let report = match orchestrator.reload(&records).await {
        Err(OrchestrationError::NoRunRecorded) => {
            anyhow::bail!("no run recorded yet (run `jobs transform` first)")
        }
        other => other.context("loading staged records")?,
    };
    for receipt in &report.receipts {
        pipeline_info!(
            "sink {} took {} record(s) -> {:?}",
            receipt.sink,
            receipt.records,
            receipt.location
        );
    }
    if report.failed_sinks > 0 {
        pipeline_error!(
            "Load of run {} failed in {} sink(s); recorded in the run history",
            report.record.run_id,
            report.failed_sinks
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_all(config: PipelineConfig, selection: SiteSelection) -> Result<ExitCode> {
    let orchestrator = RunOrchestrator::new(config).context("setting up the pipeline")?;
    let output_dir = orchestrator.layout().output_dir();
    let orchestrator = orchestrator.with_sink(JsonLinesSink::new(output_dir));
    cancel_on_interrupt(&orchestrator);

    let report = orchestrator.run(selection).await?;
    Ok(finish(&report))
}

/// Logs the per-site counts and maps the run outcome to an exit code.
fn finish(report: &RunReport) -> ExitCode {
    let run = &report.record;
    for (site, counts) in &run.sites {
        pipeline_info!(
            "site={} fetched={} extracted={} kept={} deduped={} failed={} corrected={}",
            site,
            counts.fetched,
            counts.extracted,
            counts.kept,
            counts.deduped,
            counts.failed,
            counts.corrected
        );
    }
    let load_failed = run.errors_of(ErrorKind::Load).next().is_some();
    if report.succeeded() && !load_failed {
        pipeline_info!("Run {} completed with {} record(s)", run.run_id, report.records.len());
        ExitCode::SUCCESS
    } else {
        pipeline_error!(
            "Run {} ended {} with {} error(s)",
            run.run_id,
            run.state(),
            run.errors.len()
        );
        ExitCode::FAILURE
    }
}
