// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `scanner`: runs queued scan jobs, `--parallel` of them at a time.
//!
//! Each parallel slot is a separate worker process with its own network,
//! broker and store. Workers share a jobs directory and claim one job file
//! at a time by renaming it, so no job runs twice.
//!
//! ```text
//! jobs/web.yaml                 queued
//! jobs/web.yaml.claimed-0       running on worker 0
//! jobs/web.yaml.done            finished; report in web.yaml.report.json
//! jobs/web.yaml.failed          failed; reason in web.yaml.error
//! ```

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use scanweave_core::application::{ScanOrchestrator, ScanRequest};
use scanweave_core::domain::agent::AgentGroup;
use scanweave_core::domain::asset::Asset;
use scanweave_core::domain::scan::ScanPhase;

#[derive(Args, Debug, Clone)]
pub struct ScannerArgs {
    /// Number of scans to run concurrently, one worker process each
    #[arg(
        long,
        value_name = "N",
        default_value = "1",
        value_parser = parse_parallel,
        allow_hyphen_values = true
    )]
    pub parallel: u32,

    /// Directory holding scan job files
    #[arg(long, value_name = "DIR")]
    pub jobs: PathBuf,

    /// Keep polling for new jobs instead of exiting once the directory is drained
    #[arg(long)]
    pub watch: bool,

    /// Seconds between polls in --watch mode
    #[arg(long, default_value_t = 5)]
    pub poll_secs: u64,

    #[arg(long, hide = true)]
    pub worker: Option<u32>,
}

fn parse_parallel(raw: &str) -> Result<u32, String> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a valid integer", raw))?;
    if value < 1 {
        return Err(format!("{} is not in the range x>=1", value));
    }
    u32::try_from(value).map_err(|_| format!("{} is not in the range x>=1", value))
}

/// One queued scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub group: AgentGroup,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl ScanJob {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job {:?}", path))?;
        serde_yaml::from_str(&content).with_context(|| format!("Invalid job file {:?}", path))
    }

    pub fn into_request(self) -> ScanRequest {
        let request = ScanRequest::new(self.group, self.assets);
        match self.title {
            Some(title) => request.with_title(title),
            None => request,
        }
    }
}

/// Settings forwarded to worker processes through their environment.
#[derive(Debug, Clone)]
pub struct WorkerEnv {
    pub config_path: Option<PathBuf>,
    pub log_level: String,
    pub log_format: String,
}

pub async fn handle_command(
    args: ScannerArgs,
    config_path: Option<PathBuf>,
    env: WorkerEnv,
) -> Result<()> {
    match args.worker {
        Some(slot) => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });
            let (done, failed) = work(slot, &args, config_path, cancel).await?;
            info!(worker = slot, done, failed, "Worker finished");
            Ok(())
        }
        None => supervise(&args, &env).await,
    }
}

/// Command-line arguments of worker `slot`.
pub fn worker_args(args: &ScannerArgs, slot: u32) -> Vec<String> {
    let mut argv = vec![
        "scanner".to_string(),
        "--jobs".to_string(),
        args.jobs.display().to_string(),
        "--poll-secs".to_string(),
        args.poll_secs.to_string(),
        "--worker".to_string(),
        slot.to_string(),
    ];
    if args.watch {
        argv.push("--watch".to_string());
    }
    argv
}

async fn supervise(args: &ScannerArgs, env: &WorkerEnv) -> Result<()> {
    if !args.jobs.is_dir() {
        return Err(super::InvalidInput(anyhow::anyhow!(
            "Jobs directory {:?} does not exist",
            args.jobs
        ))
        .into());
    }
    let exe = std::env::current_exe().context("Failed to locate the scanweave executable")?;

    println!(
        "Starting {} scanner worker{} on {}",
        args.parallel,
        if args.parallel == 1 { "" } else { "s" },
        args.jobs.display()
    );

    let mut children = Vec::with_capacity(args.parallel as usize);
    for slot in 0..args.parallel {
        let mut command = tokio::process::Command::new(&exe);
        command
            .args(worker_args(args, slot))
            .env("SCANWEAVE_LOG_LEVEL", &env.log_level)
            .env("SCANWEAVE_LOG_FORMAT", &env.log_format);
        if let Some(path) = &env.config_path {
            command.env("SCANWEAVE_CONFIG_PATH", path);
        }
        let child = command
            .spawn()
            .with_context(|| format!("Failed to start scanner worker {}", slot))?;
        info!(worker = slot, pid = ?child.id(), "Started scanner worker");
        children.push((slot, child));
    }

    // Workers receive the interrupt themselves and tear their scans down;
    // the supervisor only waits for them.
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, waiting for workers to tear down...".yellow());
        }
    });

    let mut failed = 0;
    for (slot, mut child) in children {
        let status = child.wait().await?;
        if !status.success() {
            error!(worker = slot, %status, "Scanner worker failed");
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} scanner workers failed", failed, args.parallel);
    }
    println!("{}", "✓ All scanner workers finished".green());
    Ok(())
}

/// Runs jobs until the directory is drained, or until cancelled in watch
/// mode. Returns the number of finished and failed jobs.
async fn work(
    slot: u32,
    args: &ScannerArgs,
    config_path: Option<PathBuf>,
    cancel: CancellationToken,
) -> Result<(usize, usize)> {
    let config = super::load_config(config_path)?;
    let orchestrator = super::build_orchestrator(config)?;
    let poll = Duration::from_secs(args.poll_secs.max(1));

    let (mut done, mut failed) = (0, 0);
    while !cancel.is_cancelled() {
        match claim_next(&args.jobs, slot)? {
            Some(claim) => {
                if run_job(&orchestrator, &claim, cancel.clone()).await {
                    done += 1;
                } else {
                    failed += 1;
                }
            }
            None if args.watch => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
            None => break,
        }
    }
    Ok((done, failed))
}

/// A job file renamed for exclusive use by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    /// Name the job was queued under.
    pub original: PathBuf,
    pub claimed: PathBuf,
}

impl ClaimedJob {
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .original
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.original.with_file_name(name)
    }

    pub fn report_path(&self) -> PathBuf {
        self.sibling(".report.json")
    }

    pub fn error_path(&self) -> PathBuf {
        self.sibling(".error")
    }

    fn finish(&self, succeeded: bool) -> std::io::Result<()> {
        let target = self.sibling(if succeeded { ".done" } else { ".failed" });
        std::fs::rename(&self.claimed, target)
    }
}

fn is_job_file(path: &Path) -> bool {
    path.is_file()
        && matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        )
}

/// Claims the first queued job in name order. Rename is atomic, so a job
/// another worker claimed first is skipped.
pub fn claim_next(dir: &Path, slot: u32) -> Result<Option<ClaimedJob>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to list jobs in {:?}", dir))?;
    let mut queued: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| is_job_file(p))
        .collect();
    queued.sort();

    for original in queued {
        let job = ClaimedJob {
            claimed: {
                let mut name = original.file_name().map(|n| n.to_os_string()).unwrap_or_default();
                name.push(format!(".claimed-{}", slot));
                original.with_file_name(name)
            },
            original,
        };
        match std::fs::rename(&job.original, &job.claimed) {
            Ok(()) => return Ok(Some(job)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to claim {:?}", job.original))
            }
        }
    }
    Ok(None)
}

/// Runs one claimed job and records its outcome next to it.
async fn run_job(orchestrator: &ScanOrchestrator, claim: &ClaimedJob, cancel: CancellationToken) -> bool {
    info!(job = %claim.original.display(), "Running scan job");
    let outcome = async {
        let request = ScanJob::from_file(&claim.claimed)?.into_request();
        let report = super::scan::execute(orchestrator, request, cancel).await?;
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(claim.report_path(), json)
            .with_context(|| format!("Failed to write {:?}", claim.report_path()))?;
        Ok::<_, anyhow::Error>(report.phase == ScanPhase::Completed)
    }
    .await;

    let succeeded = match outcome {
        Ok(completed) => completed,
        Err(e) => {
            warn!(job = %claim.original.display(), "Scan job failed: {:#}", e);
            if let Err(write_err) = std::fs::write(claim.error_path(), format!("{:#}\n", e)) {
                warn!("Failed to record job error: {}", write_err);
            }
            false
        }
    };
    if let Err(e) = claim.finish(succeeded) {
        warn!(job = %claim.original.display(), "Failed to mark job finished: {}", e);
    }
    succeeded
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        scanner: ScannerArgs,
    }

    #[test]
    fn test_negative_parallel_is_rejected() {
        let err = TestCli::try_parse_from(["scanner", "--jobs", "/tmp", "--parallel", "-42"])
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("-42 is not in the range x>=1"));
    }

    #[test]
    fn test_zero_parallel_is_rejected() {
        let err = TestCli::try_parse_from(["scanner", "--jobs", "/tmp", "--parallel", "0"])
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("is not in the range"));
    }

    #[test]
    fn test_parallel_parses() {
        let cli = TestCli::try_parse_from(["scanner", "--jobs", "/tmp", "--parallel", "42"]).unwrap();
        assert_eq!(cli.scanner.parallel, 42);
        let cli = TestCli::try_parse_from(["scanner", "--jobs", "/tmp"]).unwrap();
        assert_eq!(cli.scanner.parallel, 1);
    }

    #[test]
    fn test_worker_args_round_trip_through_parser() {
        let cli = TestCli::try_parse_from(["scanner", "--jobs", "/srv/jobs", "--watch"]).unwrap();
        let argv = worker_args(&cli.scanner, 3);

        let worker = TestCli::try_parse_from(argv).unwrap().scanner;
        assert_eq!(worker.worker, Some(3));
        assert_eq!(worker.jobs, PathBuf::from("/srv/jobs"));
        assert!(worker.watch);
    }

    #[test]
    fn test_each_job_is_claimed_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "").unwrap();
        std::fs::write(dir.path().join("b.yml"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let first = claim_next(dir.path(), 0).unwrap().unwrap();
        let second = claim_next(dir.path(), 1).unwrap().unwrap();
        assert!(claim_next(dir.path(), 0).unwrap().is_none());

        assert_eq!(first.original, dir.path().join("a.yaml"));
        assert_eq!(first.claimed, dir.path().join("a.yaml.claimed-0"));
        assert_eq!(second.claimed, dir.path().join("b.yml.claimed-1"));
        assert!(first.claimed.exists());
        assert!(!first.original.exists());
    }

    #[test]
    fn test_finish_marks_outcome() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("web.yaml"), "").unwrap();
        let claim = claim_next(dir.path(), 0).unwrap().unwrap();

        claim.finish(false).unwrap();

        assert!(dir.path().join("web.yaml.failed").exists());
        assert_eq!(claim.report_path(), dir.path().join("web.yaml.report.json"));
    }

    #[test]
    fn test_job_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.yaml");
        std::fs::write(
            &path,
            r#"
title: nightly
group:
  kind: AgentGroup
  description: web
  agents:
    - key: agent/org/nmap
      replicas: 2
assets:
  - type: domain_name
    name: ostorlab.co
  - type: ipv4
    host: 8.8.8.8
"#,
        )
        .unwrap();

        let request = ScanJob::from_file(&path).unwrap().into_request();

        assert_eq!(request.title.as_deref(), Some("nightly"));
        assert_eq!(request.group.agents[0].replicas, 2);
        assert_eq!(request.assets[0], Asset::domain("ostorlab.co"));
        assert_eq!(request.assets[1].selector(), "v3.asset.ip.v4");
    }
}
