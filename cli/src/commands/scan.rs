// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `scan run`: one local scan from an agent group and a set of assets.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scanweave_core::application::{RunContext, ScanOrchestrator, ScanReport, ScanRequest};
use scanweave_core::domain::agent::{AgentGroup, AgentGroupEntry};
use scanweave_core::domain::asset::{Asset, FileAsset};
use scanweave_core::domain::scan::{ScanId, ScanPhase};
use scanweave_core::infrastructure::definition_parser::DefinitionParser;
use scanweave_core::infrastructure::EventBus;

use crate::output::{spawn_event_printer, BarProgress};

const EVENT_FLUSH_GRACE: Duration = Duration::from_millis(200);

#[derive(Subcommand)]
pub enum ScanCommand {
    /// Run a scan locally and wait for it to finish
    Run(RunArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Scan title
    #[arg(short, long)]
    pub title: Option<String>,

    /// Agent group definition (YAML)
    #[arg(short = 'g', long = "agent-group-definition", value_name = "FILE")]
    pub group: Option<PathBuf>,

    /// Agent key to run, repeatable; combined with the group file if both are given
    #[arg(short, long = "agent", value_name = "KEY")]
    pub agents: Vec<String>,

    #[command(flatten)]
    pub assets: AssetArgs,
}

/// Initial assets. Every occurrence of a flag becomes one asset.
#[derive(Args, Debug, Default, Clone)]
pub struct AssetArgs {
    /// Domain name
    #[arg(long = "domain", value_name = "NAME")]
    pub domains: Vec<String>,

    /// IPv4 or IPv6 address, optionally with a `/mask`
    #[arg(long = "ip", value_name = "ADDRESS")]
    pub ips: Vec<String>,

    /// Web link
    #[arg(long = "link", value_name = "URL")]
    pub links: Vec<String>,

    /// File on disk
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// File to be downloaded by the agents
    #[arg(long = "url", value_name = "URL")]
    pub file_urls: Vec<String>,

    /// Android APK
    #[arg(long = "apk", value_name = "PATH")]
    pub apks: Vec<PathBuf>,

    /// Android App Bundle
    #[arg(long = "aab", value_name = "PATH")]
    pub aabs: Vec<PathBuf>,

    /// iOS IPA
    #[arg(long = "ipa", value_name = "PATH")]
    pub ipas: Vec<PathBuf>,

    /// Android store package name
    #[arg(long = "android-store", value_name = "PACKAGE")]
    pub android_packages: Vec<String>,

    /// iOS store bundle id
    #[arg(long = "ios-store", value_name = "BUNDLE_ID")]
    pub ios_bundles: Vec<String>,
}

impl AssetArgs {
    pub fn collect(&self) -> Result<Vec<Asset>> {
        let mut assets = Vec::new();
        assets.extend(self.domains.iter().map(Asset::domain));
        for ip in &self.ips {
            assets.push(Asset::ip(ip).map_err(|e| super::InvalidInput(anyhow::anyhow!(e)))?);
        }
        assets.extend(self.links.iter().map(Asset::link));
        for path in &self.files {
            assets.push(Asset::File(read_file(path)?));
        }
        assets.extend(
            self.file_urls
                .iter()
                .map(|url| Asset::File(FileAsset::from_url(url.clone()))),
        );
        for path in &self.apks {
            assets.push(Asset::AndroidApk(read_file(path)?));
        }
        for path in &self.aabs {
            assets.push(Asset::AndroidAab(read_file(path)?));
        }
        for path in &self.ipas {
            assets.push(Asset::IosIpa(read_file(path)?));
        }
        assets.extend(self.android_packages.iter().map(|p| Asset::AndroidStore {
            package_name: p.clone(),
        }));
        assets.extend(self.ios_bundles.iter().map(|b| Asset::IosStore {
            bundle_id: b.clone(),
        }));
        Ok(assets)
    }
}

fn read_file(path: &PathBuf) -> Result<FileAsset> {
    FileAsset::from_path(path).with_context(|| format!("Failed to read asset {:?}", path))
}

impl RunArgs {
    pub fn request(&self) -> Result<ScanRequest> {
        let mut group = match &self.group {
            Some(path) => DefinitionParser::parse_group_file(path)
                .map_err(|e| super::InvalidInput(e.into()))
                .with_context(|| format!("Failed to load agent group {:?}", path))?,
            None => AgentGroup::new("Agent group from the command line", Vec::new()),
        };
        group
            .agents
            .extend(self.agents.iter().map(|key| AgentGroupEntry::new(key.as_str())));
        if group.agents.is_empty() {
            return Err(super::InvalidInput(anyhow::anyhow!(
                "No agents to run: pass --agent-group-definition or --agent"
            ))
            .into());
        }

        let assets = self.assets.collect()?;
        if assets.is_empty() {
            warn!("Starting a scan without initial assets");
        }

        let mut request = ScanRequest::new(group, assets);
        if let Some(title) = &self.title {
            request = request.with_title(title.clone());
        }
        Ok(request)
    }
}

pub async fn handle_command(command: ScanCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        ScanCommand::Run(args) => run(args, config_path).await,
    }
}

async fn run(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let request = args.request()?;
    let config = super::load_config(config_path)?;
    let orchestrator = super::build_orchestrator(config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, tearing down scan...".yellow());
            on_interrupt.cancel();
        }
    });

    let report = execute(&orchestrator, request, cancel).await?;
    print_report(&report);
    if report.phase != ScanPhase::Completed {
        anyhow::bail!("Scan {} ended {}", report.scan_id, report.phase);
    }
    Ok(())
}

/// Runs one scan with terminal progress and lifecycle output.
pub async fn execute(
    orchestrator: &ScanOrchestrator,
    request: ScanRequest,
    cancel: CancellationToken,
) -> Result<ScanReport> {
    let scan_id = ScanId::new();
    let events = EventBus::with_default_capacity();
    let mut printer = spawn_event_printer(events.subscribe_scan(scan_id));

    let ctx = RunContext::new(scan_id)
        .with_events(events)
        .with_progress(Arc::new(BarProgress::new()))
        .with_cancel(cancel);

    info!("Starting scan {}", scan_id);
    let result = orchestrator.run(request, ctx).await;
    let _ = tokio::time::timeout(EVENT_FLUSH_GRACE, &mut printer).await;
    printer.abort();

    result.with_context(|| format!("Scan {} failed", scan_id))
}

pub fn print_report(report: &ScanReport) {
    let phase = match report.phase {
        ScanPhase::Completed => report.phase.to_string().green(),
        _ => report.phase.to_string().red(),
    };
    println!();
    println!("{} {}", "Scan".bold(), report.scan_id);
    if let Some(title) = &report.title {
        println!("  Title: {}", title);
    }
    println!("  Status: {}", phase);
    if let Some(completion) = report.completion {
        println!("  Completion: {:?}", completion);
    }
    println!("  Assets injected: {}", report.injected);
    for agent in &report.agents {
        println!(
            "  {} on {} ({} replicas)",
            agent.key.to_string().bold(),
            agent.queue,
            agent.services.len()
        );
    }
    if !report.teardown.is_clean() {
        println!("{}", "  Teardown left resources behind:".yellow());
        for failure in &report.teardown.failures {
            println!("    {} {}", failure.name, failure.error);
        }
    }
}
