use anyhow::{anyhow, Context, Result};
use localocr_core::{StageId, StageOutcome, StageStatus};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::layout::WorkspaceLayout;

const RUN_JOURNAL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Succeeded,
    Failed { class: String },
}

/// Bookkeeping about the last run, not provisioned state. It is rewritten on
/// every run with a fresh timestamp, so it is the one file under the workspace
/// root that a repeated run on a complete install changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunJournal {
    pub outcomes: Vec<StageOutcome>,
    pub result: RunResult,
    pub finished_at_unix: u64,
}

/// Overwrites `.localocr/last-run` with `journal`.
pub fn write_run_journal(layout: &WorkspaceLayout, journal: &RunJournal) -> Result<PathBuf> {
    let path = layout.run_journal_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut payload = String::new();
    payload.push_str(&format!("version={RUN_JOURNAL_VERSION}\n"));
    for outcome in &journal.outcomes {
        payload.push_str(&format!(
            "stage={}\t{}\t{}\n",
            outcome.stage.ordinal(),
            outcome.stage.as_str(),
            outcome.status.as_str()
        ));
    }
    match &journal.result {
        RunResult::Succeeded => payload.push_str("result=ok\n"),
        RunResult::Failed { class } => {
            payload.push_str("result=failed\n");
            payload.push_str(&format!("failure_class={class}\n"));
        }
    }
    payload.push_str(&format!("finished_at_unix={}\n", journal.finished_at_unix));

    fs::write(&path, payload.as_bytes())
        .with_context(|| format!("failed to write run journal: {}", path.display()))?;
    Ok(path)
}

pub fn read_run_journal(layout: &WorkspaceLayout) -> Result<Option<RunJournal>> {
    let path = layout.run_journal_path();
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read run journal: {}", path.display()))?;
    parse_run_journal(&raw)
        .map(Some)
        .with_context(|| format!("failed to parse run journal: {}", path.display()))
}

pub(crate) fn parse_run_journal(raw: &str) -> Result<RunJournal> {
    let mut outcomes = Vec::new();
    let mut result = None;
    let mut failure_class = None;
    let mut finished_at_unix = None;

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((key, value)) = line.split_once('=') else {
            return Err(anyhow!("invalid run journal row: {line}"));
        };
        match key {
            "version" => {
                let version = value
                    .parse::<u32>()
                    .context("run journal version must be u32")?;
                if version != RUN_JOURNAL_VERSION {
                    return Err(anyhow!("unsupported run journal version: {version}"));
                }
            }
            "stage" => outcomes.push(parse_stage_row(value)?),
            "result" => result = Some(value.to_string()),
            "failure_class" => failure_class = Some(value.to_string()),
            "finished_at_unix" => {
                finished_at_unix = Some(
                    value
                        .parse::<u64>()
                        .context("finished_at_unix must be u64")?,
                );
            }
            _ => {}
        }
    }

    let result = match result.as_deref() {
        Some("ok") => RunResult::Succeeded,
        Some("failed") => RunResult::Failed {
            class: failure_class.unwrap_or_else(|| "unknown".to_string()),
        },
        Some(other) => return Err(anyhow!("invalid run result: {other}")),
        None => return Err(anyhow!("run journal missing result")),
    };

    Ok(RunJournal {
        outcomes,
        result,
        finished_at_unix: finished_at_unix
            .ok_or_else(|| anyhow!("run journal missing finished_at_unix"))?,
    })
}

fn parse_stage_row(value: &str) -> Result<StageOutcome> {
    let parts = value.split('\t').collect::<Vec<_>>();
    let [ordinal, name, status] = parts.as_slice() else {
        return Err(anyhow!("invalid stage row format: {value}"));
    };
    let ordinal = ordinal
        .parse::<u8>()
        .with_context(|| format!("invalid stage ordinal: {ordinal}"))?;
    let stage = StageId::from_ordinal(ordinal)
        .ok_or_else(|| anyhow!("unknown stage ordinal: {ordinal}"))?;
    if stage.as_str() != *name {
        return Err(anyhow!(
            "stage row name '{name}' does not match ordinal {ordinal}"
        ));
    }
    let status =
        StageStatus::parse(status).ok_or_else(|| anyhow!("invalid stage status: {status}"))?;
    Ok(StageOutcome { stage, status })
}

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before UNIX_EPOCH")?
        .as_secs())
}
