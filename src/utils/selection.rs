use crate::backup::JobId;
use crate::error::{EngineError, Result};

/// Which jobs a command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSelection {
    All,
    Ids(Vec<JobId>),
}

impl JobSelection {
    /// Resolve against the configured ids. Explicit ids are kept even when
    /// unknown so the orchestrator can report them.
    pub fn resolve(&self, configured: impl IntoIterator<Item = JobId>) -> Vec<JobId> {
        match self {
            JobSelection::All => configured.into_iter().collect(),
            JobSelection::Ids(ids) => ids.clone(),
        }
    }
}

/// Parse `"1-3"`, `"1;3"`, `"1,3"`, mixes such as `"1-2;5"`, or `"*"`/`"all"`.
/// Duplicates are removed, first occurrence wins.
pub fn parse_job_selection(input: &str) -> Result<JobSelection> {
    let input = input.trim();
    if input == "*" || input.eq_ignore_ascii_case("all") {
        return Ok(JobSelection::All);
    }

    let mut ids = Vec::new();
    for part in input.split([';', ',']) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        match part.split_once('-') {
            Some((start, end)) => {
                let start = parse_id(start)?;
                let end = parse_id(end)?;
                if start > end {
                    return Err(EngineError::Selection(format!("empty range {}", part)));
                }
                ids.extend(start..=end);
            }
            None => ids.push(parse_id(part)?),
        }
    }

    if ids.is_empty() {
        return Err(EngineError::Selection("no job given".to_string()));
    }

    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(*id));
    Ok(JobSelection::Ids(ids))
}

fn parse_id(s: &str) -> Result<JobId> {
    s.trim()
        .parse()
        .map_err(|_| EngineError::Selection(format!("not a job id: {:?}", s.trim())))
}
