//! Production [`GitHubApi`] for the server-fields backend: shells out to the
//! `gh` CLI against a GitHub Projects v2 board. Grounded on the teacher's
//! `worker/github.rs` — `Command::new("gh")`, `--json`/`--jq`, parse the
//! result as `serde_json::Value` rather than hand-rolled typed structs.
//!
//! Project item mutation is a two-call dance: `gh project item-edit` needs
//! the item's internal id (not the issue number) and the field's internal
//! id (not its name), so both are resolved once and cached.

use std::collections::HashMap;
use std::process::Command;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use crate::domain::{Task, TaskState};
use crate::ports::GitHubApi;

struct ProjectFields {
    state_field_id: String,
    state_options: HashMap<String, String>,
    worker_field_id: String,
    attempt_field_id: String,
}

pub struct GhCliApi {
    owner: String,
    project_number: u32,
    repo: Option<String>,
    fields: Mutex<Option<ProjectFields>>,
    item_ids: Mutex<HashMap<u64, String>>,
}

impl GhCliApi {
    pub fn new(owner: impl Into<String>, project_number: u32, repo: Option<String>) -> Self {
        GhCliApi {
            owner: owner.into(),
            project_number,
            repo,
            fields: Mutex::new(None),
            item_ids: Mutex::new(HashMap::new()),
        }
    }

    fn run_json(&self, args: &[&str]) -> Result<Value> {
        let output = Command::new("gh")
            .args(args)
            .output()
            .with_context(|| format!("failed to run gh {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "gh {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(&text)
            .with_context(|| format!("gh {} returned non-JSON output", args.join(" ")))
    }

    /// Resolves and caches the three project fields this adapter writes:
    /// `slaps-state` (single-select), `slaps-worker` (text),
    /// `slaps-attempt-count` (number). Reads only — provisioning the fields
    /// on the project is an operator setup step, not this adapter's job.
    fn with_fields<T>(&self, f: impl FnOnce(&ProjectFields) -> Result<T>) -> Result<T> {
        let mut guard = self.fields.lock().unwrap();
        if guard.is_none() {
            let list = self.run_json(&[
                "project",
                "field-list",
                &self.project_number.to_string(),
                "--owner",
                &self.owner,
                "--format",
                "json",
            ])?;
            let arr = list["fields"]
                .as_array()
                .cloned()
                .or_else(|| list.as_array().cloned())
                .unwrap_or_default();
            let find = |name: &str| arr.iter().find(|f| f["name"].as_str() == Some(name));

            let state = find("slaps-state")
                .ok_or_else(|| anyhow!("project field 'slaps-state' not found"))?;
            let state_field_id = state["id"].as_str().unwrap_or_default().to_string();
            let mut state_options = HashMap::new();
            if let Some(opts) = state["options"].as_array() {
                for o in opts {
                    if let (Some(name), Some(id)) = (o["name"].as_str(), o["id"].as_str()) {
                        state_options.insert(name.to_string(), id.to_string());
                    }
                }
            }
            let worker_field_id = find("slaps-worker")
                .ok_or_else(|| anyhow!("project field 'slaps-worker' not found"))?["id"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let attempt_field_id = find("slaps-attempt-count")
                .ok_or_else(|| anyhow!("project field 'slaps-attempt-count' not found"))?["id"]
                .as_str()
                .unwrap_or_default()
                .to_string();

            *guard = Some(ProjectFields {
                state_field_id,
                state_options,
                worker_field_id,
                attempt_field_id,
            });
        }
        f(guard.as_ref().unwrap())
    }

    /// Resolves and caches the project item id backing `issue`. Project
    /// items are addressed by item id, not issue number, in
    /// `gh project item-edit`.
    fn item_id(&self, issue: u64) -> Result<String> {
        if let Some(id) = self.item_ids.lock().unwrap().get(&issue) {
            return Ok(id.clone());
        }
        let list = self.run_json(&[
            "project",
            "item-list",
            &self.project_number.to_string(),
            "--owner",
            &self.owner,
            "--format",
            "json",
            "-L",
            "500",
        ])?;
        let items = list["items"]
            .as_array()
            .cloned()
            .or_else(|| list.as_array().cloned())
            .unwrap_or_default();
        for item in &items {
            if item["content"]["number"].as_u64() == Some(issue) {
                let id = item["id"].as_str().unwrap_or_default().to_string();
                self.item_ids.lock().unwrap().insert(issue, id.clone());
                return Ok(id);
            }
        }
        Err(anyhow!(
            "issue #{issue} is not tracked in project {}",
            self.project_number
        ))
    }

    fn edit_item(&self, item_id: &str, field_id: &str, flag: &str, value: &str) -> Result<()> {
        let status = Command::new("gh")
            .args([
                "project",
                "item-edit",
                "--id",
                item_id,
                "--field-id",
                field_id,
                "--project-id",
                &self.project_number.to_string(),
                flag,
                value,
            ])
            .status()
            .context("failed to run gh project item-edit")?;
        if !status.success() {
            return Err(anyhow!("gh project item-edit failed for item {item_id}"));
        }
        Ok(())
    }
}

impl GitHubApi for GhCliApi {
    fn set_state_field(&self, issue: u64, state: &str) -> Result<()> {
        let item_id = self.item_id(issue)?;
        self.with_fields(|fields| {
            let option_id = fields.state_options.get(state).ok_or_else(|| {
                anyhow!("unknown state option '{state}' on project field 'slaps-state'")
            })?;
            self.edit_item(
                &item_id,
                &fields.state_field_id,
                "--single-select-option-id",
                option_id,
            )
        })
    }

    fn set_worker_field(&self, issue: u64, worker: Option<&str>) -> Result<()> {
        let item_id = self.item_id(issue)?;
        self.with_fields(|fields| {
            self.edit_item(&item_id, &fields.worker_field_id, "--text", worker.unwrap_or(""))
        })
    }

    fn set_attempt_field(&self, issue: u64, attempt: u32) -> Result<()> {
        let item_id = self.item_id(issue)?;
        self.with_fields(|fields| {
            self.edit_item(
                &item_id,
                &fields.attempt_field_id,
                "--number",
                &attempt.to_string(),
            )
        })
    }

    fn fetch_blocked_by(&self, issue: u64) -> Result<Vec<u64>> {
        let body = self.fetch_issue_body(issue)?;
        Ok(parse_blocked_by(&body))
    }
}

impl GhCliApi {
    fn fetch_issue_body(&self, issue: u64) -> Result<String> {
        let mut args = vec![
            "issue".to_string(),
            "view".to_string(),
            issue.to_string(),
            "--json".to_string(),
            "body".to_string(),
        ];
        if let Some(repo) = &self.repo {
            args.push("--repo".to_string());
            args.push(repo.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let value = self.run_json(&arg_refs)?;
        Ok(value["body"].as_str().unwrap_or_default().to_string())
    }

    /// Lists every project item as a [`Task`], resolving each item's issue
    /// body for its prompt and `blockedBy` line in the same pass. This is
    /// the bulk read side of the adapter: the leader calls it once per
    /// cache refresh interval to reseed [`crate::queue::fields::FieldsQueueStore`]'s
    /// mirror, rather than the per-issue reads `fetch_blocked_by` does on
    /// its own.
    pub fn fetch_items(&self) -> Result<Vec<Task>> {
        let list = self.run_json(&[
            "project",
            "item-list",
            &self.project_number.to_string(),
            "--owner",
            &self.owner,
            "--format",
            "json",
            "-L",
            "500",
        ])?;
        let items = list["items"]
            .as_array()
            .cloned()
            .or_else(|| list.as_array().cloned())
            .unwrap_or_default();

        let mut tasks = Vec::with_capacity(items.len());
        for item in &items {
            let Some(issue) = item["content"]["number"].as_u64() else {
                continue;
            };
            if let Some(id) = item["id"].as_str() {
                self.item_ids.lock().unwrap().insert(issue, id.to_string());
            }
            let state = item["slaps-state"]
                .as_str()
                .and_then(TaskState::parse)
                .unwrap_or(TaskState::Blocked);
            let worker = item["slaps-worker"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());
            let attempt = item["slaps-attempt-count"].as_u64().unwrap_or(0) as u32;
            let wave = item["slaps-wave"].as_u64().unwrap_or(1) as u32;
            let prompt = self.fetch_issue_body(issue).unwrap_or_default();
            tasks.push(Task {
                issue,
                wave,
                state,
                attempt,
                worker,
                prompt,
                estimate_sec: None,
                timeout_sec: None,
            });
        }
        Ok(tasks)
    }
}

/// Extracts `blockedBy: [1, 2, 3]` (or `blockedBy: #1, #2`) from an issue
/// body line. An unrecognized format yields no blockers rather than an
/// error — an issue with no such line simply has none.
fn parse_blocked_by(body: &str) -> Vec<u64> {
    for line in body.lines() {
        let lower = line.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("blockedby:") {
            return rest
                .split(|c: char| !c.is_ascii_digit())
                .filter_map(|tok| tok.parse::<u64>().ok())
                .collect();
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_blocked_by_extracts_numbers_from_list_syntax() {
        assert_eq!(parse_blocked_by("blockedBy: [1, 2, 3]"), vec![1, 2, 3]);
    }

    #[test]
    fn parse_blocked_by_extracts_numbers_from_hash_syntax() {
        assert_eq!(parse_blocked_by("Some text\nblockedBy: #4, #5\n"), vec![4, 5]);
    }

    #[test]
    fn parse_blocked_by_missing_line_is_empty() {
        assert_eq!(parse_blocked_by("just a normal issue body"), Vec::new());
    }

    #[test]
    fn parse_blocked_by_is_case_insensitive_on_key() {
        assert_eq!(parse_blocked_by("BlockedBy: [7]"), vec![7]);
    }
}
