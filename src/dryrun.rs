//! Compute-unit dry-run client.
//!
//! `POST {cu}/dry-run?process-id=<pid>` evaluates a message against a process
//! without writing it. Replies carry the process's outgoing messages; point
//! lookups read the JSON in the first message's `Data`.

use crate::error::{Error, Result};
use crate::types::Tag;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Any owner works for read-only evaluation.
const DRY_RUN_OWNER: &str = "123456789";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DryRunEntry {
    pub process_id: String,
    /// `[{"name":..,"value":..}]` as sent
    pub tags_json: String,
    pub ts_ms: i64,
    pub ok: bool,
    /// Error text on failure, short summary of the reply otherwise.
    pub outcome: String,
}

/// Sink for issued dry-runs.
pub trait DryRunLog: Send + Sync {
    fn record(&self, entry: DryRunEntry);
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DryRunMessage {
    #[serde(rename = "Data", default)]
    pub data: Value,
    #[serde(rename = "Tags", default)]
    pub tags: Vec<Tag>,
}

impl DryRunMessage {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.iter().find(|t| t.name == name).map(|t| t.value.as_str())
    }

    /// `Data` is usually a JSON document serialized into a string.
    pub fn data_json(&self) -> Result<Value> {
        match &self.data {
            Value::String(s) => Ok(serde_json::from_str(s)?),
            Value::Null => Err(Error::DryRun("message has no data".into())),
            other => Ok(other.clone()),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DryRunResult {
    #[serde(rename = "Messages", default)]
    pub messages: Vec<DryRunMessage>,
    #[serde(rename = "Output", default)]
    pub output: Value,
}

impl DryRunResult {
    pub fn first_data_json(&self) -> Result<Value> {
        self.messages
            .first()
            .ok_or_else(|| Error::DryRun("reply has no messages".into()))?
            .data_json()
    }

    fn summary(&self) -> String {
        match self.messages.len() {
            1 => "1 message".to_string(),
            n => format!("{n} messages"),
        }
    }
}

/// Turn a CU reply body into a result, surfacing process-level errors.
pub fn parse_dry_run(body: Value) -> Result<DryRunResult> {
    for key in ["error", "Error"] {
        if let Some(e) = body.get(key).filter(|v| !v.is_null()) {
            let msg = e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string());
            return Err(Error::DryRun(msg));
        }
    }
    Ok(serde_json::from_value(body)?)
}

pub struct DryRunClient {
    cu_url: String,
    http: reqwest::Client,
    timeout: Duration,
    log: Option<Arc<dyn DryRunLog>>,
}

impl DryRunClient {
    pub fn new(cu_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().pool_max_idle_per_host(4).build()?;
        Ok(Self {
            cu_url: cu_url.into().trim_end_matches('/').to_string(),
            http,
            timeout,
            log: None,
        })
    }

    pub fn with_log(mut self, log: Arc<dyn DryRunLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// One attempt, no retry. 429 comes back as `Error::RateLimited`.
    pub async fn dry_run(&self, process_id: &str, tags: &[Tag]) -> Result<DryRunResult> {
        let res = self.send(process_id, tags).await;
        if let Some(log) = &self.log {
            log.record(DryRunEntry {
                process_id: process_id.to_string(),
                tags_json: serde_json::to_string(tags).unwrap_or_default(),
                ts_ms: chrono::Utc::now().timestamp_millis(),
                ok: res.is_ok(),
                outcome: match &res {
                    Ok(r) => r.summary(),
                    Err(e) => e.to_string(),
                },
            });
        }
        res
    }

    /// Shorthand for `Action=<action>` plus extra tags.
    pub async fn action(&self, process_id: &str, action: &str, extra: &[Tag]) -> Result<DryRunResult> {
        let mut tags = vec![Tag::new("Action", action)];
        tags.extend_from_slice(extra);
        self.dry_run(process_id, &tags).await
    }

    async fn send(&self, process_id: &str, tags: &[Tag]) -> Result<DryRunResult> {
        let url = format!("{}/dry-run", self.cu_url);
        let res = self
            .http
            .post(url)
            .query(&[("process-id", process_id)])
            .json(&json!({
                "Owner": DRY_RUN_OWNER,
                "Target": process_id,
                "Tags": tags,
            }))
            .timeout(self.timeout)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            log::debug!("[dry-run] {process_id} answered {status}");
            return Err(Error::from_status(status.as_u16(), "dry-run"));
        }
        parse_dry_run(res.json().await?)
    }
}
