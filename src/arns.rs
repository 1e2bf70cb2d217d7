//! ArNS lookups against the AR.IO network process.
//!
//! Every call goes through one shared [`RequestThrottler`] and is retried on
//! rate limits. Point lookups degrade to `None` when the network misbehaves,
//! record pages propagate their error so the table can offer a retry.

use crate::cache::TtlCache;
use crate::dryrun::DryRunClient;
use crate::error::{Error, Result};
use crate::net::RetryPolicy;
use crate::throttle::RequestThrottler;
use crate::types::{ArnsRecord, ArnsRecordsPage, ArnsResolution, Tag};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Records scanned by the reverse lookup.
pub const REVERSE_LOOKUP_SCAN: usize = 100;

/// Sort keys the registry accepts for `Paginated-Records`.
pub const RECORD_SORT_FIELDS: [&str; 3] = ["startTimestamp", "name", "endTimestamp"];

/// Memo caches, built once at startup and handed in.
pub struct ArnsCaches {
    pub ant_check: TtlCache<String, bool>,
    pub reverse_lookup: TtlCache<String, Option<String>>,
    pub primary_name: TtlCache<String, Option<String>>,
}

impl ArnsCaches {
    pub fn new(ant_ttl: Duration, ant_max: usize, arns_ttl: Duration) -> Self {
        Self {
            ant_check: TtlCache::new("ant-check", ant_ttl, ant_max),
            reverse_lookup: TtlCache::new("arns-reverse", arns_ttl, 1_000),
            primary_name: TtlCache::new("arns-primary", arns_ttl, 1_000),
        }
    }
}

impl Default for ArnsCaches {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 100, Duration::from_secs(86_400))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecordsPage {
    #[serde(default)]
    items: Vec<ArnsRecord>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
    #[serde(default)]
    total_items: u64,
}

#[derive(Deserialize)]
struct RawPrimaryName {
    name: Option<String>,
}

/// The fields of an ANT `State` reply used here.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AntState {
    owner: Option<String>,
    logo: Option<String>,
    #[serde(default)]
    records: Value,
}

impl AntState {
    fn root_tx(&self) -> Option<String> {
        self.records
            .get("@")
            .and_then(|r| r.get("transactionId"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

pub struct ArnsService {
    dry_run: Arc<DryRunClient>,
    ario_process: String,
    throttler: Arc<RequestThrottler>,
    retry: RetryPolicy,
    caches: Arc<ArnsCaches>,
}

impl ArnsService {
    pub fn new(
        dry_run: Arc<DryRunClient>,
        ario_process: impl Into<String>,
        throttler: Arc<RequestThrottler>,
        retry: RetryPolicy,
        caches: Arc<ArnsCaches>,
    ) -> Self {
        Self {
            dry_run,
            ario_process: ario_process.into(),
            throttler,
            retry,
            caches,
        }
    }

    pub fn caches(&self) -> &ArnsCaches {
        &self.caches
    }

    /// Throttled, retried dry-run returning the first message's JSON data.
    async fn query(&self, process_id: &str, action: &str, tags: Vec<Tag>) -> Result<Value> {
        let client = self.dry_run.as_ref();
        let tags = tags.as_slice();
        self.throttler
            .throttle(|| {
                self.retry.run(move || async move {
                    client.action(process_id, action, tags).await?.first_data_json()
                })
            })
            .await
    }

    /// One page of the registry. The cursor is the name of the last record seen.
    pub async fn get_records(
        &self,
        limit: usize,
        cursor: Option<&str>,
        sort_by: &str,
        ascending: bool,
    ) -> Result<ArnsRecordsPage> {
        let mut tags = vec![
            Tag::new("Limit", limit.to_string()),
            Tag::new("Sort-By", sort_by),
            Tag::new("Sort-Order", if ascending { "asc" } else { "desc" }),
        ];
        if let Some(c) = cursor {
            tags.push(Tag::new("Cursor", c));
        }
        let data = self.query(&self.ario_process, "Paginated-Records", tags).await?;
        let raw: RawRecordsPage = serde_json::from_value(data)?;
        Ok(ArnsRecordsPage {
            items: raw.items,
            has_more: raw.has_more,
            next_cursor: raw.next_cursor,
            total_items: raw.total_items,
        })
    }

    pub async fn get_record(&self, name: &str) -> Option<ArnsRecord> {
        let res = async {
            let data = self
                .query(&self.ario_process, "Record", vec![Tag::new("Name", name)])
                .await?;
            if data.is_null() {
                return Ok(None);
            }
            let mut record: ArnsRecord = serde_json::from_value(data)?;
            record.name = name.to_string();
            Ok::<_, Error>(Some(record))
        }
        .await;
        res.unwrap_or_else(|e| {
            log::warn!("[arns] record lookup for {name} failed: {e}");
            None
        })
    }

    async fn ant_state(&self, process_id: &str) -> Result<AntState> {
        let data = self.query(process_id, "State", Vec::new()).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Name to record plus the ANT's root transaction and owner.
    pub async fn resolve_name(&self, name: &str) -> Option<ArnsResolution> {
        let record = self.get_record(name).await?;
        let state = match self.ant_state(&record.process_id).await {
            Ok(s) => Some(s),
            Err(e) => {
                log::warn!("[arns] ANT state for {name} unavailable: {e}");
                None
            }
        };
        Some(ArnsResolution {
            name: record.name,
            process_id: record.process_id,
            tx_id: state.as_ref().and_then(AntState::root_tx),
            owner: state.and_then(|s| s.owner),
            r#type: record.r#type,
            undername_limit: record.undername_limit,
        })
    }

    pub async fn resolve_tx_id(&self, name: &str) -> Option<String> {
        self.resolve_name(name).await.and_then(|r| r.tx_id)
    }

    pub async fn logo(&self, name: &str) -> Option<String> {
        let record = self.get_record(name).await?;
        match self.ant_state(&record.process_id).await {
            Ok(state) => state.logo.filter(|l| !l.is_empty()),
            Err(e) => {
                log::warn!("[arns] logo for {name} unavailable: {e}");
                None
            }
        }
    }

    pub async fn primary_name(&self, address: &str) -> Option<String> {
        self.caches
            .primary_name
            .get_or_fetch(
                address.to_string(),
                || async {
                    let data = self
                        .query(&self.ario_process, "Primary-Name", vec![Tag::new("Address", address)])
                        .await?;
                    if data.is_null() {
                        return Ok(None);
                    }
                    let raw: RawPrimaryName = serde_json::from_value(data)?;
                    Ok::<_, Error>(raw.name)
                },
                None,
            )
            .await
    }

    /// Best-effort reverse lookup: scans the newest records for one whose
    /// process is `address`.
    pub async fn name_for_address(&self, address: &str) -> Option<String> {
        if address.len() != 43 {
            return None;
        }
        self.caches
            .reverse_lookup
            .get_or_fetch(
                address.to_string(),
                || async {
                    let page = self.get_records(REVERSE_LOOKUP_SCAN, None, "startTimestamp", false).await?;
                    Ok::<_, Error>(find_by_process(&page.items, address))
                },
                None,
            )
            .await
    }

    /// Whether `process_id` is an ANT, judged by its `State` carrying a
    /// `Records` table. Failures count as "no" for the cache's TTL.
    pub async fn is_ant_process(&self, process_id: &str) -> bool {
        self.caches
            .ant_check
            .get_or_fetch(
                process_id.to_string(),
                || async {
                    let state = self.query(process_id, "State", Vec::new()).await?;
                    Ok::<_, Error>(looks_like_ant(&state))
                },
                false,
            )
            .await
    }
}

fn find_by_process(records: &[ArnsRecord], process_id: &str) -> Option<String> {
    records
        .iter()
        .find(|r| r.process_id == process_id)
        .map(|r| r.name.clone())
}

fn looks_like_ant(state: &Value) -> bool {
    state.get("Records").map(Value::is_object).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArnsPurchase;
    use serde_json::json;

    #[test]
    fn records_page_decodes() {
        let raw: RawRecordsPage = serde_json::from_value(json!({
            "items": [
                {"name": "ardrive", "processId": "p1", "startTimestamp": 1_700_000_000_000i64,
                 "type": "permabuy", "undernameLimit": 10, "purchasePrice": 1000.0},
                {"name": "blog", "processId": "p2", "startTimestamp": 1_690_000_000_000i64,
                 "endTimestamp": 1_720_000_000_000i64, "type": "lease", "undernameLimit": 10}
            ],
            "hasMore": true,
            "nextCursor": "blog",
            "totalItems": 5000,
            "sortBy": "startTimestamp",
            "sortOrder": "desc"
        }))
        .unwrap();
        assert_eq!(raw.items.len(), 2);
        assert_eq!(raw.items[0].r#type, ArnsPurchase::Permabuy);
        assert_eq!(raw.items[1].end_timestamp, Some(1_720_000_000_000));
        assert!(raw.has_more);
        assert_eq!(raw.next_cursor.as_deref(), Some("blog"));
        assert_eq!(find_by_process(&raw.items, "p2").as_deref(), Some("blog"));
        assert_eq!(find_by_process(&raw.items, "p9"), None);
    }

    #[test]
    fn ant_state_fields() {
        let state: AntState = serde_json::from_value(json!({
            "Name": "ArDrive",
            "Owner": "owner-addr",
            "Logo": "logo-tx",
            "Records": {"@": {"transactionId": "root-tx", "ttlSeconds": 3600}}
        }))
        .unwrap();
        assert_eq!(state.owner.as_deref(), Some("owner-addr"));
        assert_eq!(state.logo.as_deref(), Some("logo-tx"));
        assert_eq!(state.root_tx().as_deref(), Some("root-tx"));
    }

    #[test]
    fn ant_detection() {
        assert!(looks_like_ant(&json!({"Records": {}})));
        assert!(!looks_like_ant(&json!({"Balances": {}})));
        assert!(!looks_like_ant(&json!("text")));
    }

    #[tokio::test]
    async fn unreachable_cu_degrades_point_lookups_and_caches_negative() {
        // nothing listens on port 9 so every dry-run fails fast
        let client = DryRunClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let svc = ArnsService::new(
            Arc::new(client),
            "ario",
            Arc::new(RequestThrottler::new("arns", Duration::from_millis(200))),
            RetryPolicy::new(0, Duration::from_millis(10)),
            Arc::new(ArnsCaches::default()),
        );
        assert!(!svc.is_ant_process("some-process").await);
        assert_eq!(svc.caches().ant_check.get(&"some-process".to_string()), Some(false));
        assert!(svc.get_record("ardrive").await.is_none());
        assert!(svc.get_records(10, None, "startTimestamp", false).await.is_err());
    }
}
