//! Gateway GraphQL client and the `transactions` / `blocks` queries behind every list view.

use crate::error::{Error, Result};
use crate::net::{send_with_backoff, RetryPolicy};
use crate::pagination::Filters;
use crate::types::{AoMessage, ArweaveBlock, MessageType, Tag, TokenTransfer, SYSTEM_TAG_NAMES};
use crate::util_text::{is_arweave_id, is_ethereum_address, normalize_owner_address};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Messages ingested before this are pre-mainnet noise.
pub const AO_MIN_INGESTED_AT: i64 = 1_696_107_600;

pub const MESSAGE_FIELDS: &str = r#"
  edges {
    cursor
    node {
      id
      ingested_at
      recipient
      block { timestamp height }
      tags { name value }
      data { size }
      owner { address }
    }
  }
"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    HeightAsc,
    IngestedAtDesc,
}

impl SortOrder {
    /// Ascending lists walk by height; descending ones by ingestion time.
    pub fn from_ascending(ascending: bool) -> Self {
        if ascending {
            SortOrder::HeightAsc
        } else {
            SortOrder::IngestedAtDesc
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::HeightAsc => "HEIGHT_ASC",
            SortOrder::IngestedAtDesc => "INGESTED_AT_DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagFilter {
    pub name: String,
    pub values: Vec<String>,
}

impl TagFilter {
    pub fn new<S: AsRef<str>>(name: &str, values: &[S]) -> Self {
        Self {
            name: name.to_string(),
            values: values.iter().map(|v| v.as_ref().to_string()).collect(),
        }
    }

    pub fn ao_protocol() -> Self {
        Self::new("Data-Protocol", &["ao"])
    }
}

/// One `transactions(...)` call. Only the filters that are set end up in the query text.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionsQuery {
    pub first: usize,
    pub after: Option<String>,
    pub sort: SortOrder,
    pub tags: Vec<TagFilter>,
    pub owners: Vec<String>,
    pub recipients: Vec<String>,
    pub ids: Vec<String>,
    pub block: Option<(u64, u64)>,
    /// The gateway rejects `count` together with a cursor.
    pub include_count: bool,
}

impl TransactionsQuery {
    pub fn new(first: usize, after: Option<&str>, ascending: bool) -> Self {
        let after = after.filter(|c| !c.is_empty()).map(str::to_string);
        Self {
            first,
            include_count: after.is_none(),
            after,
            sort: SortOrder::from_ascending(ascending),
            tags: Vec::new(),
            owners: Vec::new(),
            recipients: Vec::new(),
            ids: Vec::new(),
            block: None,
        }
    }

    pub fn tag<S: AsRef<str>>(mut self, name: &str, values: &[S]) -> Self {
        self.tags.push(TagFilter::new(name, values));
        self
    }

    /// Each extra filter narrows the result by one exact tag value.
    pub fn extra_filters(mut self, filters: &Filters) -> Self {
        for (name, value) in filters {
            self.tags.push(TagFilter::new(name, &[value]));
        }
        self
    }

    pub fn render(&self) -> (String, Value) {
        let mut decls = vec!["$first: Int!".to_string(), "$sort: SortOrder!".to_string()];
        let mut args = vec!["first: $first".to_string(), "sort: $sort".to_string()];
        let mut vars = Map::new();
        vars.insert("first".into(), json!(self.first));
        vars.insert("sort".into(), json!(self.sort.as_str()));

        if let Some(after) = &self.after {
            decls.push("$after: String".into());
            args.push("after: $after".into());
            vars.insert("after".into(), json!(after));
        }
        if !self.tags.is_empty() {
            decls.push("$tags: [TagFilter!]".into());
            args.push("tags: $tags".into());
            let tags: Vec<Value> = self
                .tags
                .iter()
                .map(|t| json!({"name": t.name, "values": t.values}))
                .collect();
            vars.insert("tags".into(), Value::Array(tags));
        }
        if !self.owners.is_empty() {
            decls.push("$owners: [String!]".into());
            args.push("owners: $owners".into());
            vars.insert("owners".into(), json!(self.owners));
        }
        if !self.recipients.is_empty() {
            decls.push("$recipients: [String!]".into());
            args.push("recipients: $recipients".into());
            vars.insert("recipients".into(), json!(self.recipients));
        }
        if !self.ids.is_empty() {
            decls.push("$ids: [ID!]".into());
            args.push("ids: $ids".into());
            vars.insert("ids".into(), json!(self.ids));
        }
        if let Some((min, max)) = self.block {
            decls.push("$blockMin: Int".into());
            decls.push("$blockMax: Int".into());
            args.push("block: { min: $blockMin, max: $blockMax }".into());
            vars.insert("blockMin".into(), json!(min));
            vars.insert("blockMax".into(), json!(max));
        }
        args.push(format!("ingested_at: {{ min: {AO_MIN_INGESTED_AT} }}"));

        let text = format!(
            "query ({}) {{\n  transactions({}) {{\n    {}\n    {}\n  }}\n}}",
            decls.join(", "),
            args.join(", "),
            if self.include_count { "count" } else { "" },
            MESSAGE_FIELDS
        );
        (text, Value::Object(vars))
    }
}

/// Every list view the explorer pages through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageQuery {
    All,
    Processes { module: Option<String> },
    Modules,
    Outgoing { entity: String, is_process: bool },
    Incoming { entity: String },
    Spawned { entity: String, is_process: bool },
    Linked { pushed_for: String },
    Resulting { msg_refs: Vec<String>, from_process: String, old_ref_symbol: bool },
    Block { recipient: String, height: u64 },
    /// `Eval` messages sent to a process.
    Evals { entity: String },
}

impl MessageQuery {
    pub fn build(
        &self,
        first: usize,
        cursor: Option<&str>,
        ascending: bool,
        filters: &Filters,
    ) -> TransactionsQuery {
        let mut q = TransactionsQuery::new(first, cursor, ascending);
        match self {
            MessageQuery::All => {
                q.tags.push(TagFilter::ao_protocol());
            }
            MessageQuery::Processes { module } => {
                q = q.tag("Type", &["Process", "Module"]);
                q.tags.push(TagFilter::ao_protocol());
                if let Some(m) = module {
                    q = q.tag("Module", &[m]);
                }
            }
            MessageQuery::Modules => {
                q = q.tag("Type", &["Module"]);
                q.tags.push(TagFilter::ao_protocol());
            }
            MessageQuery::Outgoing { entity, is_process } => {
                if *is_process {
                    q = q.tag("From-Process", &[entity]);
                } else {
                    q.owners.push(owner_address(entity));
                }
                q.tags.push(TagFilter::ao_protocol());
            }
            MessageQuery::Incoming { entity } => {
                if is_ethereum_address(entity) {
                    // ETH accounts never appear as recipients, only in the Recipient tag
                    q = q.tag("Recipient", &[entity]);
                } else {
                    q.recipients.push(entity.clone());
                }
                q.tags.push(TagFilter::ao_protocol());
            }
            MessageQuery::Spawned { entity, is_process } => {
                if *is_process {
                    q = q.tag("From-Process", &[entity]);
                } else {
                    q.owners.push(owner_address(entity));
                }
                q = q.tag("Type", &["Process"]);
                q.tags.push(TagFilter::ao_protocol());
            }
            MessageQuery::Linked { pushed_for } => {
                q = q.tag("Pushed-For", &[pushed_for]);
                q.tags.push(TagFilter::ao_protocol());
            }
            MessageQuery::Resulting {
                msg_refs,
                from_process,
                old_ref_symbol,
            } => {
                q = q.tag(if *old_ref_symbol { "Ref_" } else { "Reference" }, msg_refs.as_slice());
                q = q.tag("From-Process", &[from_process]);
                q.tags.push(TagFilter::ao_protocol());
            }
            MessageQuery::Block { recipient, height } => {
                q.recipients.push(recipient.clone());
                q.block = Some((*height, *height));
                q.tags.push(TagFilter::ao_protocol());
            }
            MessageQuery::Evals { entity } => {
                q = q.tag("Action", &["Eval"]);
                q.tags.push(TagFilter::ao_protocol());
                q.recipients.push(entity.clone());
            }
        }
        q.extra_filters(filters)
    }

    pub fn label(&self) -> &'static str {
        match self {
            MessageQuery::All => "messages",
            MessageQuery::Processes { .. } => "processes",
            MessageQuery::Modules => "modules",
            MessageQuery::Outgoing { .. } => "outgoing",
            MessageQuery::Incoming { .. } => "incoming",
            MessageQuery::Spawned { .. } => "spawned",
            MessageQuery::Linked { .. } => "linked",
            MessageQuery::Resulting { .. } => "resulting",
            MessageQuery::Block { .. } => "block",
            MessageQuery::Evals { .. } => "evals",
        }
    }

    /// Queries that cannot match anything, answered without a round trip.
    /// Ethereum wallets are never the recipient of an `Eval`.
    pub fn matches_nothing(&self) -> bool {
        matches!(self, MessageQuery::Evals { entity } if is_ethereum_address(entity))
    }
}

fn owner_address(entity: &str) -> String {
    if is_ethereum_address(entity) {
        normalize_owner_address(entity)
    } else {
        entity.to_string()
    }
}

// ----- wire shapes -----

#[derive(Debug, Deserialize)]
struct BlockRef {
    timestamp: Option<i64>,
    height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DataRef {
    size: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OwnerRef {
    address: String,
}

#[derive(Debug, Deserialize)]
struct TxNode {
    id: String,
    ingested_at: Option<i64>,
    #[serde(default)]
    recipient: Option<String>,
    block: Option<BlockRef>,
    #[serde(default)]
    tags: Vec<Tag>,
    data: Option<DataRef>,
    owner: OwnerRef,
}

#[derive(Debug, Deserialize)]
pub struct TxEdge {
    cursor: String,
    node: TxNode,
}

#[derive(Debug, Deserialize)]
struct TxConnection {
    count: Option<Value>,
    edges: Vec<TxEdge>,
}

#[derive(Debug, Deserialize)]
struct BlockNode {
    id: String,
    height: u64,
    timestamp: Option<i64>,
    previous: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockEdge {
    cursor: String,
    node: BlockNode,
}

#[derive(Debug, Deserialize)]
struct BlockConnection {
    edges: Vec<BlockEdge>,
}

pub struct TransactionsPage {
    pub count: Option<u64>,
    pub edges: Vec<TxEdge>,
}

fn epoch(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn value_u64(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

pub fn parse_ao_message(edge: TxEdge) -> AoMessage {
    let TxEdge { cursor, node } = edge;

    let mut tags = BTreeMap::new();
    let mut system_tags = BTreeMap::new();
    let mut user_tags = BTreeMap::new();
    for t in node.tags {
        if SYSTEM_TAG_NAMES.contains(&t.name.as_str()) {
            system_tags.insert(t.name.clone(), t.value.clone());
        } else {
            user_tags.insert(t.name.clone(), t.value.clone());
        }
        tags.insert(t.name, t.value);
    }
    // shown as dedicated columns instead
    for hidden in ["Type", "Module", "Name"] {
        system_tags.remove(hidden);
    }

    let r#type = tags
        .get("Type")
        .map(|s| MessageType::parse(s))
        .unwrap_or(MessageType::Unknown);
    if r#type == MessageType::Message {
        if let Some(name) = tags.get("Name") {
            user_tags.insert("Name".into(), name.clone());
        }
    }

    let from = tags
        .get("Forwarded-For")
        .or_else(|| tags.get("From-Process"))
        .cloned()
        .unwrap_or_else(|| node.owner.address.clone());

    AoMessage {
        id: node.id,
        r#type,
        from,
        to: node.recipient.unwrap_or_default().trim().to_string(),
        block_height: node.block.as_ref().and_then(|b| b.height),
        block_timestamp: node.block.as_ref().and_then(|b| b.timestamp).and_then(epoch),
        ingested_at: node.ingested_at.and_then(epoch),
        scheduler_id: tags.get("Scheduler").cloned(),
        action: tags.get("Action").cloned(),
        data_size: node.data.and_then(|d| d.size).as_ref().and_then(value_u64),
        tags,
        system_tags,
        user_tags,
        cursor,
    }
}

fn parse_quantity(value: Option<&String>) -> f64 {
    match value.map(|v| v.parse::<f64>()) {
        Some(Ok(n)) if n.is_finite() => n,
        Some(_) => {
            log::warn!("invalid Quantity tag: {value:?}");
            0.0
        }
        None => {
            log::warn!("missing Quantity tag");
            0.0
        }
    }
}

pub fn parse_token_event(edge: TxEdge) -> TokenTransfer {
    let msg = parse_ao_message(edge);
    let quantity = parse_quantity(msg.tags.get("Quantity"));
    let tag = |k: &str| msg.tags.get(k).cloned().unwrap_or_default();

    let (amount, sender, recipient, token_id) = match msg.action.as_deref() {
        Some("Debit-Notice") => (-quantity, msg.to.clone(), tag("Recipient"), msg.from.clone()),
        Some("Credit-Notice") => (quantity, tag("Sender"), msg.to.clone(), msg.from.clone()),
        Some("Transfer") => (-quantity, msg.from.clone(), tag("Recipient"), msg.to.clone()),
        other => {
            // keep the row so one odd message doesn't break the whole list
            log::warn!("unknown token action: {other:?}");
            (0.0, String::new(), String::new(), String::new())
        }
    };

    TokenTransfer {
        id: msg.id,
        cursor: msg.cursor,
        ingested_at: msg.ingested_at,
        action: msg.action,
        sender,
        recipient,
        amount,
        token_id,
    }
}

fn parse_block(edge: BlockEdge) -> ArweaveBlock {
    ArweaveBlock {
        id: edge.node.id,
        cursor: edge.cursor,
        height: edge.node.height,
        previous: edge.node.previous,
        timestamp: edge.node.timestamp.and_then(epoch),
    }
}

// ----- transport -----

pub struct GraphQlClient {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl GraphQlClient {
    pub fn new(url: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder().pool_max_idle_per_host(8).build()?;
        Ok(Self {
            url: url.into(),
            http,
            timeout,
            retry,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one query and return its `data` object.
    pub async fn query(&self, query: &str, variables: Value) -> Result<Value> {
        let rb = self
            .http
            .post(&self.url)
            .json(&json!({ "query": query, "variables": variables }))
            .timeout(self.timeout);
        let res = send_with_backoff(rb, "graphql", self.retry).await?;
        let body: Value = res.json().await?;
        extract_data(body)
    }

    pub async fn transactions(&self, q: &TransactionsQuery) -> Result<TransactionsPage> {
        let (text, vars) = q.render();
        let data = self.query(&text, vars).await?;
        let conn: TxConnection = serde_json::from_value(data["transactions"].clone())?;
        log::debug!("graphql transactions: {} edge(s)", conn.edges.len());
        Ok(TransactionsPage {
            count: conn.count.as_ref().and_then(value_u64),
            edges: conn.edges,
        })
    }

    pub async fn blocks(&self, first: usize, after: Option<&str>, ascending: bool) -> Result<Vec<ArweaveBlock>> {
        let sort = if ascending { "HEIGHT_ASC" } else { "HEIGHT_DESC" };
        let text = "query ($first: Int!, $after: String, $sort: SortOrder!) {\n  blocks(first: $first, after: $after, sort: $sort) {\n    edges { cursor node { id timestamp height previous } }\n  }\n}";
        let vars = json!({ "first": first, "after": after, "sort": sort });
        let data = self.query(text, vars).await?;
        let conn: BlockConnection = serde_json::from_value(data["blocks"].clone())?;
        Ok(conn.edges.into_iter().map(parse_block).collect())
    }

    /// `None` for ids that cannot be Arweave transaction ids or are not indexed.
    pub async fn message_by_id(&self, id: &str) -> Result<Option<AoMessage>> {
        if !is_arweave_id(id) {
            return Ok(None);
        }
        let mut q = TransactionsQuery::new(1, None, false);
        q.include_count = false;
        q.ids.push(id.to_string());
        q.tags.push(TagFilter::ao_protocol());
        let page = self.transactions(&q).await?;
        Ok(page.edges.into_iter().next().map(parse_ao_message))
    }
}

fn extract_data(body: Value) -> Result<Value> {
    if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
        if !errors.is_empty() {
            let msg = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::GraphQl(msg));
        }
    }
    match body.get("data") {
        Some(d) if !d.is_null() => Ok(d.clone()),
        _ => Err(Error::GraphQl("response has no data".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(tags: Value) -> TxEdge {
        serde_json::from_value(json!({
            "cursor": "cur-1",
            "node": {
                "id": "msg-1",
                "ingested_at": 1_700_000_000,
                "recipient": " proc-9 ",
                "block": { "timestamp": 1_700_000_100, "height": 1_300_000 },
                "tags": tags,
                "data": { "size": "42" },
                "owner": { "address": "owner-1" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn parses_message_edge() {
        let m = parse_ao_message(edge(json!([
            {"name": "Type", "value": "Message"},
            {"name": "Data-Protocol", "value": "ao"},
            {"name": "From-Process", "value": "proc-1"},
            {"name": "Action", "value": "Transfer"},
            {"name": "Name", "value": "hello"},
        ])));
        assert_eq!(m.id, "msg-1");
        assert_eq!(m.cursor, "cur-1");
        assert_eq!(m.r#type, MessageType::Message);
        assert_eq!(m.from, "proc-1");
        assert_eq!(m.to, "proc-9");
        assert_eq!(m.block_height, Some(1_300_000));
        assert_eq!(m.data_size, Some(42));
        assert_eq!(m.action.as_deref(), Some("Transfer"));
        assert!(m.system_tags.contains_key("Data-Protocol"));
        assert!(!m.system_tags.contains_key("Type"));
        assert_eq!(m.user_tags.get("Name").map(String::as_str), Some("hello"));
    }

    #[test]
    fn forwarded_for_wins_over_owner() {
        let m = parse_ao_message(edge(json!([{"name": "Forwarded-For", "value": "fwd"}])));
        assert_eq!(m.from, "fwd");
        let m = parse_ao_message(edge(json!([])));
        assert_eq!(m.from, "owner-1");
        assert_eq!(m.r#type, MessageType::Unknown);
    }

    #[test]
    fn token_event_signs_amount() {
        let t = parse_token_event(edge(json!([
            {"name": "Action", "value": "Debit-Notice"},
            {"name": "Quantity", "value": "150"},
            {"name": "Recipient", "value": "bob"},
            {"name": "From-Process", "value": "token"},
        ])));
        assert_eq!(t.amount, -150.0);
        assert_eq!(t.sender, "proc-9");
        assert_eq!(t.recipient, "bob");
        assert_eq!(t.token_id, "token");

        let t = parse_token_event(edge(json!([{"name": "Action", "value": "Eval"}])));
        assert_eq!(t.amount, 0.0);
        assert!(t.sender.is_empty());
    }

    #[test]
    fn first_page_asks_for_count_later_pages_do_not() {
        let q = MessageQuery::All.build(25, None, false, &Filters::new());
        assert!(q.include_count);
        let (text, vars) = q.render();
        assert!(text.contains("count"));
        assert!(!text.contains("$after"));
        assert_eq!(vars["sort"], "INGESTED_AT_DESC");

        let q = MessageQuery::All.build(25, Some("cur-9"), true, &Filters::new());
        let (text, vars) = q.render();
        assert!(!q.include_count);
        assert!(text.contains("after: $after"));
        assert_eq!(vars["after"], "cur-9");
        assert_eq!(vars["sort"], "HEIGHT_ASC");
    }

    #[test]
    fn extra_filters_become_tags() {
        let mut f = Filters::new();
        f.insert("Action".into(), "Transfer".into());
        let q = MessageQuery::Processes { module: None }.build(10, None, false, &f);
        let (_, vars) = q.render();
        let names: Vec<&str> = vars["tags"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["Type", "Data-Protocol", "Action"]);
    }

    #[test]
    fn eth_entities_use_tag_or_normalized_owner() {
        let eth = "0x52908400098527886E0F7030069857D2E4169EE7";
        let q = MessageQuery::Incoming { entity: eth.into() }.build(10, None, false, &Filters::new());
        assert!(q.recipients.is_empty());
        assert_eq!(q.tags[0].name, "Recipient");

        let q = MessageQuery::Outgoing { entity: eth.into(), is_process: false }
            .build(10, None, false, &Filters::new());
        assert_eq!(q.owners.len(), 1);
        assert_eq!(q.owners[0].len(), 43);
    }

    #[test]
    fn block_query_pins_height() {
        let q = MessageQuery::Block { recipient: "ario".into(), height: 77 }.build(5, None, false, &Filters::new());
        let (text, vars) = q.render();
        assert!(text.contains("block: { min: $blockMin, max: $blockMax }"));
        assert_eq!(vars["blockMin"], 77);
        assert_eq!(vars["blockMax"], 77);
    }

    #[test]
    fn eval_query_targets_the_process() {
        let q = MessageQuery::Evals { entity: "proc-1".into() }.build(5, None, false, &Filters::new());
        let (text, vars) = q.render();
        assert!(text.contains("recipients: $recipients"));
        assert_eq!(vars["recipients"], json!(["proc-1"]));
        assert_eq!(vars["tags"][0], json!({"name": "Action", "values": ["Eval"]}));
        assert_eq!(vars["tags"][1], json!({"name": "Data-Protocol", "values": ["ao"]}));
        assert!(!MessageQuery::Evals { entity: "proc-1".into() }.matches_nothing());
        let eth = "0x52908400098527886E0F7030069857D2E4169EE7";
        assert!(MessageQuery::Evals { entity: eth.into() }.matches_nothing());
    }

    #[test]
    fn processes_can_be_narrowed_to_a_module() {
        let q = MessageQuery::Processes { module: Some("mod-1".into()) }.build(5, None, false, &Filters::new());
        assert_eq!(q.tags.last().map(|t| t.name.as_str()), Some("Module"));
        assert_eq!(q.tags.last().map(|t| t.values.clone()), Some(vec!["mod-1".to_string()]));
    }

    #[test]
    fn errors_array_becomes_graphql_error() {
        let err = extract_data(json!({"errors": [{"message": "bad cursor"}], "data": null})).unwrap_err();
        assert!(matches!(err, Error::GraphQl(m) if m == "bad cursor"));
        let data = extract_data(json!({"data": {"transactions": {"edges": []}}})).unwrap();
        assert!(data["transactions"]["edges"].as_array().unwrap().is_empty());
    }
}
