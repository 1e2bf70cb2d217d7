use crate::pagination::Row;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tags that describe the transport rather than the message payload.
pub const SYSTEM_TAG_NAMES: &[&str] = &[
    "Type",
    "Data-Protocol",
    "SDK",
    "Content-Type",
    "Variant",
    "Pushed-For",
    "Ref_",
    "Reference",
    "From-Module",
    "From-Process",
    "Module",
    "Scheduler",
    "aos-Version",
    "App-Name",
    "Name",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Message,
    Process,
    Module,
    Assignment,
    Checkpoint,
    #[serde(other)]
    Unknown,
}

impl MessageType {
    pub const FILTERABLE: [MessageType; 5] = [
        MessageType::Message,
        MessageType::Process,
        MessageType::Module,
        MessageType::Assignment,
        MessageType::Checkpoint,
    ];

    pub fn parse(s: &str) -> Self {
        match s {
            "Message" => MessageType::Message,
            "Process" => MessageType::Process,
            "Module" => MessageType::Module,
            "Assignment" => MessageType::Assignment,
            "Checkpoint" => MessageType::Checkpoint,
            _ => MessageType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Message => "Message",
            MessageType::Process => "Process",
            MessageType::Module => "Module",
            MessageType::Assignment => "Assignment",
            MessageType::Checkpoint => "Checkpoint",
            MessageType::Unknown => "-",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One AO message/process/module as indexed by the gateway.
#[derive(Clone, Debug, Serialize)]
pub struct AoMessage {
    pub id: String,
    pub r#type: MessageType,
    pub from: String,
    pub to: String,
    pub block_height: Option<u64>,
    pub block_timestamp: Option<DateTime<Utc>>,
    pub ingested_at: Option<DateTime<Utc>>,
    pub scheduler_id: Option<String>,
    pub action: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub system_tags: BTreeMap<String, String>,
    pub user_tags: BTreeMap<String, String>,
    pub cursor: String,
    pub data_size: Option<u64>,
}

impl Row for AoMessage {
    fn id(&self) -> &str {
        &self.id
    }
    fn cursor(&self) -> Option<&str> {
        Some(&self.cursor)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Direction {
    In,
    Out,
}

/// Message tagged with the query it came from, for merged in/out listings.
#[derive(Clone, Debug, Serialize)]
pub struct DirMessage {
    pub dir: Direction,
    pub message: AoMessage,
}

impl Row for DirMessage {
    fn id(&self) -> &str {
        &self.message.id
    }
    fn cursor(&self) -> Option<&str> {
        Some(&self.message.cursor)
    }
}

/// Credit/Debit notice or transfer, signed from the viewed entity's side.
#[derive(Clone, Debug, Serialize)]
pub struct TokenTransfer {
    pub id: String,
    pub cursor: String,
    pub ingested_at: Option<DateTime<Utc>>,
    pub action: Option<String>,
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    pub token_id: String,
}

impl Row for TokenTransfer {
    fn id(&self) -> &str {
        &self.id
    }
    fn cursor(&self) -> Option<&str> {
        Some(&self.cursor)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ArweaveBlock {
    pub id: String,
    pub cursor: String,
    pub height: u64,
    pub previous: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Row for ArweaveBlock {
    fn id(&self) -> &str {
        &self.id
    }
    fn cursor(&self) -> Option<&str> {
        Some(&self.cursor)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArnsPurchase {
    Lease,
    Permabuy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArnsRecord {
    #[serde(default)]
    pub name: String,
    pub process_id: String,
    pub start_timestamp: i64,
    #[serde(default)]
    pub end_timestamp: Option<i64>,
    pub r#type: ArnsPurchase,
    #[serde(default)]
    pub purchase_price: Option<f64>,
    #[serde(default)]
    pub undername_limit: u32,
}

impl Row for ArnsRecord {
    fn id(&self) -> &str {
        &self.name
    }
    // The registry pages by record name.
    fn cursor(&self) -> Option<&str> {
        Some(&self.name)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ArnsRecordsPage {
    pub items: Vec<ArnsRecord>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub total_items: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ArnsResolution {
    pub name: String,
    pub process_id: String,
    pub tx_id: Option<String>,
    pub owner: Option<String>,
    pub r#type: ArnsPurchase,
    pub undername_limit: u32,
}

/// One fetched page, whatever the table's row type.
#[derive(Debug)]
pub enum PageRows {
    Messages(Vec<AoMessage>),
    Combined(Vec<DirMessage>),
    Transfers(Vec<TokenTransfer>),
    Blocks(Vec<ArweaveBlock>),
    Arns(Vec<ArnsRecord>),
}

/// Events delivered to the terminal app from background tasks.
#[derive(Debug)]
pub enum AppEvent {
    PageLoaded {
        tab: usize,
        generation: u64,
        outcome: crate::error::Result<PageRows>,
    },
    /// Extra context about the viewed target (ArNS name, ANT flag...).
    Annotation(String),
    Status(String),
    Quit,
}
