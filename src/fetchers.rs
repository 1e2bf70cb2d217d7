//! `PageFetcher`s binding each list view to its backend query.

use crate::arns::ArnsService;
use crate::error::{Error, Result};
use crate::graphql::{parse_ao_message, parse_token_event, GraphQlClient, MessageQuery, TransactionsQuery};
use crate::loader::PageFetcher;
use crate::pagination::{Filters, PageRequest, Row};
use crate::types::{AoMessage, ArnsRecord, ArweaveBlock, DirMessage, Direction, TokenTransfer};
use crate::util_text::is_ethereum_address;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Total reported by the gateway on the most recent first page.
#[derive(Default)]
pub struct TotalCount(Mutex<Option<u64>>);

impl TotalCount {
    pub fn get(&self) -> Option<u64> {
        *self.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set(&self, count: Option<u64>) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = count;
    }
}

pub struct MessagesFetcher {
    client: Arc<GraphQlClient>,
    query: MessageQuery,
    total: TotalCount,
}

impl MessagesFetcher {
    pub fn new(client: Arc<GraphQlClient>, query: MessageQuery) -> Self {
        Self {
            client,
            query,
            total: TotalCount::default(),
        }
    }

    pub fn query(&self) -> &MessageQuery {
        &self.query
    }

    pub fn total(&self) -> Option<u64> {
        self.total.get()
    }
}

#[async_trait]
impl PageFetcher for MessagesFetcher {
    type Row = AoMessage;

    async fn fetch(&self, req: &PageRequest<AoMessage>) -> Result<Vec<AoMessage>> {
        if self.query.matches_nothing() {
            self.total.set(Some(0));
            return Ok(Vec::new());
        }
        let q = self
            .query
            .build(req.page_size, req.cursor(), req.ascending, &req.extra_filters);
        let page = self.client.transactions(&q).await?;
        if req.is_first_page() {
            self.total.set(page.count);
        }
        Ok(page.edges.into_iter().map(parse_ao_message).collect())
    }
}

/// Credit/Debit notices of one token for an entity.
///
/// Ethereum wallets never show up as a recipient, only inside the notice tags,
/// so they take two tag queries (sent: Credit-Notice by `Sender`, received:
/// Debit-Notice by `Recipient`) merged by ingestion time. Both share the
/// position cursor of the last merged row.
pub struct TokenTransfersFetcher {
    client: Arc<GraphQlClient>,
    entity: String,
    token_process: String,
    total: TotalCount,
}

impl TokenTransfersFetcher {
    pub fn new(client: Arc<GraphQlClient>, entity: impl Into<String>, token_process: impl Into<String>) -> Self {
        Self {
            client,
            entity: entity.into(),
            token_process: token_process.into(),
            total: TotalCount::default(),
        }
    }

    pub fn total(&self) -> Option<u64> {
        self.total.get()
    }

    /// One query for Arweave entities, two (sent, received) for Ethereum ones.
    pub fn build(&self, first: usize, cursor: Option<&str>, ascending: bool, filters: &Filters) -> Vec<TransactionsQuery> {
        let base = |action: &[&str]| TransactionsQuery::new(first, cursor, ascending).tag("Action", action);
        let queries = if is_ethereum_address(&self.entity) {
            vec![
                base(&["Credit-Notice"]).tag("Sender", &[&self.entity]),
                base(&["Debit-Notice"]).tag("Recipient", &[&self.entity]),
            ]
        } else {
            let mut q = base(&["Credit-Notice", "Debit-Notice"]);
            q.recipients.push(self.entity.clone());
            vec![q]
        };
        queries
            .into_iter()
            .map(|q| {
                q.tag("From-Process", &[&self.token_process])
                    .tag("Data-Protocol", &["ao"])
                    .extra_filters(filters)
            })
            .collect()
    }
}

/// Interleave rows from several queries by ingestion time and keep one page.
pub fn merge_by_ingested(mut rows: Vec<TokenTransfer>, ascending: bool, limit: usize) -> Vec<TokenTransfer> {
    rows.sort_by(|a, b| {
        if ascending {
            a.ingested_at.cmp(&b.ingested_at)
        } else {
            b.ingested_at.cmp(&a.ingested_at)
        }
    });
    rows.truncate(limit);
    rows
}

#[async_trait]
impl PageFetcher for TokenTransfersFetcher {
    type Row = TokenTransfer;

    async fn fetch(&self, req: &PageRequest<TokenTransfer>) -> Result<Vec<TokenTransfer>> {
        let mut queries = self
            .build(req.page_size, req.cursor(), req.ascending, &req.extra_filters)
            .into_iter();
        let (Some(first), second) = (queries.next(), queries.next()) else {
            return Ok(Vec::new());
        };

        let Some(second) = second else {
            let page = self.client.transactions(&first).await?;
            if req.is_first_page() {
                self.total.set(page.count);
            }
            return Ok(page.edges.into_iter().map(parse_token_event).collect());
        };

        let (sent, received) = futures::try_join!(
            self.client.transactions(&first),
            self.client.transactions(&second)
        )?;
        if req.is_first_page() {
            // the two queries match disjoint messages
            let total = match (sent.count, received.count) {
                (Some(a), Some(b)) => Some(a + b),
                _ => None,
            };
            self.total.set(total);
        }
        let rows = sent
            .edges
            .into_iter()
            .chain(received.edges)
            .map(parse_token_event)
            .collect();
        Ok(merge_by_ingested(rows, req.ascending, req.page_size))
    }
}

pub struct BlocksFetcher {
    client: Arc<GraphQlClient>,
}

impl BlocksFetcher {
    pub fn new(client: Arc<GraphQlClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for BlocksFetcher {
    type Row = ArweaveBlock;

    async fn fetch(&self, req: &PageRequest<ArweaveBlock>) -> Result<Vec<ArweaveBlock>> {
        self.client.blocks(req.page_size, req.cursor(), req.ascending).await
    }
}

/// Linked messages (pushed for a message) merged with the messages it
/// produced. Resulting messages come only with the first page; later pages
/// continue the linked query from the last incoming row. Use with a
/// de-duplicating loader since the two queries can overlap.
pub struct CombinedMessagesFetcher {
    client: Arc<GraphQlClient>,
    linked: MessageQuery,
    resulting: MessageQuery,
}

impl CombinedMessagesFetcher {
    pub fn new(client: Arc<GraphQlClient>, message: &AoMessage) -> Self {
        let root = message
            .tags
            .get("Pushed-For")
            .cloned()
            .unwrap_or_else(|| message.id.clone());
        let (refs, old_ref_symbol) = match (message.tags.get("Reference"), message.tags.get("Ref_")) {
            (Some(r), _) => (vec![r.clone()], false),
            (None, Some(r)) => (vec![r.clone()], true),
            (None, None) => (Vec::new(), false),
        };
        Self {
            client,
            linked: MessageQuery::Linked { pushed_for: root },
            resulting: MessageQuery::Resulting {
                msg_refs: refs,
                from_process: message.to.clone(),
                old_ref_symbol,
            },
        }
    }

    fn wants_resulting(&self) -> bool {
        matches!(&self.resulting, MessageQuery::Resulting { msg_refs, .. } if !msg_refs.is_empty())
    }
}

/// Cursor for the linked query: only an incoming row came from it.
pub fn linked_cursor(last: Option<&DirMessage>) -> Option<&str> {
    last.filter(|m| m.dir == Direction::In).and_then(|m| m.cursor())
}

fn tag_rows(rows: Vec<AoMessage>, dir: Direction) -> impl Iterator<Item = DirMessage> {
    rows.into_iter().map(move |message| DirMessage { dir, message })
}

#[async_trait]
impl PageFetcher for CombinedMessagesFetcher {
    type Row = DirMessage;

    async fn fetch(&self, req: &PageRequest<DirMessage>) -> Result<Vec<DirMessage>> {
        let cursor = linked_cursor(req.last_record.as_ref());
        let linked_q = self
            .linked
            .build(req.page_size, cursor, req.ascending, &req.extra_filters);
        let linked = async {
            let page = self.client.transactions(&linked_q).await?;
            Ok::<_, Error>(page.edges.into_iter().map(parse_ao_message).collect::<Vec<_>>())
        };

        if req.offset != 0 || !self.wants_resulting() {
            return Ok(tag_rows(linked.await?, Direction::In).collect());
        }

        let resulting_q = self
            .resulting
            .build(req.page_size, None, req.ascending, &req.extra_filters);
        let resulting = async {
            let page = self.client.transactions(&resulting_q).await?;
            Ok::<_, Error>(page.edges.into_iter().map(parse_ao_message).collect::<Vec<_>>())
        };
        let (out, inc) = futures::try_join!(resulting, linked)?;
        Ok(tag_rows(out, Direction::Out)
            .chain(tag_rows(inc, Direction::In))
            .collect())
    }
}

/// ArNS registry pages. The registry pages by name, which is also the row cursor.
pub struct ArnsRecordsFetcher {
    arns: Arc<ArnsService>,
    total: TotalCount,
}

impl ArnsRecordsFetcher {
    pub fn new(arns: Arc<ArnsService>) -> Self {
        Self {
            arns,
            total: TotalCount::default(),
        }
    }

    pub fn total(&self) -> Option<u64> {
        self.total.get()
    }
}

#[async_trait]
impl PageFetcher for ArnsRecordsFetcher {
    type Row = ArnsRecord;

    async fn fetch(&self, req: &PageRequest<ArnsRecord>) -> Result<Vec<ArnsRecord>> {
        let page = self
            .arns
            .get_records(req.page_size, req.cursor(), &req.sort_field, req.ascending)
            .await?;
        self.total.set(Some(page.total_items));
        log::debug!("[arns] {} record(s) at offset {}, more: {}", page.items.len(), req.offset, page.has_more);
        Ok(page.items)
    }
}
