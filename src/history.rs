//! Dry-run request history
//!
//! Every dry-run the explorer issues is appended here; only the `max` most
//! recent survive, the oldest are dropped first. The SQLite connection lives on
//! a single blocking worker, callers talk to it over a channel.

use crate::dryrun::{DryRunEntry, DryRunLog};
use crate::error::{Error, Result};
use rusqlite::{params, Connection};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::spawn_blocking;

/// Synchronous store, owned by the worker thread.
pub struct HistoryDb {
    conn: Connection,
    max: usize,
}

impl HistoryDb {
    pub fn open(path: &str, max: usize) -> Result<Self> {
        let conn = Connection::open(path)?;
        if path != ":memory:" {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }
        conn.pragma_update(None, "busy_timeout", 250)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dry_runs(
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                process_id TEXT NOT NULL,
                tags_json  TEXT NOT NULL,
                ts_ms      INTEGER NOT NULL,
                ok         INTEGER NOT NULL,
                outcome    TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn,
            max: max.max(1),
        })
    }

    pub fn record(&mut self, e: &DryRunEntry) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO dry_runs(process_id,tags_json,ts_ms,ok,outcome) VALUES (?,?,?,?,?)",
            params![e.process_id, e.tags_json, e.ts_ms, e.ok as i64, e.outcome],
        )?;
        tx.execute(
            "DELETE FROM dry_runs WHERE id NOT IN (SELECT id FROM dry_runs ORDER BY id DESC LIMIT ?)",
            params![self.max as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Newest first.
    pub fn list(&self) -> Result<Vec<DryRunEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT process_id,tags_json,ts_ms,ok,outcome FROM dry_runs ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(DryRunEntry {
                process_id: r.get(0)?,
                tags_json: r.get(1)?,
                ts_ms: r.get(2)?,
                ok: r.get::<_, i64>(3)? != 0,
                outcome: r.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM dry_runs", [])?;
        Ok(())
    }
}

enum HistoryMsg {
    Record(DryRunEntry),
    List {
        resp: oneshot::Sender<Vec<DryRunEntry>>,
    },
    Clear {
        resp: oneshot::Sender<()>,
    },
}

/// Cheap cloneable handle to the history worker.
#[derive(Clone)]
pub struct DryRunHistory {
    tx: UnboundedSender<HistoryMsg>,
}

impl DryRunHistory {
    /// Opens the database up front so a bad path fails at startup.
    pub fn start(db_path: &str, max: usize) -> Result<Self> {
        let mut db = HistoryDb::open(db_path, max)?;
        let (tx, mut rx) = unbounded_channel::<HistoryMsg>();

        spawn_blocking(move || {
            while let Some(msg) = rx.blocking_recv() {
                match msg {
                    HistoryMsg::Record(e) => {
                        if let Err(err) = db.record(&e) {
                            log::warn!("[history] failed to record dry-run: {err}");
                        }
                    }
                    HistoryMsg::List { resp } => {
                        let _ = resp.send(db.list().unwrap_or_default());
                    }
                    HistoryMsg::Clear { resp } => {
                        let _ = db.clear();
                        let _ = resp.send(());
                    }
                }
            }
        });

        Ok(Self { tx })
    }

    pub fn record(&self, entry: DryRunEntry) {
        if self.tx.send(HistoryMsg::Record(entry)).is_err() {
            log::debug!("[history] worker gone, entry dropped");
        }
    }

    pub async fn list(&self) -> Result<Vec<DryRunEntry>> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(HistoryMsg::List { resp: resp_tx })
            .map_err(|_| Error::Closed)?;
        resp_rx.await.map_err(|_| Error::Closed)
    }

    pub async fn clear(&self) {
        let (resp_tx, resp_rx) = oneshot::channel();
        let _ = self.tx.send(HistoryMsg::Clear { resp: resp_tx });
        let _ = resp_rx.await;
    }
}

impl DryRunLog for DryRunHistory {
    fn record(&self, entry: DryRunEntry) {
        DryRunHistory::record(self, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: &str, ts: i64) -> DryRunEntry {
        DryRunEntry {
            process_id: pid.into(),
            tags_json: r#"[{"name":"Action","value":"State"}]"#.into(),
            ts_ms: ts,
            ok: true,
            outcome: "1 message".into(),
        }
    }

    #[test]
    fn keeps_only_most_recent() {
        let mut db = HistoryDb::open(":memory:", 5).unwrap();
        for i in 0..7 {
            db.record(&entry(&format!("p{i}"), i)).unwrap();
        }
        let list = db.list().unwrap();
        let pids: Vec<&str> = list.iter().map(|e| e.process_id.as_str()).collect();
        assert_eq!(pids, ["p6", "p5", "p4", "p3", "p2"]);
    }

    #[test]
    fn failures_round_trip_flag() {
        let mut db = HistoryDb::open(":memory:", 5).unwrap();
        let mut e = entry("p", 1);
        e.ok = false;
        e.outcome = "dry-run failed: 500".into();
        db.record(&e).unwrap();
        assert_eq!(db.list().unwrap(), vec![e]);
        db.clear().unwrap();
        assert!(db.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_handle_records_and_lists() {
        let h = DryRunHistory::start(":memory:", 2).unwrap();
        h.record(entry("a", 1));
        h.record(entry("b", 2));
        h.record(entry("c", 3));
        let list = h.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].process_id, "c");
    }
}
