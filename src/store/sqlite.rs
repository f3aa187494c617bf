use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::MarketStore;
use crate::types::{now, MarketState, PriceRecord, Step, Symbol};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS stock_prices (
    symbol TEXT NOT NULL,
    step INTEGER NOT NULL,
    price REAL NOT NULL,
    timestamp INTEGER NOT NULL,
    is_override INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (symbol, step)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS market_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    current_step INTEGER NOT NULL DEFAULT 0,
    last_updated INTEGER NOT NULL,
    is_generating INTEGER NOT NULL DEFAULT 0
);
"#;

const LATEST_AS_OF_SQL: &str = r#"
SELECT symbol, price FROM stock_prices sp1
WHERE step = (
    SELECT MAX(step) FROM stock_prices sp2
    WHERE sp2.symbol = sp1.symbol AND sp2.step <= ?1
)
"#;

fn to_sql_step(step: Step) -> i64 {
    i64::try_from(step).unwrap_or(i64::MAX)
}

fn read_record(row: &Row) -> rusqlite::Result<PriceRecord> {
    let step: i64 = row.get(1)?;
    let is_override: i64 = row.get(4)?;
    Ok(PriceRecord {
        symbol: row.get(0)?,
        step: step.max(0) as Step,
        price: row.get(2)?,
        timestamp: row.get(3)?,
        is_override: is_override != 0,
    })
}

/// SQLite-backed store. The generation flag lives in the `market_state` row so the lock is shared
/// by every process that opens the same file and survives restarts.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        //Other processes may hold the write lock briefly while they persist a step
        conn.busy_timeout(Duration::from_secs(5))?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("STORE: WAL mode not active, journal_mode = {}", journal_mode);
        }

        let store = Self::from_connection(conn)?;
        info!("STORE: Opened market database at {}", path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let created = conn.execute(
            "INSERT OR IGNORE INTO market_state (id, current_step, last_updated, is_generating)
             VALUES (1, 0, ?1, 0)",
            params![now()],
        )?;
        if created > 0 {
            info!("STORE: Initialized market state at step 0");
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl MarketStore for SqliteStore {
    fn get_latest_price(&self, symbol: &str) -> Result<Option<PriceRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT symbol, step, price, timestamp, is_override FROM stock_prices
                 WHERE symbol = ?1 ORDER BY step DESC LIMIT 1",
                params![symbol],
                read_record,
            )
            .optional()?;
        Ok(record)
    }

    fn get_latest_price_as_of(&self, symbol: &str, step: Step) -> Result<Option<PriceRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT symbol, step, price, timestamp, is_override FROM stock_prices
                 WHERE symbol = ?1 AND step <= ?2 ORDER BY step DESC LIMIT 1",
                params![symbol, to_sql_step(step)],
                read_record,
            )
            .optional()?;
        Ok(record)
    }

    fn get_price_history(&self, symbol: &str, limit: Option<usize>) -> Result<Vec<PriceRecord>> {
        let conn = self.conn.lock();
        //Negative LIMIT means no limit in SQLite
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX)).unwrap_or(-1);

        let mut stmt = conn.prepare_cached(
            "SELECT symbol, step, price, timestamp, is_override FROM stock_prices
             WHERE symbol = ?1 ORDER BY step DESC LIMIT ?2",
        )?;
        let mut history = stmt
            .query_map(params![symbol, limit], read_record)?
            .collect::<rusqlite::Result<Vec<PriceRecord>>>()?;
        history.reverse();
        Ok(history)
    }

    fn get_all_latest_prices(&self) -> Result<BTreeMap<Symbol, f64>> {
        self.get_prices_as_of(Step::MAX)
    }

    fn get_prices_as_of(&self, step: Step) -> Result<BTreeMap<Symbol, f64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(LATEST_AS_OF_SQL)?;
        let rows = stmt.query_map(params![to_sql_step(step)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut res = BTreeMap::new();
        for row in rows {
            let (symbol, price) = row?;
            res.insert(symbol, price);
        }
        Ok(res)
    }

    fn has_prices(&self) -> Result<bool> {
        let conn = self.conn.lock();
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM stock_prices)",
            [],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }

    fn save_price(&self, record: &PriceRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO stock_prices (symbol, step, price, timestamp, is_override)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.symbol,
                to_sql_step(record.step),
                record.price,
                record.timestamp,
                record.is_override as i64,
            ],
        )
        .with_context(|| format!("Failed to save price for {} at {}", record.symbol, record.step))?;
        Ok(())
    }

    fn get_market_state(&self) -> Result<MarketState> {
        let conn = self.conn.lock();
        let state = conn.query_row(
            "SELECT current_step, last_updated, is_generating FROM market_state WHERE id = 1",
            [],
            |row| {
                let step: i64 = row.get(0)?;
                let is_generating: i64 = row.get(2)?;
                Ok(MarketState {
                    current_step: step.max(0) as Step,
                    last_updated: row.get(1)?,
                    is_generating: is_generating != 0,
                })
            },
        )?;
        Ok(state)
    }

    fn update_market_state(&self, state: &MarketState) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE market_state SET current_step = ?1, last_updated = ?2 WHERE id = 1",
            params![to_sql_step(state.current_step), state.last_updated],
        )
        .context("Failed to update market state")?;
        Ok(())
    }

    fn try_lock_generation(&self) -> Result<bool> {
        let conn = self.conn.lock();
        //Single statement so the check and the set cannot interleave with another writer, even one
        //in a different process
        let changed = conn.execute(
            "UPDATE market_state SET is_generating = 1 WHERE id = 1 AND is_generating = 0",
            [],
        )?;
        Ok(changed == 1)
    }

    fn set_generation_lock(&self, locked: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE market_state SET is_generating = ?1 WHERE id = 1",
            params![locked as i64],
        )?;
        Ok(())
    }

    fn is_generation_locked(&self) -> Result<bool> {
        Ok(self.get_market_state()?.is_generating)
    }
}
