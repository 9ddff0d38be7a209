//! SQLite Storage
//!
//! Durable storage for swap records that survives service restarts. Uses
//! connection pooling via r2d2 for concurrent access; each status
//! transition runs in its own transaction.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;

use super::traits::{
    check_transition, ChainSwapStore, ChannelCreationStore, KeyIndexStore, ReverseStore,
    StorageError, StorageResult, SubmarineStore, TxLabelStore,
};
use crate::types::status::SwapStatus;
use crate::types::swap::{
    ChainSwap, ChainSwapSide, ChannelCreation, ChannelCreationStatus, OrderSide, ReverseSwap,
    Swap,
};

/// SQLite-backed store with connection pooling
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Create a new store at the given database path, running migrations
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS swaps (
                id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                order_side TEXT NOT NULL,
                status TEXT NOT NULL,
                expected_amount INTEGER NOT NULL,
                onchain_amount INTEGER,
                invoice TEXT NOT NULL,
                preimage_hash TEXT NOT NULL,
                preimage TEXT,
                refund_public_key TEXT NOT NULL,
                claim_public_key TEXT NOT NULL,
                key_index INTEGER NOT NULL,
                claim_leaf TEXT NOT NULL,
                refund_leaf TEXT NOT NULL,
                lockup_address TEXT NOT NULL UNIQUE,
                timeout_block_height INTEGER NOT NULL,
                lockup_txid TEXT,
                lockup_vout INTEGER,
                accepted_zero_conf INTEGER NOT NULL DEFAULT 0,
                channel_creation INTEGER NOT NULL DEFAULT 0,
                failure_reason TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_swaps_status ON swaps (status);
            CREATE INDEX IF NOT EXISTS idx_swaps_preimage_hash ON swaps (preimage_hash);

            CREATE TABLE IF NOT EXISTS reverse_swaps (
                id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                order_side TEXT NOT NULL,
                status TEXT NOT NULL,
                invoice_amount INTEGER NOT NULL,
                onchain_amount INTEGER NOT NULL,
                invoice TEXT,
                miner_fee_invoice TEXT,
                preimage_hash TEXT NOT NULL,
                preimage TEXT,
                claim_public_key TEXT NOT NULL,
                refund_public_key TEXT NOT NULL,
                key_index INTEGER NOT NULL,
                claim_leaf TEXT NOT NULL,
                refund_leaf TEXT NOT NULL,
                lockup_address TEXT NOT NULL UNIQUE,
                timeout_block_height INTEGER NOT NULL,
                lockup_txid TEXT,
                lockup_vout INTEGER,
                failure_reason TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reverse_status ON reverse_swaps (status);
            CREATE INDEX IF NOT EXISTS idx_reverse_preimage_hash
                ON reverse_swaps (preimage_hash);

            CREATE TABLE IF NOT EXISTS chain_swaps (
                id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                order_side TEXT NOT NULL,
                status TEXT NOT NULL,
                preimage_hash TEXT NOT NULL,
                preimage TEXT,
                sending TEXT NOT NULL,
                receiving TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS channel_creations (
                swap_id TEXT PRIMARY KEY,
                node_public_key TEXT NOT NULL,
                private INTEGER NOT NULL,
                inbound_liquidity_percent INTEGER NOT NULL,
                funding_txid TEXT,
                funding_vout INTEGER,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_channel_creations_status
                ON channel_creations (status);

            CREATE TABLE IF NOT EXISTS key_indices (
                symbol TEXT PRIMARY KEY,
                next_index INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transaction_labels (
                txid TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                label TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

fn parse_status(s: String) -> Result<SwapStatus, StorageError> {
    SwapStatus::from_str(&s).map_err(StorageError::InvalidData)
}

fn parse_side(s: String) -> Result<OrderSide, StorageError> {
    OrderSide::from_str(&s).map_err(StorageError::InvalidData)
}

fn row_to_swap(row: &Row<'_>) -> rusqlite::Result<(Swap, String, String)> {
    let order_side: String = row.get("order_side")?;
    let status: String = row.get("status")?;

    let swap = Swap {
        id: row.get("id")?,
        pair: row.get("pair")?,
        // Placeholder values fixed up by the caller after parsing
        order_side: OrderSide::Buy,
        status: SwapStatus::SwapCreated,
        expected_amount: row.get::<_, i64>("expected_amount")? as u64,
        onchain_amount: row
            .get::<_, Option<i64>>("onchain_amount")?
            .map(|v| v as u64),
        invoice: row.get("invoice")?,
        preimage_hash: row.get("preimage_hash")?,
        preimage: row.get("preimage")?,
        refund_public_key: row.get("refund_public_key")?,
        claim_public_key: row.get("claim_public_key")?,
        key_index: row.get::<_, i64>("key_index")? as u32,
        claim_leaf: row.get("claim_leaf")?,
        refund_leaf: row.get("refund_leaf")?,
        lockup_address: row.get("lockup_address")?,
        timeout_block_height: row.get::<_, i64>("timeout_block_height")? as u32,
        lockup_txid: row.get("lockup_txid")?,
        lockup_vout: row.get::<_, Option<i64>>("lockup_vout")?.map(|v| v as u32),
        accepted_zero_conf: row.get("accepted_zero_conf")?,
        channel_creation: row.get("channel_creation")?,
        failure_reason: row.get("failure_reason")?,
        created_at: row.get::<_, i64>("created_at")? as u64,
        updated_at: row.get::<_, i64>("updated_at")? as u64,
    };

    Ok((swap, order_side, status))
}

fn finish_swap(parts: (Swap, String, String)) -> StorageResult<Swap> {
    let (mut swap, order_side, status) = parts;
    swap.order_side = parse_side(order_side)?;
    swap.status = parse_status(status)?;
    Ok(swap)
}

fn row_to_reverse(row: &Row<'_>) -> rusqlite::Result<(ReverseSwap, String, String)> {
    let order_side: String = row.get("order_side")?;
    let status: String = row.get("status")?;

    let swap = ReverseSwap {
        id: row.get("id")?,
        pair: row.get("pair")?,
        order_side: OrderSide::Buy,
        status: SwapStatus::SwapCreated,
        invoice_amount: row.get::<_, i64>("invoice_amount")? as u64,
        onchain_amount: row.get::<_, i64>("onchain_amount")? as u64,
        invoice: row.get("invoice")?,
        miner_fee_invoice: row.get("miner_fee_invoice")?,
        preimage_hash: row.get("preimage_hash")?,
        preimage: row.get("preimage")?,
        claim_public_key: row.get("claim_public_key")?,
        refund_public_key: row.get("refund_public_key")?,
        key_index: row.get::<_, i64>("key_index")? as u32,
        claim_leaf: row.get("claim_leaf")?,
        refund_leaf: row.get("refund_leaf")?,
        lockup_address: row.get("lockup_address")?,
        timeout_block_height: row.get::<_, i64>("timeout_block_height")? as u32,
        lockup_txid: row.get("lockup_txid")?,
        lockup_vout: row.get::<_, Option<i64>>("lockup_vout")?.map(|v| v as u32),
        failure_reason: row.get("failure_reason")?,
        created_at: row.get::<_, i64>("created_at")? as u64,
        updated_at: row.get::<_, i64>("updated_at")? as u64,
    };

    Ok((swap, order_side, status))
}

fn finish_reverse(parts: (ReverseSwap, String, String)) -> StorageResult<ReverseSwap> {
    let (mut swap, order_side, status) = parts;
    swap.order_side = parse_side(order_side)?;
    swap.status = parse_status(status)?;
    Ok(swap)
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl SubmarineStore for SqliteStore {
    async fn insert_swap(&self, swap: &Swap) -> StorageResult<()> {
        let conn = self.conn()?;
        let result = conn.execute(
            r#"INSERT INTO swaps (
                id, pair, order_side, status, expected_amount, onchain_amount,
                invoice, preimage_hash, preimage, refund_public_key,
                claim_public_key, key_index, claim_leaf, refund_leaf,
                lockup_address, timeout_block_height, lockup_txid, lockup_vout,
                accepted_zero_conf, channel_creation, failure_reason,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)"#,
            params![
                swap.id,
                swap.pair,
                swap.order_side.to_string(),
                swap.status.to_string(),
                swap.expected_amount as i64,
                swap.onchain_amount.map(|v| v as i64),
                swap.invoice,
                swap.preimage_hash,
                swap.preimage,
                swap.refund_public_key,
                swap.claim_public_key,
                swap.key_index as i64,
                swap.claim_leaf,
                swap.refund_leaf,
                swap.lockup_address,
                swap.timeout_block_height as i64,
                swap.lockup_txid,
                swap.lockup_vout.map(|v| v as i64),
                swap.accepted_zero_conf,
                swap.channel_creation,
                swap.failure_reason,
                swap.created_at as i64,
                swap.updated_at as i64,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::Duplicate(swap.id.clone()))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_swap(&self, id: &str) -> StorageResult<Option<Swap>> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM swaps WHERE id = ?1", params![id], row_to_swap)
            .optional()
            .map_err(db_err)?
            .map(finish_swap)
            .transpose()
    }

    async fn get_swap_by_preimage_hash(&self, hash: &str) -> StorageResult<Option<Swap>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM swaps WHERE preimage_hash = ?1",
            params![hash],
            row_to_swap,
        )
        .optional()
        .map_err(db_err)?
        .map(finish_swap)
        .transpose()
    }

    async fn get_swap_by_lockup_address(&self, address: &str) -> StorageResult<Option<Swap>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM swaps WHERE lockup_address = ?1",
            params![address],
            row_to_swap,
        )
        .optional()
        .map_err(db_err)?
        .map(finish_swap)
        .transpose()
    }

    async fn get_swaps_by_status(&self, status: SwapStatus) -> StorageResult<Vec<Swap>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM swaps WHERE status = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![status.to_string()], row_to_swap)
            .map_err(db_err)?;

        let mut swaps = Vec::new();
        for row in rows {
            swaps.push(finish_swap(row.map_err(db_err)?)?);
        }
        Ok(swaps)
    }

    async fn set_swap_status(&self, id: &str, status: SwapStatus) -> StorageResult<Swap> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let current = tx
            .query_row(
                "SELECT status FROM swaps WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        check_transition(Swap::KIND, id, parse_status(current)?, status)?;

        tx.execute(
            "UPDATE swaps SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_string(), now_secs(), id],
        )
        .map_err(db_err)?;

        let swap = tx
            .query_row("SELECT * FROM swaps WHERE id = ?1", params![id], row_to_swap)
            .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        finish_swap(swap)
    }

    async fn set_swap_lockup(
        &self,
        id: &str,
        txid: &str,
        vout: u32,
        amount: u64,
        zero_conf: bool,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                r#"UPDATE swaps SET lockup_txid = ?1, lockup_vout = ?2,
                   onchain_amount = ?3, accepted_zero_conf = ?4, updated_at = ?5
                   WHERE id = ?6"#,
                params![txid, vout as i64, amount as i64, zero_conf, now_secs(), id],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_swap_invoice(
        &self,
        id: &str,
        invoice: &str,
        expected_amount: u64,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE swaps SET invoice = ?1, expected_amount = ?2, updated_at = ?3 WHERE id = ?4",
                params![invoice, expected_amount as i64, now_secs(), id],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_swap_preimage(&self, id: &str, preimage: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE swaps SET preimage = ?1, updated_at = ?2 WHERE id = ?3",
                params![preimage, now_secs(), id],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_swap_failure_reason(&self, id: &str, reason: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE swaps SET failure_reason = ?1, updated_at = ?2 WHERE id = ?3",
                params![reason, now_secs(), id],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReverseStore for SqliteStore {
    async fn insert_reverse(&self, swap: &ReverseSwap) -> StorageResult<()> {
        let conn = self.conn()?;
        let result = conn.execute(
            r#"INSERT INTO reverse_swaps (
                id, pair, order_side, status, invoice_amount, onchain_amount,
                invoice, miner_fee_invoice, preimage_hash, preimage,
                claim_public_key, refund_public_key, key_index, claim_leaf,
                refund_leaf, lockup_address, timeout_block_height, lockup_txid,
                lockup_vout, failure_reason, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"#,
            params![
                swap.id,
                swap.pair,
                swap.order_side.to_string(),
                swap.status.to_string(),
                swap.invoice_amount as i64,
                swap.onchain_amount as i64,
                swap.invoice,
                swap.miner_fee_invoice,
                swap.preimage_hash,
                swap.preimage,
                swap.claim_public_key,
                swap.refund_public_key,
                swap.key_index as i64,
                swap.claim_leaf,
                swap.refund_leaf,
                swap.lockup_address,
                swap.timeout_block_height as i64,
                swap.lockup_txid,
                swap.lockup_vout.map(|v| v as i64),
                swap.failure_reason,
                swap.created_at as i64,
                swap.updated_at as i64,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::Duplicate(swap.id.clone()))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_reverse(&self, id: &str) -> StorageResult<Option<ReverseSwap>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM reverse_swaps WHERE id = ?1",
            params![id],
            row_to_reverse,
        )
        .optional()
        .map_err(db_err)?
        .map(finish_reverse)
        .transpose()
    }

    async fn get_reverse_by_preimage_hash(
        &self,
        hash: &str,
    ) -> StorageResult<Option<ReverseSwap>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM reverse_swaps WHERE preimage_hash = ?1",
            params![hash],
            row_to_reverse,
        )
        .optional()
        .map_err(db_err)?
        .map(finish_reverse)
        .transpose()
    }

    async fn get_reverses_by_status(
        &self,
        status: SwapStatus,
    ) -> StorageResult<Vec<ReverseSwap>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM reverse_swaps WHERE status = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![status.to_string()], row_to_reverse)
            .map_err(db_err)?;

        let mut swaps = Vec::new();
        for row in rows {
            swaps.push(finish_reverse(row.map_err(db_err)?)?);
        }
        Ok(swaps)
    }

    async fn set_reverse_status(
        &self,
        id: &str,
        status: SwapStatus,
    ) -> StorageResult<ReverseSwap> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let current = tx
            .query_row(
                "SELECT status FROM reverse_swaps WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        check_transition(ReverseSwap::KIND, id, parse_status(current)?, status)?;

        tx.execute(
            "UPDATE reverse_swaps SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_string(), now_secs(), id],
        )
        .map_err(db_err)?;

        let swap = tx
            .query_row(
                "SELECT * FROM reverse_swaps WHERE id = ?1",
                params![id],
                row_to_reverse,
            )
            .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        finish_reverse(swap)
    }

    async fn set_reverse_invoice(
        &self,
        id: &str,
        invoice: &str,
        miner_fee_invoice: Option<&str>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                r#"UPDATE reverse_swaps SET invoice = ?1, miner_fee_invoice = ?2,
                   updated_at = ?3 WHERE id = ?4"#,
                params![invoice, miner_fee_invoice, now_secs(), id],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_reverse_lockup(&self, id: &str, txid: &str, vout: u32) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                r#"UPDATE reverse_swaps SET lockup_txid = ?1, lockup_vout = ?2,
                   updated_at = ?3 WHERE id = ?4"#,
                params![txid, vout as i64, now_secs(), id],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_reverse_preimage(&self, id: &str, preimage: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE reverse_swaps SET preimage = ?1, updated_at = ?2 WHERE id = ?3",
                params![preimage, now_secs(), id],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainSwapStore for SqliteStore {
    async fn insert_chain_swap(&self, swap: &ChainSwap) -> StorageResult<()> {
        let sending = serde_json::to_string(&swap.sending)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let receiving = serde_json::to_string(&swap.receiving)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        let conn = self.conn()?;
        let result = conn.execute(
            r#"INSERT INTO chain_swaps (
                id, pair, order_side, status, preimage_hash, preimage,
                sending, receiving, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                swap.id,
                swap.pair,
                swap.order_side.to_string(),
                swap.status.to_string(),
                swap.preimage_hash,
                swap.preimage,
                sending,
                receiving,
                swap.created_at as i64,
                swap.updated_at as i64,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::Duplicate(swap.id.clone()))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_chain_swap(&self, id: &str) -> StorageResult<Option<ChainSwap>> {
        let conn = self.conn()?;
        let parts = conn
            .query_row(
                "SELECT * FROM chain_swaps WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>("id")?,
                        row.get::<_, String>("pair")?,
                        row.get::<_, String>("order_side")?,
                        row.get::<_, String>("status")?,
                        row.get::<_, String>("preimage_hash")?,
                        row.get::<_, Option<String>>("preimage")?,
                        row.get::<_, String>("sending")?,
                        row.get::<_, String>("receiving")?,
                        row.get::<_, i64>("created_at")?,
                        row.get::<_, i64>("updated_at")?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some(parts) = parts else {
            return Ok(None);
        };

        let sending: ChainSwapSide = serde_json::from_str(&parts.6)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let receiving: ChainSwapSide = serde_json::from_str(&parts.7)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        Ok(Some(ChainSwap {
            id: parts.0,
            pair: parts.1,
            order_side: parse_side(parts.2)?,
            status: parse_status(parts.3)?,
            preimage_hash: parts.4,
            preimage: parts.5,
            sending,
            receiving,
            created_at: parts.8 as u64,
            updated_at: parts.9 as u64,
        }))
    }

    async fn set_chain_swap_status(
        &self,
        id: &str,
        status: SwapStatus,
    ) -> StorageResult<ChainSwap> {
        {
            let conn = self.conn()?;
            let current = conn
                .query_row(
                    "SELECT status FROM chain_swaps WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(db_err)?
                .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

            check_transition(ChainSwap::KIND, id, parse_status(current)?, status)?;

            conn.execute(
                "UPDATE chain_swaps SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.to_string(), now_secs(), id],
            )
            .map_err(db_err)?;
        }

        self.get_chain_swap(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl ChannelCreationStore for SqliteStore {
    async fn insert_channel_creation(&self, creation: &ChannelCreation) -> StorageResult<()> {
        let conn = self.conn()?;
        let result = conn.execute(
            r#"INSERT INTO channel_creations (
                swap_id, node_public_key, private, inbound_liquidity_percent,
                funding_txid, funding_vout, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                creation.swap_id,
                creation.node_public_key,
                creation.private,
                creation.inbound_liquidity_percent as i64,
                creation.funding_txid,
                creation.funding_vout.map(|v| v as i64),
                creation.status.to_string(),
                creation.created_at as i64,
                creation.updated_at as i64,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::Duplicate(creation.swap_id.clone()))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_channel_creation(
        &self,
        swap_id: &str,
    ) -> StorageResult<Option<ChannelCreation>> {
        let conn = self.conn()?;
        let parts = conn
            .query_row(
                "SELECT * FROM channel_creations WHERE swap_id = ?1",
                params![swap_id],
                row_to_channel_creation,
            )
            .optional()
            .map_err(db_err)?;

        parts.map(finish_channel_creation).transpose()
    }

    async fn get_channel_creations_by_status(
        &self,
        status: ChannelCreationStatus,
    ) -> StorageResult<Vec<ChannelCreation>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM channel_creations WHERE status = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![status.to_string()], row_to_channel_creation)
            .map_err(db_err)?;

        let mut creations = Vec::new();
        for row in rows {
            creations.push(finish_channel_creation(row.map_err(db_err)?)?);
        }
        Ok(creations)
    }

    async fn set_channel_creation_status(
        &self,
        swap_id: &str,
        status: ChannelCreationStatus,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE channel_creations SET status = ?1, updated_at = ?2 WHERE swap_id = ?3",
                params![status.to_string(), now_secs(), swap_id],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(StorageError::NotFound(swap_id.to_string()));
        }
        Ok(())
    }

    async fn set_channel_creation_funding(
        &self,
        swap_id: &str,
        funding_txid: &str,
        funding_vout: u32,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                r#"UPDATE channel_creations SET funding_txid = ?1, funding_vout = ?2,
                   updated_at = ?3 WHERE swap_id = ?4"#,
                params![funding_txid, funding_vout as i64, now_secs(), swap_id],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(StorageError::NotFound(swap_id.to_string()));
        }
        Ok(())
    }
}

fn row_to_channel_creation(row: &Row<'_>) -> rusqlite::Result<(ChannelCreation, String)> {
    let status: String = row.get("status")?;
    let creation = ChannelCreation {
        swap_id: row.get("swap_id")?,
        node_public_key: row.get("node_public_key")?,
        private: row.get("private")?,
        inbound_liquidity_percent: row.get::<_, i64>("inbound_liquidity_percent")? as u32,
        funding_txid: row.get("funding_txid")?,
        funding_vout: row.get::<_, Option<i64>>("funding_vout")?.map(|v| v as u32),
        status: ChannelCreationStatus::Attempted,
        created_at: row.get::<_, i64>("created_at")? as u64,
        updated_at: row.get::<_, i64>("updated_at")? as u64,
    };
    Ok((creation, status))
}

fn finish_channel_creation(
    parts: (ChannelCreation, String),
) -> StorageResult<ChannelCreation> {
    let (mut creation, status) = parts;
    creation.status =
        ChannelCreationStatus::from_str(&status).map_err(StorageError::InvalidData)?;
    Ok(creation)
}

#[async_trait]
impl KeyIndexStore for SqliteStore {
    async fn next_key_index(&self, symbol: &str) -> StorageResult<u32> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let current: i64 = tx
            .query_row(
                "SELECT next_index FROM key_indices WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?
            .unwrap_or(0);

        tx.execute(
            r#"INSERT INTO key_indices (symbol, next_index) VALUES (?1, ?2)
               ON CONFLICT(symbol) DO UPDATE SET next_index = ?2"#,
            params![symbol, current + 1],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(current as u32)
    }
}

#[async_trait]
impl TxLabelStore for SqliteStore {
    async fn label_transaction(
        &self,
        txid: &str,
        symbol: &str,
        label: &str,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO transaction_labels (txid, symbol, label) VALUES (?1, ?2, ?3)
               ON CONFLICT(txid) DO UPDATE SET label = ?3"#,
            params![txid, symbol, label],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_transaction_label(&self, txid: &str) -> StorageResult<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT label FROM transaction_labels WHERE txid = ?1",
            params![txid],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::swap::OrderSide;

    fn sample_swap() -> Swap {
        Swap::new(
            "BTC/BTC".to_string(),
            OrderSide::Sell,
            1_000_000,
            "lnbcrt1invoice".to_string(),
            "ab".repeat(32),
            "02".repeat(33),
            "03".repeat(33),
            7,
            "51".to_string(),
            "52".to_string(),
            "bcrt1pxyz".to_string(),
            800,
        )
    }

    #[tokio::test]
    async fn test_swap_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let swap = sample_swap();
        store.insert_swap(&swap).await.unwrap();

        let loaded = store.get_swap(&swap.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, swap.id);
        assert_eq!(loaded.status, SwapStatus::SwapCreated);
        assert_eq!(loaded.expected_amount, 1_000_000);
        assert_eq!(loaded.key_index, 7);
        assert_eq!(loaded.order_side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_status_transition_enforced() {
        let store = SqliteStore::in_memory().unwrap();
        let swap = sample_swap();
        store.insert_swap(&swap).await.unwrap();

        let updated = store
            .set_swap_status(&swap.id, SwapStatus::TransactionMempool)
            .await
            .unwrap();
        assert_eq!(updated.status, SwapStatus::TransactionMempool);

        let result = store
            .set_swap_status(&swap.id, SwapStatus::InvoicePaid)
            .await;
        assert!(matches!(
            result,
            Err(StorageError::InvalidTransition { .. })
        ));

        // Rejected transition left the record unchanged
        let loaded = store.get_swap(&swap.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SwapStatus::TransactionMempool);
    }

    #[tokio::test]
    async fn test_lockup_and_preimage_updates() {
        let store = SqliteStore::in_memory().unwrap();
        let swap = sample_swap();
        store.insert_swap(&swap).await.unwrap();

        store
            .set_swap_lockup(&swap.id, "txid1", 1, 1_000_000, true)
            .await
            .unwrap();
        store
            .set_swap_preimage(&swap.id, &"cd".repeat(32))
            .await
            .unwrap();

        let loaded = store.get_swap(&swap.id).await.unwrap().unwrap();
        assert_eq!(loaded.lockup_txid.as_deref(), Some("txid1"));
        assert_eq!(loaded.lockup_vout, Some(1));
        assert!(loaded.accepted_zero_conf);
        assert_eq!(loaded.preimage.as_deref(), Some("cd".repeat(32).as_str()));
    }

    #[tokio::test]
    async fn test_reverse_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let swap = ReverseSwap::new(
            "BTC/BTC".to_string(),
            OrderSide::Buy,
            500_000,
            495_000,
            "ef".repeat(32),
            "02".repeat(33),
            "03".repeat(33),
            0,
            "51".to_string(),
            "52".to_string(),
            "bcrt1pabc".to_string(),
            900,
        );
        store.insert_reverse(&swap).await.unwrap();

        store
            .set_reverse_invoice(&swap.id, "lnbcrt_hold", Some("lnbcrt_prepay"))
            .await
            .unwrap();
        store
            .set_reverse_status(&swap.id, SwapStatus::InvoiceSet)
            .await
            .unwrap();

        let loaded = store.get_reverse(&swap.id).await.unwrap().unwrap();
        assert_eq!(loaded.invoice.as_deref(), Some("lnbcrt_hold"));
        assert_eq!(loaded.miner_fee_invoice.as_deref(), Some("lnbcrt_prepay"));
        assert_eq!(loaded.status, SwapStatus::InvoiceSet);
    }

    #[tokio::test]
    async fn test_channel_creation_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let creation = ChannelCreation::new("swap_1".to_string(), "02ab".to_string(), true, 25);
        store.insert_channel_creation(&creation).await.unwrap();

        store
            .set_channel_creation_funding("swap_1", "ftxid", 0)
            .await
            .unwrap();
        store
            .set_channel_creation_status("swap_1", ChannelCreationStatus::Created)
            .await
            .unwrap();

        let loaded = store
            .get_channel_creation("swap_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, ChannelCreationStatus::Created);
        assert_eq!(loaded.funding_txid.as_deref(), Some("ftxid"));

        let created = store
            .get_channel_creations_by_status(ChannelCreationStatus::Created)
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
    }

    #[tokio::test]
    async fn test_key_index_cursor_persists() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.next_key_index("BTC").await.unwrap(), 0);
        assert_eq!(store.next_key_index("BTC").await.unwrap(), 1);
        assert_eq!(store.next_key_index("BTC").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_transaction_labels_upsert() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .label_transaction("txid1", "BTC", "lockup")
            .await
            .unwrap();
        store
            .label_transaction("txid1", "BTC", "refund")
            .await
            .unwrap();

        assert_eq!(
            store.get_transaction_label("txid1").await.unwrap().as_deref(),
            Some("refund")
        );
    }
}
