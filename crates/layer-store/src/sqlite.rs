//! SQLite storage for gates and the request audit log

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use layer_core::{
    AuditRecord, AuditSink, DuplicateGateName, Gate, GateStore, OverridePolicy, RoutingStrategy,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Aggregates over the audit log for one gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateAnalytics {
    pub gate_id: String,
    pub request_count: u64,
    pub success_count: u64,
    /// Fraction of successful requests, 0.0 when there are none
    pub success_rate: f64,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub avg_latency_ms: f64,
}

/// SQLite database wrapper (thread-safe via Arc<Mutex>)
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

const GATE_COLUMNS: &str = "id, owner_id, name, description, model, system_prompt, temperature,
     max_tokens, top_p, allow_overrides, tags, routing_strategy, fallback_models,
     created_at, updated_at";

fn lock(conn: &Mutex<Connection>) -> std::sync::MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| {
        warn!("Database mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// UNIQUE(owner_id, name) violations become [`DuplicateGateName`]
fn gate_write_error(e: rusqlite::Error, gate: &Gate, action: &str) -> anyhow::Error {
    let unique = matches!(
        &e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    );
    if unique {
        DuplicateGateName {
            owner_id: gate.owner_id.clone(),
            name: gate.name.clone(),
        }
        .into()
    } else {
        anyhow::Error::new(e).context(format!("Failed to {} gate '{}'", action, gate.name))
    }
}

fn gate_from_row(row: &Row<'_>) -> rusqlite::Result<Gate> {
    let strategy: String = row.get(11)?;
    Ok(Gate {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        model: row.get(4)?,
        system_prompt: row.get(5)?,
        temperature: row.get(6)?,
        max_tokens: row.get(7)?,
        top_p: row.get(8)?,
        allow_overrides: json_column::<OverridePolicy>(row, 9)?,
        tags: json_column(row, 10)?,
        routing_strategy: RoutingStrategy::parse(&strategy).unwrap_or_default(),
        fallback_models: json_column(row, 12)?,
        created_at: time_column(row, 13)?,
        updated_at: time_column(row, 14)?,
    })
}

/// Column values for a gate, in `GATE_COLUMNS` order
struct GateRow {
    allow_overrides: String,
    tags: String,
    fallback_models: String,
}

impl GateRow {
    fn encode(gate: &Gate) -> Result<Self> {
        Ok(Self {
            allow_overrides: serde_json::to_string(&gate.allow_overrides)?,
            tags: serde_json::to_string(&gate.tags)?,
            fallback_models: serde_json::to_string(&gate.fallback_models)?,
        })
    }
}

impl SqliteStore {
    /// Open (or create) the database and initialize the schema
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).context("Failed to open SQLite database")?;
        info!("Initializing layer database at {:?}", path.as_ref());
        Self::init(conn)
    }

    /// In-memory database, for tests and throwaway runs
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS gates (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                model TEXT NOT NULL,
                system_prompt TEXT,
                temperature REAL,
                max_tokens INTEGER,
                top_p REAL,
                allow_overrides TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                routing_strategy TEXT NOT NULL DEFAULT 'single',
                fallback_models TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(owner_id, name)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                gate_id TEXT,
                gate_name TEXT,
                model_requested TEXT,
                model_used TEXT,
                prompt_tokens INTEGER NOT NULL DEFAULT 0,
                completion_tokens INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                cost_usd REAL NOT NULL DEFAULT 0,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                success INTEGER NOT NULL,
                error_message TEXT,
                user_agent TEXT,
                ip_address TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_gates_owner ON gates(owner_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_requests_gate ON requests(gate_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_requests_owner_created ON requests(owner_id, created_at)",
            [],
        )?;

        debug!("Database schema initialized successfully");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn query_gate(&self, sql: String, args: Vec<String>) -> Result<Option<Gate>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn);
            let gate = conn
                .query_row(&sql, rusqlite::params_from_iter(args.iter()), gate_from_row)
                .optional()?;
            Ok(gate)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Request count, cost and success rate for one gate of `owner_id`
    pub async fn gate_analytics(&self, owner_id: &str, gate_id: &str) -> Result<GateAnalytics> {
        let conn = Arc::clone(&self.conn);
        let owner_id = owner_id.to_owned();
        let gate_id = gate_id.to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn);
            let (request_count, success_count, total_cost_usd, total_tokens, avg_latency_ms) = conn
                .query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(success), 0),
                            COALESCE(SUM(cost_usd), 0.0),
                            COALESCE(SUM(total_tokens), 0),
                            COALESCE(AVG(latency_ms), 0.0)
                     FROM requests WHERE owner_id = ?1 AND gate_id = ?2",
                    params![&owner_id, &gate_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, f64>(4)?,
                        ))
                    },
                )?;

            let request_count = request_count.max(0) as u64;
            let success_count = success_count.max(0) as u64;
            let success_rate = if request_count == 0 {
                0.0
            } else {
                success_count as f64 / request_count as f64
            };

            Ok(GateAnalytics {
                gate_id,
                request_count,
                success_count,
                success_rate,
                total_cost_usd,
                total_tokens: total_tokens.max(0) as u64,
                avg_latency_ms,
            })
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Most recent audit records for an owner, newest first
    pub async fn recent_requests(&self, owner_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        let conn = Arc::clone(&self.conn);
        let owner_id = owner_id.to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn);
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, gate_id, gate_name, model_requested, model_used,
                        prompt_tokens, completion_tokens, total_tokens, cost_usd, latency_ms,
                        success, error_message, user_agent, ip_address, created_at
                 FROM requests WHERE owner_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let records = stmt
                .query_map(params![&owner_id, limit as i64], |row| {
                    Ok(AuditRecord {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        gate_id: row.get(2)?,
                        gate_name: row.get(3)?,
                        model_requested: row.get(4)?,
                        model_used: row.get(5)?,
                        prompt_tokens: row.get(6)?,
                        completion_tokens: row.get(7)?,
                        total_tokens: row.get(8)?,
                        cost_usd: row.get(9)?,
                        latency_ms: row.get::<_, i64>(10)?.max(0) as u64,
                        success: row.get(11)?,
                        error_message: row.get(12)?,
                        user_agent: row.get(13)?,
                        ip_address: row.get(14)?,
                        created_at: time_column(row, 15)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
        .context("spawn_blocking task panicked")?
    }
}

#[async_trait]
impl GateStore for SqliteStore {
    async fn get_by_name(&self, owner_id: &str, name: &str) -> Result<Option<Gate>> {
        self.query_gate(
            format!(
                "SELECT {} FROM gates WHERE owner_id = ?1 AND name = ?2",
                GATE_COLUMNS
            ),
            vec![owner_id.to_owned(), name.to_owned()],
        )
        .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Gate>> {
        self.query_gate(
            format!("SELECT {} FROM gates WHERE id = ?1", GATE_COLUMNS),
            vec![id.to_owned()],
        )
        .await
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<Gate>> {
        let conn = Arc::clone(&self.conn);
        let owner_id = owner_id.to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn);
            let sql = format!(
                "SELECT {} FROM gates WHERE owner_id = ?1 ORDER BY created_at DESC",
                GATE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let gates = stmt
                .query_map(params![&owner_id], gate_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(gates)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    async fn insert(&self, gate: &Gate) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let gate = gate.clone();

        tokio::task::spawn_blocking(move || {
            let encoded = GateRow::encode(&gate)?;
            let conn = lock(&conn);
            conn.execute(
                "INSERT INTO gates (id, owner_id, name, description, model, system_prompt,
                     temperature, max_tokens, top_p, allow_overrides, tags, routing_strategy,
                     fallback_models, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    &gate.id,
                    &gate.owner_id,
                    &gate.name,
                    &gate.description,
                    &gate.model,
                    &gate.system_prompt,
                    gate.temperature,
                    gate.max_tokens,
                    gate.top_p,
                    encoded.allow_overrides,
                    encoded.tags,
                    gate.routing_strategy.as_str(),
                    encoded.fallback_models,
                    gate.created_at.to_rfc3339(),
                    gate.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| gate_write_error(e, &gate, "insert"))?;

            debug!("Inserted gate: {} ({})", gate.name, gate.id);
            Ok(())
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    async fn update(&self, gate: &Gate) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let gate = gate.clone();

        tokio::task::spawn_blocking(move || {
            let encoded = GateRow::encode(&gate)?;
            let conn = lock(&conn);
            let changed = conn.execute(
                "UPDATE gates SET name = ?2, description = ?3, model = ?4, system_prompt = ?5,
                     temperature = ?6, max_tokens = ?7, top_p = ?8, allow_overrides = ?9,
                     tags = ?10, routing_strategy = ?11, fallback_models = ?12, updated_at = ?13
                 WHERE id = ?1",
                params![
                    &gate.id,
                    &gate.name,
                    &gate.description,
                    &gate.model,
                    &gate.system_prompt,
                    gate.temperature,
                    gate.max_tokens,
                    gate.top_p,
                    encoded.allow_overrides,
                    encoded.tags,
                    gate.routing_strategy.as_str(),
                    encoded.fallback_models,
                    gate.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| gate_write_error(e, &gate, "update"))?;
            if changed == 0 {
                anyhow::bail!("Gate {} does not exist", gate.id);
            }
            debug!("Updated gate: {} ({})", gate.name, gate.id);
            Ok(())
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let conn = Arc::clone(&self.conn);
        let id = id.to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn);
            let removed = conn.execute("DELETE FROM gates WHERE id = ?1", params![&id])?;
            Ok(removed > 0)
        })
        .await
        .context("spawn_blocking task panicked")?
    }
}

#[async_trait]
impl AuditSink for SqliteStore {
    async fn write(&self, record: &AuditRecord) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let r = record.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn);
            conn.execute(
                "INSERT INTO requests (id, owner_id, gate_id, gate_name, model_requested,
                     model_used, prompt_tokens, completion_tokens, total_tokens, cost_usd,
                     latency_ms, success, error_message, user_agent, ip_address, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    &r.id,
                    &r.owner_id,
                    &r.gate_id,
                    &r.gate_name,
                    &r.model_requested,
                    &r.model_used,
                    r.prompt_tokens,
                    r.completion_tokens,
                    r.total_tokens,
                    r.cost_usd,
                    r.latency_ms as i64,
                    r.success,
                    &r.error_message,
                    &r.user_agent,
                    &r.ip_address,
                    r.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
        .context("spawn_blocking task panicked")?
    }
}
