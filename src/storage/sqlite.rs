//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Alert uniqueness is enforced by a partial unique index on
//! `alerts(machine_id, alert_type) WHERE resolved = 0`, so two writers racing
//! to open the same alert cannot both succeed.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertQuery, MachineInfo, MachineRecord, NewAlert, OpenAlertResult};
use crate::{
    Alert, AlertType, BrewType, FieldClock, MachineId, MachineStatus, MachineTelemetryState,
    Severity, UsageEvent,
};

const ALERT_COLUMNS: &str = "id, machine_id, alert_type, severity, message, threshold_value, \
                             resolved, created_at, updated_at";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` and run migrations
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use coffee_monitoring::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./brewwatch.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!("SQLite connection pool created");

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    async fn machine_exists(&self, machine_id: MachineId) -> StorageResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM machines WHERE id = ?")
            .bind(machine_id as i64)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<Alert> {
        let alert_type: String = row.get("alert_type");
        let alert_type = AlertType::from_token(&alert_type).ok_or_else(|| {
            StorageError::SerializationError(format!("unknown alert type '{alert_type}'"))
        })?;

        let severity: String = row.get("severity");
        let severity = Severity::from_token(&severity).ok_or_else(|| {
            StorageError::SerializationError(format!("unknown severity '{severity}'"))
        })?;

        Ok(Alert {
            id: row.get::<i64, _>("id") as u64,
            machine_id: row.get::<i64, _>("machine_id") as MachineId,
            alert_type,
            severity,
            message: row.get("message"),
            threshold_value: row.get("threshold_value"),
            resolved: row.get::<i64, _>("resolved") != 0,
            created_at: Self::millis_to_timestamp(row.get("created_at")),
            updated_at: Self::millis_to_timestamp(row.get("updated_at")),
        })
    }

    fn record_from_row(row: &SqliteRow) -> StorageResult<MachineRecord> {
        let id = row.get::<i64, _>("id") as MachineId;
        let info = MachineInfo {
            id,
            name: row.get("name"),
            location: row.get("location"),
        };

        let status: Option<String> = row.get("status");
        let state = match status {
            None => None,
            Some(status) => {
                let clock: String = row.get("field_clock");
                let clock: FieldClock = serde_json::from_str(&clock)?;

                Some(MachineTelemetryState {
                    machine_id: id,
                    status: MachineStatus::from_token(&status).ok_or_else(|| {
                        StorageError::SerializationError(format!("unknown status '{status}'"))
                    })?,
                    temperature_c: row.get("temperature_c"),
                    water_level_pct: row.get::<Option<i64>, _>("water_level_pct").map(|v| v as u8),
                    milk_level_pct: row.get::<Option<i64>, _>("milk_level_pct").map(|v| v as u8),
                    beans_level_pct: row.get::<Option<i64>, _>("beans_level_pct").map(|v| v as u8),
                    last_updated: Self::millis_to_timestamp(row.get("last_updated")),
                    clock,
                })
            }
        };

        Ok(MachineRecord { info, state })
    }

    fn usage_from_row(row: &SqliteRow) -> StorageResult<UsageEvent> {
        let brew_type: String = row.get("brew_type");

        Ok(UsageEvent {
            machine_id: row.get::<i64, _>("machine_id") as MachineId,
            brew_type: BrewType::from_token(&brew_type).ok_or_else(|| {
                StorageError::SerializationError(format!("unknown brew type '{brew_type}'"))
            })?,
            volume_ml: row.get::<Option<i64>, _>("volume_ml").map(|v| v as u32),
            temp_at_brew_c: row.get("temp_at_brew_c"),
            timestamp: Self::millis_to_timestamp(row.get("timestamp")),
        })
    }
}

const MACHINE_SELECT: &str = r#"
    SELECT m.id, m.name, m.location,
           s.status, s.temperature_c, s.water_level_pct, s.milk_level_pct,
           s.beans_level_pct, s.last_updated, s.field_clock
    FROM machines m
    LEFT JOIN machine_state s ON s.machine_id = m.id
"#;

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, machine), fields(machine_id = machine.id))]
    async fn register_machine(&self, machine: MachineInfo) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO machines (id, name, location)
            VALUES (?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                location = excluded.location
            "#,
        )
        .bind(machine.id as i64)
        .bind(&machine.name)
        .bind(&machine.location)
        .execute(&self.pool)
        .await?;

        debug!("registered machine {}", machine.id);
        Ok(())
    }

    async fn get_machine(&self, machine_id: MachineId) -> StorageResult<Option<MachineRecord>> {
        let sql = format!("{MACHINE_SELECT} WHERE m.id = ?");

        let row = sqlx::query(&sql)
            .bind(machine_id as i64)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list_machines(&self) -> StorageResult<Vec<MachineRecord>> {
        let sql = format!("{MACHINE_SELECT} ORDER BY m.id ASC");

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    #[instrument(skip(self, state), fields(machine_id = state.machine_id))]
    async fn save_machine_state(&self, state: &MachineTelemetryState) -> StorageResult<()> {
        if !self.machine_exists(state.machine_id).await? {
            return Err(StorageError::UnknownMachine(state.machine_id));
        }

        let clock = serde_json::to_string(&state.clock)?;

        sqlx::query(
            r#"
            INSERT INTO machine_state (
                machine_id, status, temperature_c, water_level_pct,
                milk_level_pct, beans_level_pct, last_updated, field_clock
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (machine_id) DO UPDATE SET
                status = excluded.status,
                temperature_c = excluded.temperature_c,
                water_level_pct = excluded.water_level_pct,
                milk_level_pct = excluded.milk_level_pct,
                beans_level_pct = excluded.beans_level_pct,
                last_updated = excluded.last_updated,
                field_clock = excluded.field_clock
            "#,
        )
        .bind(state.machine_id as i64)
        .bind(state.status.as_str())
        .bind(state.temperature_c)
        .bind(state.water_level_pct.map(i64::from))
        .bind(state.milk_level_pct.map(i64::from))
        .bind(state.beans_level_pct.map(i64::from))
        .bind(Self::timestamp_to_millis(&state.last_updated))
        .bind(clock)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, event), fields(machine_id = event.machine_id))]
    async fn append_usage(&self, event: &UsageEvent) -> StorageResult<()> {
        if !self.machine_exists(event.machine_id).await? {
            return Err(StorageError::UnknownMachine(event.machine_id));
        }

        sqlx::query(
            r#"
            INSERT INTO usage_events (machine_id, brew_type, volume_ml, temp_at_brew_c, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.machine_id as i64)
        .bind(event.brew_type.as_str())
        .bind(event.volume_ml.map(i64::from))
        .bind(event.temp_at_brew_c)
        .bind(Self::timestamp_to_millis(&event.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_usage(
        &self,
        machine_id: MachineId,
        limit: usize,
    ) -> StorageResult<Vec<UsageEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT machine_id, brew_type, volume_ml, temp_at_brew_c, timestamp
            FROM usage_events
            WHERE machine_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(machine_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::usage_from_row).collect()
    }

    #[instrument(skip(self, alert), fields(machine_id = alert.machine_id, alert_type = %alert.alert_type))]
    async fn open_alert(&self, alert: NewAlert) -> StorageResult<OpenAlertResult> {
        if !self.machine_exists(alert.machine_id).await? {
            return Err(StorageError::UnknownMachine(alert.machine_id));
        }

        let now = Self::timestamp_to_millis(&Utc::now());

        // The partial unique index turns a second open alert into a no-op
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO alerts (
                machine_id, alert_type, severity, message, threshold_value,
                resolved, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(alert.machine_id as i64)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(alert.threshold_value)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            let id = result.last_insert_rowid() as u64;
            let opened = self
                .get_alert(id)
                .await?
                .ok_or_else(|| StorageError::QueryFailed(format!("alert #{id} vanished")))?;
            debug!("opened alert #{}", id);
            return Ok(OpenAlertResult::Opened(opened));
        }

        let existing = self
            .find_open_alert(alert.machine_id, alert.alert_type)
            .await?
            .ok_or_else(|| {
                StorageError::QueryFailed(format!(
                    "{} alert for machine {} was neither inserted nor open",
                    alert.alert_type, alert.machine_id
                ))
            })?;

        Ok(OpenAlertResult::AlreadyOpen(existing))
    }

    async fn find_open_alert(
        &self,
        machine_id: MachineId,
        alert_type: AlertType,
    ) -> StorageResult<Option<Alert>> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE machine_id = ? AND alert_type = ? AND resolved = 0"
        );

        let row = sqlx::query(&sql)
            .bind(machine_id as i64)
            .bind(alert_type.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::alert_from_row).transpose()
    }

    #[instrument(skip(self), fields(alert_type = %alert_type))]
    async fn resolve_alerts(
        &self,
        machine_id: MachineId,
        alert_type: AlertType,
    ) -> StorageResult<Vec<Alert>> {
        let now = Self::timestamp_to_millis(&Utc::now());
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE machine_id = ? AND alert_type = ? AND resolved = 0"
        );
        let rows = sqlx::query(&sql)
            .bind(machine_id as i64)
            .bind(alert_type.as_str())
            .fetch_all(&mut *tx)
            .await?;

        let mut resolved = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut alert = Self::alert_from_row(row)?;

            sqlx::query("UPDATE alerts SET resolved = 1, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(alert.id as i64)
                .execute(&mut *tx)
                .await?;

            alert.resolved = true;
            alert.updated_at = Self::millis_to_timestamp(now);
            resolved.push(alert);
        }

        tx.commit().await?;

        Ok(resolved)
    }

    #[instrument(skip(self))]
    async fn resolve_alert(&self, alert_id: u64) -> StorageResult<Option<Alert>> {
        let now = Self::timestamp_to_millis(&Utc::now());

        let result =
            sqlx::query("UPDATE alerts SET resolved = 1, updated_at = ? WHERE id = ? AND resolved = 0")
                .bind(now)
                .bind(alert_id as i64)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_alert(alert_id).await
    }

    async fn get_alert(&self, alert_id: u64) -> StorageResult<Option<Alert>> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?");

        let row = sqlx::query(&sql)
            .bind(alert_id as i64)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::alert_from_row).transpose()
    }

    async fn query_alerts(&self, query: AlertQuery) -> StorageResult<Vec<Alert>> {
        let mut sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE 1 = 1");

        if query.machine_id.is_some() {
            sql.push_str(" AND machine_id = ?");
        }
        if query.alert_type.is_some() {
            sql.push_str(" AND alert_type = ?");
        }
        if query.severity.is_some() {
            sql.push_str(" AND severity = ?");
        }
        if query.resolved.is_some() {
            sql.push_str(" AND resolved = ?");
        }
        sql.push_str(" ORDER BY id DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut statement = sqlx::query(&sql);
        if let Some(machine_id) = query.machine_id {
            statement = statement.bind(machine_id as i64);
        }
        if let Some(alert_type) = query.alert_type {
            statement = statement.bind(alert_type.as_str());
        }
        if let Some(severity) = query.severity {
            statement = statement.bind(severity.as_str());
        }
        if let Some(resolved) = query.resolved {
            statement = statement.bind(resolved as i64);
        }

        let rows = statement.fetch_all(&self.pool).await?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let (machines,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM machines")
            .fetch_one(&self.pool)
            .await?;

        let (alerts, open): (i64, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), SUM(resolved = 0) FROM alerts")
                .fetch_one(&self.pool)
                .await?;

        let (brews,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM usage_events")
            .fetch_one(&self.pool)
            .await?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);
        let file_size_mb = file_size as f64 / 1_000_000.0;

        Ok(format!(
            "SQLite: {} machines, {} alerts ({} open), {} brews, {:.2} MB on disk",
            machines,
            alerts,
            open.unwrap_or(0),
            brews,
            file_size_mb
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
