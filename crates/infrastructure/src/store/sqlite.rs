use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use measurement_core::models::{MeasurementResult, Probe, Schedule, TaskMetadata};
use measurement_core::traits::{FieldUpdate, Precondition, TaskStore};
use measurement_core::{MeasurementError, Result, SequenceCounters, TaskStatus, TaskType};

/// SQLite 任务存储
///
/// 三张表：`tasks` 保存元数据，`task_sequences` 保存各区域计数，
/// `measurement_results` 以 (task_id, region, sequence) 为主键保存结果。
/// 条件更新先执行一条带条件的守卫写入，成功后在同一事务内应用其余字段。
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 按URL连接并执行迁移
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .connect_with(options)
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// 创建嵌入式SQLite任务存储，自动初始化数据库文件
    pub async fn new_embedded(database_path: &str) -> Result<Self> {
        debug!("创建嵌入式SQLite任务存储: {}", database_path);
        Self::connect(&format!("sqlite://{database_path}"), 5).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 运行数据库迁移
    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        debug!("执行SQLite数据库迁移");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                vantage_points TEXT NOT NULL DEFAULT '[]',
                probe TEXT NOT NULL,
                arguments TEXT NOT NULL DEFAULT '',
                start_time TEXT,
                stop_time TEXT,
                cron_expression TEXT NOT NULL,
                task_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled',
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_sequences (
                task_id TEXT NOT NULL,
                region TEXT NOT NULL,
                value INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (task_id, region),
                FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS measurement_results (
                task_id TEXT NOT NULL,
                region TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                measurement_start_time TEXT NOT NULL,
                measurement_stop_time TEXT NOT NULL,
                result TEXT NOT NULL,
                PRIMARY KEY (task_id, region, sequence)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
            .execute(pool)
            .await?;

        debug!("SQLite数据库迁移完成");
        Ok(())
    }

    async fn load_sequences(conn: &mut SqliteConnection, id: &str) -> Result<SequenceCounters> {
        let rows = sqlx::query("SELECT region, value FROM task_sequences WHERE task_id = ?")
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| -> Result<(String, u64)> {
                Ok((row.try_get("region")?, from_i64(row.try_get("value")?)?))
            })
            .collect()
    }

    /// 守卫写入：记录存在且前置条件成立时更新 `updated_at`，返回影响行数
    async fn guard(
        conn: &mut SqliteConnection,
        id: &str,
        precondition: Option<&Precondition>,
    ) -> Result<u64> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE tasks SET updated_at = CURRENT_TIMESTAMP WHERE id = ");
        query.push_bind(id);

        match precondition {
            None => {}
            Some(Precondition::StatusIn(statuses)) => {
                if statuses.is_empty() {
                    query.push(" AND 0");
                } else {
                    query.push(" AND status IN (");
                    let mut separated = query.separated(", ");
                    for status in statuses {
                        separated.push_bind(status.as_str());
                    }
                    separated.push_unseparated(")");
                }
            }
            Some(Precondition::SequenceBelow { region, value }) => {
                query.push(
                    " AND COALESCE((SELECT value FROM task_sequences \
                     WHERE task_id = tasks.id AND region = ",
                );
                query.push_bind(region.as_str());
                query.push("), 0) < ");
                query.push_bind(to_i64(*value)?);
            }
        }

        Ok(query.build().execute(&mut *conn).await?.rows_affected())
    }

    async fn apply(conn: &mut SqliteConnection, id: &str, updates: &[FieldUpdate]) -> Result<()> {
        for update in updates {
            match update {
                FieldUpdate::Status(status) => {
                    sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
                        .bind(status.as_str())
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                }
                FieldUpdate::StartTime(at) => {
                    sqlx::query("UPDATE tasks SET start_time = ? WHERE id = ?")
                        .bind(*at)
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                }
                FieldUpdate::StopTime(at) => {
                    sqlx::query("UPDATE tasks SET stop_time = ? WHERE id = ?")
                        .bind(*at)
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                }
                FieldUpdate::Sequence { region, value } => {
                    sqlx::query(
                        r#"
                        INSERT INTO task_sequences (task_id, region, value) VALUES (?, ?, ?)
                        ON CONFLICT(task_id, region) DO UPDATE SET value = excluded.value
                        "#,
                    )
                    .bind(id)
                    .bind(region)
                    .bind(to_i64(*value)?)
                    .execute(&mut *conn)
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn exists_in(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| MeasurementError::Internal(format!("计数溢出: {value}")))
}

fn from_i64(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| MeasurementError::Internal(format!("无效的计数: {value}")))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn map_task_row(row: &SqliteRow, number_of_sequence: SequenceCounters) -> Result<TaskMetadata> {
    let vantage_points: Vec<String> =
        serde_json::from_str(row.try_get::<&str, _>("vantage_points")?)?;
    let probe: Probe =
        serde_json::from_value(serde_json::Value::String(row.try_get("probe")?))?;
    let task_type = TaskType::from_str(row.try_get("task_type")?)?;
    let status = TaskStatus::from_str(row.try_get("status")?)?;

    Ok(TaskMetadata {
        id: row.try_get("id")?,
        vantage_points,
        probe,
        arguments: row.try_get("arguments")?,
        schedule: Schedule {
            start_time: row.try_get::<Option<DateTime<Utc>>, _>("start_time")?,
            stop_time: row.try_get::<Option<DateTime<Utc>>, _>("stop_time")?,
            cron_expression: row.try_get("cron_expression")?,
        },
        task_type,
        status,
        number_of_sequence,
    })
}

fn map_result_row(row: &SqliteRow) -> Result<MeasurementResult> {
    Ok(MeasurementResult {
        measurement_start_time: row.try_get("measurement_start_time")?,
        measurement_stop_time: row.try_get("measurement_stop_time")?,
        region: row.try_get("region")?,
        sequence: from_i64(row.try_get("sequence")?)?,
        result: row.try_get("result")?,
    })
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn get(&self, id: &str) -> Result<Option<TaskMetadata>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => {
                let sequences = Self::load_sequences(&mut conn, id).await?;
                Ok(Some(map_task_row(&row, sequences)?))
            }
            None => Ok(None),
        }
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        Self::exists_in(&mut conn, id).await
    }

    async fn create(&self, task: &TaskMetadata) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO tasks (id, vantage_points, probe, arguments, start_time, stop_time,
                               cron_expression, task_type, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(serde_json::to_string(&task.vantage_points)?)
        .bind(task.probe.as_str())
        .bind(&task.arguments)
        .bind(task.schedule.start_time)
        .bind(task.schedule.stop_time)
        .bind(&task.schedule.cron_expression)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(MeasurementError::Conflict(format!("任务 {}", task.id)));
            }
            return Err(e.into());
        }

        for (region, value) in &task.number_of_sequence {
            sqlx::query("INSERT INTO task_sequences (task_id, region, value) VALUES (?, ?, ?)")
                .bind(&task.id)
                .bind(region)
                .bind(to_i64(*value)?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!("SQLite写入任务: {}", task.id);
        Ok(())
    }

    async fn update_fields(&self, id: &str, updates: &[FieldUpdate]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if Self::guard(&mut tx, id, None).await? == 0 {
            return Err(MeasurementError::task_not_found(id));
        }
        Self::apply(&mut tx, id, updates).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_fields_if(
        &self,
        id: &str,
        precondition: &Precondition,
        updates: &[FieldUpdate],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if Self::guard(&mut tx, id, Some(precondition)).await? == 0 {
            let exists = Self::exists_in(&mut tx, id).await?;
            tx.rollback().await?;
            if !exists {
                return Err(MeasurementError::task_not_found(id));
            }
            return Ok(false);
        }
        Self::apply(&mut tx, id, updates).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_regions(&self, id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT region FROM measurement_results WHERE task_id = ? ORDER BY region",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<String> { Ok(row.try_get("region")?) })
            .collect()
    }

    async fn list_results(&self, id: &str, region: &str) -> Result<Vec<MeasurementResult>> {
        let rows = sqlx::query(
            r#"
            SELECT region, sequence, measurement_start_time, measurement_stop_time, result
            FROM measurement_results
            WHERE task_id = ? AND region = ?
            ORDER BY sequence
            "#,
        )
        .bind(id)
        .bind(region)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_result_row).collect()
    }

    async fn insert_result(&self, id: &str, result: &MeasurementResult) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO measurement_results
                (task_id, region, sequence, measurement_start_time, measurement_stop_time, result)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&result.region)
        .bind(to_i64(result.sequence)?)
        .bind(result.measurement_start_time)
        .bind(result.measurement_stop_time)
        .bind(&result.result)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(MeasurementError::Conflict(format!(
                "测量结果 {}/{}/{}",
                id, result.region, result.sequence
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
