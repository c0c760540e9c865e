//! SQLite ledger of runs and per-generation population counts.

use reef_core::{Error, PopulationCounts, Result, RunId, SimulationConfig};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::info;

/// One row of the `runs` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: RunId,
    pub config: SimulationConfig,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub final_counts: Option<PopulationCounts>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(path: &str) -> Result<Self> {
        let pool = if path == ":memory:" {
            // every connection to :memory: is a separate database
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
        } else {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
            SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path)).await
        }
        .map_err(|e| Error::Database(format!("Failed to connect to database: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                config_json TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER,
                final_fish INTEGER,
                final_sharks INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Migration failed: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generations (
                run_id TEXT NOT NULL REFERENCES runs(run_id),
                generation INTEGER NOT NULL,
                fish INTEGER NOT NULL,
                sharks INTEGER NOT NULL,
                snapshot_path TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (run_id, generation)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Migration failed: {}", e)))?;

        info!("Database migrations complete");
        Ok(())
    }

    pub async fn start_run(&self, run_id: RunId, config: &SimulationConfig) -> Result<()> {
        let config_json = serde_json::to_string(config)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO runs (run_id, config_json, started_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(run_id.0.to_string())
        .bind(config_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to start run: {}", e)))?;

        Ok(())
    }

    pub async fn record_generation(
        &self,
        run_id: RunId,
        generation: u64,
        counts: PopulationCounts,
        snapshot_path: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO generations (run_id, generation, fish, sharks, snapshot_path, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(run_id, generation) DO UPDATE SET
                fish = ?3,
                sharks = ?4,
                snapshot_path = ?5,
                recorded_at = ?6
            "#,
        )
        .bind(run_id.0.to_string())
        .bind(generation as i64)
        .bind(counts.fish as i64)
        .bind(counts.sharks as i64)
        .bind(snapshot_path)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to record generation: {}", e)))?;

        Ok(())
    }

    pub async fn finish_run(&self, run_id: RunId, counts: PopulationCounts) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE runs SET finished_at = ?2, final_fish = ?3, final_sharks = ?4
            WHERE run_id = ?1
            "#,
        )
        .bind(run_id.0.to_string())
        .bind(now)
        .bind(counts.fish as i64)
        .bind(counts.sharks as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to finish run: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(format!("Unknown run {}", run_id)));
        }
        Ok(())
    }

    /// Recorded counts of a run, ordered by generation
    pub async fn generation_counts(&self, run_id: RunId) -> Result<Vec<(u64, PopulationCounts)>> {
        let rows = sqlx::query(
            "SELECT generation, fish, sharks FROM generations WHERE run_id = ?1 ORDER BY generation",
        )
        .bind(run_id.0.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get generations: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let generation: i64 = row.get("generation");
                let fish: i64 = row.get("fish");
                let sharks: i64 = row.get("sharks");
                (
                    generation as u64,
                    PopulationCounts {
                        fish: fish as usize,
                        sharks: sharks as usize,
                    },
                )
            })
            .collect())
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        let row = sqlx::query(
            r#"
            SELECT config_json, started_at, finished_at, final_fish, final_sharks
            FROM runs WHERE run_id = ?1
            "#,
        )
        .bind(run_id.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get run: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let config_json: String = row.get("config_json");
        let final_fish: Option<i64> = row.get("final_fish");
        let final_sharks: Option<i64> = row.get("final_sharks");
        let final_counts = final_fish.zip(final_sharks).map(|(fish, sharks)| PopulationCounts {
            fish: fish as usize,
            sharks: sharks as usize,
        });

        Ok(Some(RunRecord {
            run_id,
            config: serde_json::from_str(&config_json)?,
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            final_counts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_db() -> Database {
        let db = Database::new(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let db = create_test_db().await;
        let run_id = RunId::new();
        let config = SimulationConfig::default();

        db.start_run(run_id, &config).await.unwrap();
        let started = db.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(started.config, config);
        assert!(started.finished_at.is_none());
        assert!(started.final_counts.is_none());

        let last = PopulationCounts { fish: 800, sharks: 150 };
        db.finish_run(run_id, last).await.unwrap();
        let finished = db.get_run(run_id).await.unwrap().unwrap();
        assert!(finished.finished_at.is_some());
        assert_eq!(finished.final_counts, Some(last));
    }

    #[tokio::test]
    async fn test_generation_counts_are_ordered() {
        let db = create_test_db().await;
        let run_id = RunId::new();
        db.start_run(run_id, &SimulationConfig::default()).await.unwrap();

        for generation in [2u64, 0, 1] {
            let counts = PopulationCounts {
                fish: 100 - generation as usize,
                sharks: 10 + generation as usize,
            };
            db.record_generation(run_id, generation, counts, "world.bin")
                .await
                .unwrap();
        }

        let recorded = db.generation_counts(run_id).await.unwrap();
        let generations: Vec<u64> = recorded.iter().map(|(g, _)| *g).collect();
        assert_eq!(generations, vec![0, 1, 2]);
        assert_eq!(recorded[2].1, PopulationCounts { fish: 98, sharks: 12 });
    }

    #[tokio::test]
    async fn test_rerecording_a_generation_overwrites() {
        let db = create_test_db().await;
        let run_id = RunId::new();
        db.start_run(run_id, &SimulationConfig::default()).await.unwrap();

        db.record_generation(run_id, 0, PopulationCounts { fish: 1, sharks: 1 }, "a.bin")
            .await
            .unwrap();
        db.record_generation(run_id, 0, PopulationCounts { fish: 2, sharks: 3 }, "b.bin")
            .await
            .unwrap();

        let recorded = db.generation_counts(run_id).await.unwrap();
        assert_eq!(recorded, vec![(0, PopulationCounts { fish: 2, sharks: 3 })]);
    }

    #[tokio::test]
    async fn test_finishing_unknown_run_fails() {
        let db = create_test_db().await;
        let result = db.finish_run(RunId::new(), PopulationCounts::default()).await;
        assert!(matches!(result, Err(Error::Database(_))));
    }
}
