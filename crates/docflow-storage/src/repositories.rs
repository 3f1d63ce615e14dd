//! `Database` is the single entry point onto Postgres: a thin wrapper around
//! `PgPool` with one method per query, grouped by the entity they touch.
//! Mirrors this codebase's existing `Database::from_url` / per-entity method
//! convention; every method binds parameters positionally rather than using
//! the `query!` compile-time macro, since this workspace has historically
//! avoided depending on `DATABASE_URL` being reachable at compile time.

use chrono::Utc;
use docflow_core::{Error, LifecycleEvent, Result, RunStatus, WorkflowStepType};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn from_url(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| Error::external(format!("failed to connect to database: {e}")))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::external(format!("migration failed: {e}")))
    }
}

fn map_sqlx(context: &str) -> impl Fn(sqlx::Error) -> Error + '_ {
    move |e| match e {
        sqlx::Error::RowNotFound => Error::not_found(context.to_string()),
        other => Error::external(format!("{context}: {other}")),
    }
}

// ---------------------------------------------------------------------
// Documents / URIs / history / batches
// ---------------------------------------------------------------------

impl Database {
    pub async fn get_document(&self, hash: &str) -> Result<Option<DocumentRow>> {
        sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx("get_document"))
    }

    pub async fn create_document(&self, input: &CreateDocument) -> Result<DocumentRow> {
        sqlx::query_as::<_, DocumentRow>(
            "INSERT INTO documents (hash, mime_type, file_size, doc_meta)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (hash) DO UPDATE SET hash = EXCLUDED.hash
             RETURNING *",
        )
        .bind(&input.hash)
        .bind(&input.mime_type)
        .bind(input.file_size)
        .bind(&input.doc_meta)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("create_document"))
    }

    pub async fn update_document_meta(&self, hash: &str, doc_meta: &Value) -> Result<()> {
        sqlx::query("UPDATE documents SET doc_meta = $2 WHERE hash = $1")
            .bind(hash)
            .bind(doc_meta)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx("update_document_meta"))?;
        Ok(())
    }

    pub async fn delete_document(&self, hash: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE hash = $1")
            .bind(hash)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx("delete_document"))?;
        Ok(result.rows_affected())
    }

    pub async fn count_uris_for_hash(&self, hash: &str) -> Result<i64> {
        let row = sqlx::query("SELECT count(*) AS ct FROM document_uris WHERE doc_hash = $1")
            .bind(hash)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx("count_uris_for_hash"))?;
        Ok(row.try_get::<i64, _>("ct").unwrap_or(0))
    }

    pub async fn find_document_uri(&self, uri: &str, source: &str) -> Result<Option<DocumentUriRow>> {
        sqlx::query_as::<_, DocumentUriRow>(
            "SELECT * FROM document_uris WHERE uri = $1 AND source = $2",
        )
        .bind(uri)
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx("find_document_uri"))
    }

    pub async fn create_document_uri(
        &self,
        uri: &str,
        source: &str,
        doc_hash: &str,
        batch_id: Option<i64>,
    ) -> Result<DocumentUriRow> {
        sqlx::query_as::<_, DocumentUriRow>(
            "INSERT INTO document_uris (id, uri, source, doc_hash, version, batch_id)
             VALUES ($1, $2, $3, $4, 1, $5)
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(uri)
        .bind(source)
        .bind(doc_hash)
        .bind(batch_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("create_document_uri"))
    }

    pub async fn bump_document_uri_hash(&self, id: Uuid, new_hash: &str) -> Result<DocumentUriRow> {
        sqlx::query_as::<_, DocumentUriRow>(
            "UPDATE document_uris SET doc_hash = $2, version = version + 1
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(new_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("bump_document_uri_hash"))
    }

    pub async fn delete_document_uri(&self, id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_uris WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx("delete_document_uri"))?;
        Ok(result.rows_affected())
    }

    pub async fn add_history(
        &self,
        document_uri_id: Uuid,
        action: &str,
        hash_at_action: &str,
        batch_id: Option<i64>,
        meta: &Value,
    ) -> Result<DocumentUriHistoryRow> {
        sqlx::query_as::<_, DocumentUriHistoryRow>(
            "INSERT INTO document_uri_history
                (id, document_uri_id, action, hash_at_action, batch_id, created_date, meta)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(document_uri_id)
        .bind(action)
        .bind(hash_at_action)
        .bind(batch_id)
        .bind(Utc::now())
        .bind(meta)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("add_history"))
    }

    pub async fn get_document_uri_history(&self, document_uri_id: Uuid) -> Result<Vec<DocumentUriHistoryRow>> {
        sqlx::query_as::<_, DocumentUriHistoryRow>(
            "SELECT * FROM document_uri_history WHERE document_uri_id = $1 ORDER BY created_date",
        )
        .bind(document_uri_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx("get_document_uri_history"))
    }

    pub async fn delete_document_uri_history(&self, document_uri_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_uri_history WHERE document_uri_id = $1")
            .bind(document_uri_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx("delete_document_uri_history"))?;
        Ok(result.rows_affected())
    }

    pub async fn new_batch(&self, source: &str, name: &str) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO document_batches (name, source, start_date) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(name)
        .bind(source)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("new_batch"))?;
        Ok(row.try_get("id").unwrap_or_default())
    }

    pub async fn list_batches(&self) -> Result<Vec<BatchRow>> {
        sqlx::query_as::<_, BatchRow>("SELECT * FROM document_batches ORDER BY start_date DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx("list_batches"))
    }

    pub async fn get_batch(&self, id: i64) -> Result<Option<BatchRow>> {
        sqlx::query_as::<_, BatchRow>("SELECT * FROM document_batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx("get_batch"))
    }

    pub async fn is_batch_completed(&self, id: i64) -> Result<bool> {
        let batch = self
            .get_batch(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("batch {id}")))?;
        Ok(batch.completed_date.is_some())
    }

    pub async fn get_documents_in_batch(&self, batch_id: i64) -> Result<Vec<DocumentUriRow>> {
        sqlx::query_as::<_, DocumentUriRow>("SELECT * FROM document_uris WHERE batch_id = $1")
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx("get_documents_in_batch"))
    }

    pub async fn get_uris_for_source(&self, source: &str) -> Result<Vec<DocumentUriRow>> {
        sqlx::query_as::<_, DocumentUriRow>("SELECT * FROM document_uris WHERE source = $1")
            .bind(source)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx("get_uris_for_source"))
    }

    pub async fn delete_orphaned_documents(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM documents d
             WHERE NOT EXISTS (SELECT 1 FROM document_uris u WHERE u.doc_hash = d.hash)",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx("delete_orphaned_documents"))?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------
// Artifact blobs (relational storage backend) and DocumentDb cross-check rows
// ---------------------------------------------------------------------

impl Database {
    pub async fn blob_read(&self, artifact_type: &str, storage_root: &str, hash: &str) -> Result<Vec<u8>> {
        let row = sqlx::query_as::<_, DocumentBytesRow>(
            "SELECT * FROM document_bytes WHERE hash = $1 AND artifact_type = $2 AND storage_root = $3",
        )
        .bind(hash)
        .bind(artifact_type)
        .bind(storage_root)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx("blob_read"))?;
        row.map(|r| r.file_bytes)
            .ok_or_else(|| Error::not_found(format!("artifact {artifact_type}/{storage_root}/{hash}")))
    }

    pub async fn blob_exists(&self, artifact_type: &str, storage_root: &str, hash: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT count(*) AS ct FROM document_bytes WHERE hash = $1 AND artifact_type = $2 AND storage_root = $3",
        )
        .bind(hash)
        .bind(artifact_type)
        .bind(storage_root)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("blob_exists"))?;
        Ok(row.try_get::<i64, _>("ct").unwrap_or(0) > 0)
    }

    pub async fn blob_write(&self, artifact_type: &str, storage_root: &str, hash: &str, data: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO document_bytes (hash, artifact_type, storage_root, file_size, file_bytes)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (hash, artifact_type, storage_root)
             DO UPDATE SET file_size = EXCLUDED.file_size, file_bytes = EXCLUDED.file_bytes",
        )
        .bind(hash)
        .bind(artifact_type)
        .bind(storage_root)
        .bind(data.len() as i64)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx("blob_write"))?;
        Ok(())
    }

    pub async fn blob_delete(&self, artifact_type: &str, storage_root: &str, hash: &str) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM document_bytes WHERE hash = $1 AND artifact_type = $2 AND storage_root = $3",
        )
        .bind(hash)
        .bind(artifact_type)
        .bind(storage_root)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx("blob_delete"))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("artifact {artifact_type}/{storage_root}/{hash}")));
        }
        Ok(())
    }

    pub async fn blob_list(&self, artifact_type: &str, storage_root: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT hash FROM document_bytes WHERE artifact_type = $1 AND storage_root = $2")
            .bind(artifact_type)
            .bind(storage_root)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx("blob_list"))?;
        Ok(rows.into_iter().filter_map(|r| r.try_get("hash").ok()).collect())
    }

    pub async fn create_document_db_row(
        &self,
        doc_hash: &str,
        source: &str,
        db_name: &str,
        lancedb_dir: &str,
        rag_id: &str,
        chunk_count: i64,
    ) -> Result<DocumentDbRow> {
        sqlx::query_as::<_, DocumentDbRow>(
            "INSERT INTO document_db (id, doc_hash, source, db_name, lancedb_dir, rag_id, chunk_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(doc_hash)
        .bind(source)
        .bind(db_name)
        .bind(lancedb_dir)
        .bind(rag_id)
        .bind(chunk_count)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("create_document_db_row"))
    }

    pub async fn delete_document_db_rows(&self, doc_hash: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_db WHERE doc_hash = $1")
            .bind(doc_hash)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx("delete_document_db_rows"))?;
        Ok(result.rows_affected())
    }

    pub async fn get_document_db_rows(&self, doc_hash: &str) -> Result<Vec<DocumentDbRow>> {
        sqlx::query_as::<_, DocumentDbRow>("SELECT * FROM document_db WHERE doc_hash = $1")
            .bind(doc_hash)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx("get_document_db_rows"))
    }

    /// `DocumentDb` rows for one RAG database, backing `GET /lancedb/info`
    /// and `GET /lancedb/documents`. `filter` does a substring match against
    /// `source` (this stack's standing equivalent for the original's raw SQL
    /// `WHERE` filter, which had no analogue without a real LanceDB table).
    pub async fn get_document_db_rows_for_db(
        &self,
        db_name: &str,
        filter: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<DocumentDbRow>> {
        sqlx::query_as::<_, DocumentDbRow>(
            "SELECT * FROM document_db
             WHERE db_name = $1 AND ($2::text IS NULL OR source ILIKE '%' || $2 || '%')
             ORDER BY source
             LIMIT $3 OFFSET $4",
        )
        .bind(db_name)
        .bind(filter)
        .bind(limit.unwrap_or(i64::MAX))
        .bind(offset.unwrap_or(0))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx("get_document_db_rows_for_db"))
    }

    /// Count and total chunk count for one RAG database, backing the
    /// `documents`/`chunks` summary in `GET /lancedb/info`.
    pub async fn count_document_db_rows_for_db(&self, db_name: &str) -> Result<(i64, i64)> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS documents, COALESCE(SUM(chunk_count), 0) AS chunks
             FROM document_db WHERE db_name = $1",
        )
        .bind(db_name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("count_document_db_rows_for_db"))?;
        Ok((row.try_get("documents").unwrap_or(0), row.try_get("chunks").unwrap_or(0)))
    }
}

// ---------------------------------------------------------------------
// Config dedup: StepConfig / ConfigSet / ConfigSetItem
// ---------------------------------------------------------------------

impl Database {
    pub async fn find_config_set_by_text(&self, yaml_id: &str, yaml_contents: &str) -> Result<Option<ConfigSetRow>> {
        sqlx::query_as::<_, ConfigSetRow>(
            "SELECT * FROM config_sets WHERE yaml_id = $1 AND yaml_contents = $2",
        )
        .bind(yaml_id)
        .bind(yaml_contents)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx("find_config_set_by_text"))
    }

    pub async fn config_set_items(&self, config_set_id: Uuid) -> Result<Vec<StepConfigRow>> {
        sqlx::query_as::<_, StepConfigRow>(
            "SELECT sc.* FROM step_configs sc
             JOIN config_set_items csi ON csi.config_id = sc.id
             WHERE csi.config_set_id = $1",
        )
        .bind(config_set_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx("config_set_items"))
    }

    /// Runs the full §4.2 dedup algorithm inside one transaction: create the
    /// `ConfigSet`, then for each step type in workflow order, find-or-insert
    /// the `StepConfig` row whose `(step_type, cuml_config_json)` matches and
    /// link it via `ConfigSetItem`.
    pub async fn create_config_set(
        &self,
        yaml_id: &str,
        yaml_contents: &str,
        ordered_steps: &[(WorkflowStepType, Value, Value)],
    ) -> Result<Uuid> {
        let mut tx: Transaction<'_, Postgres> = self
            .pool
            .begin()
            .await
            .map_err(map_sqlx("create_config_set/begin"))?;

        let config_set_id = Uuid::now_v7();
        sqlx::query("INSERT INTO config_sets (id, yaml_id, yaml_contents) VALUES ($1, $2, $3)")
            .bind(config_set_id)
            .bind(yaml_id)
            .bind(yaml_contents)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx("create_config_set/insert_set"))?;

        for (step_type, config_json, cuml_config_json) in ordered_steps {
            let existing = sqlx::query_as::<_, StepConfigRow>(
                "SELECT * FROM step_configs WHERE step_type = $1 AND cuml_config_json = $2",
            )
            .bind(step_type)
            .bind(cuml_config_json)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx("create_config_set/find_step_config"))?;

            let step_config_id = match existing {
                Some(row) => row.id,
                None => {
                    let id = Uuid::now_v7();
                    sqlx::query(
                        "INSERT INTO step_configs (id, step_type, config_json, cuml_config_json)
                         VALUES ($1, $2, $3, $4)",
                    )
                    .bind(id)
                    .bind(step_type)
                    .bind(config_json)
                    .bind(cuml_config_json)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx("create_config_set/insert_step_config"))?;
                    id
                }
            };

            sqlx::query("INSERT INTO config_set_items (config_set_id, config_id) VALUES ($1, $2)")
                .bind(config_set_id)
                .bind(step_config_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx("create_config_set/insert_item"))?;
        }

        tx.commit().await.map_err(map_sqlx("create_config_set/commit"))?;
        Ok(config_set_id)
    }

    pub async fn get_step_config(&self, id: Uuid) -> Result<StepConfigRow> {
        sqlx::query_as::<_, StepConfigRow>("SELECT * FROM step_configs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx("get_step_config"))?
            .ok_or_else(|| Error::not_found(format!("step_config {id}")))
    }
}

// ---------------------------------------------------------------------
// Run builder: RunGroup / WorkflowRun / RunStep
// ---------------------------------------------------------------------

impl Database {
    pub async fn create_run_group(
        &self,
        workflow_definition_id: &str,
        param_definition_id: &str,
        batch_id: i64,
        name: Option<&str>,
    ) -> Result<RunGroupRow> {
        sqlx::query_as::<_, RunGroupRow>(
            "INSERT INTO run_groups
                (id, workflow_definition_id, param_definition_id, batch_id, name, created_date, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(workflow_definition_id)
        .bind(param_definition_id)
        .bind(batch_id)
        .bind(name)
        .bind(Utc::now())
        .bind(RunStatus::Pending)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("create_run_group"))
    }

    pub async fn get_run_group(&self, id: Uuid) -> Result<RunGroupRow> {
        sqlx::query_as::<_, RunGroupRow>("SELECT * FROM run_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx("get_run_group"))?
            .ok_or_else(|| Error::not_found(format!("run_group {id}")))
    }

    pub async fn list_run_groups(&self) -> Result<Vec<RunGroupRow>> {
        sqlx::query_as::<_, RunGroupRow>("SELECT * FROM run_groups ORDER BY created_date DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx("list_run_groups"))
    }

    pub async fn delete_run_group_cascade(&self, id: Uuid) -> Result<(u64, u64, u64, u64)> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx("delete_run_group/begin"))?;

        let lifecycle = sqlx::query("DELETE FROM lifecycle_history WHERE run_group_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx("delete_run_group/lifecycle"))?
            .rows_affected();

        let steps = sqlx::query(
            "DELETE FROM run_steps WHERE workflow_run_id IN
                (SELECT id FROM workflow_runs WHERE run_group_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx("delete_run_group/steps"))?
        .rows_affected();

        let runs = sqlx::query("DELETE FROM workflow_runs WHERE run_group_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx("delete_run_group/runs"))?
            .rows_affected();

        let groups = sqlx::query("DELETE FROM run_groups WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx("delete_run_group/group"))?
            .rows_affected();

        tx.commit().await.map_err(map_sqlx("delete_run_group/commit"))?;
        Ok((groups, runs, steps, lifecycle))
    }

    pub async fn create_workflow_run(
        &self,
        run_group_id: Uuid,
        workflow_definition_id: &str,
        batch_id: i64,
        doc_id: &str,
        priority: i32,
        run_params: &Value,
        steps: &[(i32, String, Uuid, WorkflowStepType, bool, i32)],
    ) -> Result<WorkflowRunRow> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx("create_workflow_run/begin"))?;

        let run = sqlx::query_as::<_, WorkflowRunRow>(
            "INSERT INTO workflow_runs
                (id, run_group_id, workflow_definition_id, batch_id, doc_id, priority,
                 created_date, status, run_params)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(run_group_id)
        .bind(workflow_definition_id)
        .bind(batch_id)
        .bind(doc_id)
        .bind(priority)
        .bind(Utc::now())
        .bind(RunStatus::Pending)
        .bind(run_params)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx("create_workflow_run/insert_run"))?;

        for (step_number, step_name, step_config_id, step_type, is_last_step, retries) in steps {
            sqlx::query(
                "INSERT INTO run_steps
                    (id, workflow_run_id, workflow_step_number, workflow_step_name,
                     step_config_id, step_type, is_last_step, retry, retries, status,
                     created_date, meta)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $10, $11)",
            )
            .bind(Uuid::now_v7())
            .bind(run.id)
            .bind(step_number)
            .bind(step_name)
            .bind(step_config_id)
            .bind(step_type)
            .bind(is_last_step)
            .bind(retries)
            .bind(RunStatus::Pending)
            .bind(Utc::now())
            .bind(Value::Object(Default::default()))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx("create_workflow_run/insert_step"))?;
        }

        tx.commit().await.map_err(map_sqlx("create_workflow_run/commit"))?;
        Ok(run)
    }

    pub async fn get_workflow_run(&self, id: Uuid) -> Result<WorkflowRunRow> {
        sqlx::query_as::<_, WorkflowRunRow>("SELECT * FROM workflow_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx("get_workflow_run"))?
            .ok_or_else(|| Error::not_found(format!("workflow_run {id}")))
    }

    pub async fn list_workflow_runs(&self, batch_id: Option<i64>) -> Result<Vec<WorkflowRunRow>> {
        match batch_id {
            Some(b) => sqlx::query_as::<_, WorkflowRunRow>(
                "SELECT * FROM workflow_runs WHERE batch_id = $1 ORDER BY created_date",
            )
            .bind(b)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx("list_workflow_runs")),
            None => sqlx::query_as::<_, WorkflowRunRow>("SELECT * FROM workflow_runs ORDER BY created_date")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx("list_workflow_runs")),
        }
    }

    pub async fn list_workflow_runs_by_status(&self, status: RunStatus) -> Result<Vec<WorkflowRunRow>> {
        sqlx::query_as::<_, WorkflowRunRow>("SELECT * FROM workflow_runs WHERE status = $1 ORDER BY created_date")
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx("list_workflow_runs_by_status"))
    }

    pub async fn list_run_steps_for_run(&self, workflow_run_id: Uuid) -> Result<Vec<RunStepRow>> {
        sqlx::query_as::<_, RunStepRow>(
            "SELECT * FROM run_steps WHERE workflow_run_id = $1 ORDER BY workflow_step_number",
        )
        .bind(workflow_run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx("list_run_steps_for_run"))
    }

    pub async fn list_run_steps_for_batch(&self, batch_id: i64) -> Result<Vec<RunStepRow>> {
        sqlx::query_as::<_, RunStepRow>(
            "SELECT rs.* FROM run_steps rs
             JOIN workflow_runs wr ON wr.id = rs.workflow_run_id
             WHERE wr.batch_id = $1
             ORDER BY rs.workflow_step_number",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx("list_run_steps_for_batch"))
    }

    /// Distinct step types with at least one non-terminal `RunStep`, for
    /// `Engine::validate_storage`'s reachability check (SPEC_FULL.md §4.9).
    /// Distinct `(step_config_id, step_type)` pairs still referenced by a
    /// non-terminal `RunStep`, so a storage consistency check can resolve
    /// the exact artifact namespace each one writes (SPEC_FULL.md §4.1: the
    /// artifact root is the step-config id, not just its step type).
    pub async fn list_step_configs_in_flight(&self) -> Result<Vec<(Uuid, WorkflowStepType)>> {
        sqlx::query(
            "SELECT DISTINCT step_config_id, step_type FROM run_steps WHERE status IN ('PENDING', 'RUNNING', 'ERROR')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx("list_step_configs_in_flight"))?
        .into_iter()
        .map(|r| {
            let id: Uuid = r.try_get("step_config_id").map_err(map_sqlx("list_step_configs_in_flight/decode"))?;
            let step_type: WorkflowStepType = r.try_get("step_type").map_err(map_sqlx("list_step_configs_in_flight/decode"))?;
            Ok((id, step_type))
        })
        .collect()
    }

    pub async fn list_workflow_runs_for_doc(&self, doc_hash: &str) -> Result<Vec<WorkflowRunRow>> {
        sqlx::query_as::<_, WorkflowRunRow>("SELECT * FROM workflow_runs WHERE doc_id = $1 ORDER BY created_date")
            .bind(doc_hash)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx("list_workflow_runs_for_doc"))
    }

    /// Cascading delete for every `WorkflowRun` against one document hash,
    /// backing `delete_document_uri_by_uri`'s zero-other-references branch
    /// (SPEC_FULL.md §4.9). Returns the per-category delete counts plus the
    /// distinct `(step_config_id, step_type)` pairs the deleted steps ran, so
    /// the caller can attempt artifact cleanup in the exact namespace each
    /// step-config wrote to (the artifact root is the step-config id, not
    /// just its step type).
    pub async fn delete_workflow_runs_for_doc(
        &self,
        doc_hash: &str,
    ) -> Result<(u64, u64, u64, Vec<(Uuid, WorkflowStepType)>)> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx("delete_workflow_runs_for_doc/begin"))?;

        let step_configs: Vec<(Uuid, WorkflowStepType)> = sqlx::query(
            "SELECT DISTINCT rs.step_config_id AS step_config_id, rs.step_type AS step_type FROM run_steps rs
             JOIN workflow_runs wr ON wr.id = rs.workflow_run_id
             WHERE wr.doc_id = $1",
        )
        .bind(doc_hash)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx("delete_workflow_runs_for_doc/step_configs"))?
        .into_iter()
        .filter_map(|r| {
            let id: Uuid = r.try_get("step_config_id").ok()?;
            let step_type: WorkflowStepType = r.try_get("step_type").ok()?;
            Some((id, step_type))
        })
        .collect();

        let lifecycle = sqlx::query(
            "DELETE FROM lifecycle_history WHERE workflow_run_id IN
                (SELECT id FROM workflow_runs WHERE doc_id = $1)",
        )
        .bind(doc_hash)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx("delete_workflow_runs_for_doc/lifecycle"))?
        .rows_affected();

        let steps = sqlx::query(
            "DELETE FROM run_steps WHERE workflow_run_id IN
                (SELECT id FROM workflow_runs WHERE doc_id = $1)",
        )
        .bind(doc_hash)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx("delete_workflow_runs_for_doc/steps"))?
        .rows_affected();

        let runs = sqlx::query("DELETE FROM workflow_runs WHERE doc_id = $1")
            .bind(doc_hash)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx("delete_workflow_runs_for_doc/runs"))?
            .rows_affected();

        tx.commit().await.map_err(map_sqlx("delete_workflow_runs_for_doc/commit"))?;
        Ok((runs, steps, lifecycle, step_configs))
    }
}

// ---------------------------------------------------------------------
// Scheduler + step state machine
// ---------------------------------------------------------------------

impl Database {
    /// The §4.4 scheduler query: minimum incomplete step per run, excluding
    /// runs that already have a RUNNING step, ordered by priority desc,
    /// retry asc, created_date asc, step number asc.
    pub async fn get_runnable_steps(&self, top: i64, batch_id: Option<i64>) -> Result<Vec<RunStepRow>> {
        let sql = "
            SELECT rs.* FROM run_steps rs
            JOIN workflow_runs wr ON wr.id = rs.workflow_run_id
            WHERE rs.retry < rs.retries
              AND rs.status NOT IN ('RUNNING', 'COMPLETED', 'FAILED')
              AND wr.status NOT IN ('COMPLETED', 'FAILED')
              AND rs.workflow_step_number = (
                    SELECT MIN(rs2.workflow_step_number) FROM run_steps rs2
                    WHERE rs2.workflow_run_id = rs.workflow_run_id
                      AND rs2.status NOT IN ('COMPLETED', 'FAILED', 'RUNNING')
              )
              AND NOT EXISTS (
                    SELECT 1 FROM run_steps rs3
                    WHERE rs3.workflow_run_id = rs.workflow_run_id
                      AND rs3.status = 'RUNNING'
              )
              AND ($1::bigint IS NULL OR wr.batch_id = $1)
            ORDER BY wr.priority DESC, rs.retry ASC, rs.created_date ASC, rs.workflow_step_number ASC
            LIMIT $2
        ";
        sqlx::query_as::<_, RunStepRow>(sql)
            .bind(batch_id)
            .bind(top)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx("get_runnable_steps"))
    }

    /// Implements the §4.6 state machine inside one transaction: row-level
    /// lock, legal-transition check, exclusivity check, retry accounting,
    /// and the run-status rollup — all atomic under the lock.
    pub async fn set_step_status(
        &self,
        step_id: Uuid,
        new_status: RunStatus,
        worker_id: Option<Uuid>,
        increase_retry: bool,
        error_meta: Option<&Value>,
    ) -> Result<RunStepRow> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx("set_step_status/begin"))?;

        let step = sqlx::query_as::<_, RunStepRow>("SELECT * FROM run_steps WHERE id = $1 FOR UPDATE")
            .bind(step_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx("set_step_status/lock"))?
            .ok_or_else(|| Error::not_found(format!("run_step {step_id}")))?;

        let legal = matches!(
            (step.status, new_status),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Error)
                | (RunStatus::Error, RunStatus::Running)
        );
        if !legal {
            return Err(Error::invalid_state(format!(
                "illegal transition {:?} -> {:?} for step {step_id}",
                step.status, new_status
            )));
        }

        if step.status == RunStatus::Running {
            if let (Some(current), Some(caller)) = (step.worker_id, worker_id) {
                if current != caller {
                    return Err(Error::invalid_state(format!(
                        "step {step_id} is owned by worker {current}, not {caller}"
                    )));
                }
            }
        }

        let mut retry = step.retry;
        if increase_retry {
            retry += 1;
        }

        let mut final_status = new_status;
        if new_status == RunStatus::Error && retry >= step.retries {
            final_status = RunStatus::Failed;
        }

        let completed_date = matches!(final_status, RunStatus::Completed | RunStatus::Failed)
            .then(Utc::now);
        let start_date = (new_status == RunStatus::Running && step.start_date.is_none())
            .then(Utc::now)
            .or(step.start_date);

        let updated = sqlx::query_as::<_, RunStepRow>(
            "UPDATE run_steps
             SET status = $2, retry = $3, worker_id = $4, start_date = $5, completed_date = $6,
                 meta = CASE WHEN $7::jsonb IS NOT NULL THEN $7 ELSE meta END
             WHERE id = $1
             RETURNING *",
        )
        .bind(step_id)
        .bind(final_status)
        .bind(retry)
        .bind(if final_status == RunStatus::Running { worker_id } else { None })
        .bind(start_date)
        .bind(completed_date)
        .bind(error_meta)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx("set_step_status/update"))?;

        self.rollup_run_status(&mut tx, updated.workflow_run_id, &updated).await?;

        tx.commit().await.map_err(map_sqlx("set_step_status/commit"))?;
        Ok(updated)
    }

    /// §4.6 aggregate rollup, run inside the same transaction as the step
    /// status change.
    async fn rollup_run_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        run_id: Uuid,
        step: &RunStepRow,
    ) -> Result<()> {
        let (new_run_status, completed_date): (RunStatus, bool) =
            if step.status == RunStatus::Completed && step.is_last_step {
                (RunStatus::Completed, true)
            } else if step.status == RunStatus::Failed {
                (RunStatus::Failed, true)
            } else if matches!(step.status, RunStatus::Completed | RunStatus::Running | RunStatus::Error) {
                (RunStatus::Running, false)
            } else {
                return Ok(());
            };

        if completed_date {
            sqlx::query("UPDATE workflow_runs SET status = $2, completed_date = $3 WHERE id = $1")
                .bind(run_id)
                .bind(new_run_status)
                .bind(Utc::now())
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx("rollup_run_status"))?;
        } else {
            sqlx::query("UPDATE workflow_runs SET status = $2 WHERE id = $1")
                .bind(run_id)
                .bind(new_run_status)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx("rollup_run_status"))?;
        }
        Ok(())
    }

    pub async fn reset_failed_steps(&self, run_group_id: Uuid) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx("reset_failed_steps/begin"))?;

        let result = sqlx::query(
            "UPDATE run_steps SET status = 'PENDING', retry = 0, worker_id = NULL
             WHERE status = 'FAILED' AND workflow_run_id IN
                (SELECT id FROM workflow_runs WHERE run_group_id = $1)",
        )
        .bind(run_group_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx("reset_failed_steps/steps"))?;

        sqlx::query(
            "UPDATE workflow_runs SET status = 'RUNNING', completed_date = NULL
             WHERE status = 'FAILED' AND run_group_id = $1",
        )
        .bind(run_group_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx("reset_failed_steps/runs"))?;

        tx.commit().await.map_err(map_sqlx("reset_failed_steps/commit"))?;
        Ok(result.rows_affected())
    }

    /// Aggregate counters for a run group's runs, used by the lifecycle
    /// dispatcher (§4.8) and the `run_groups/{id}/stats` endpoint.
    pub async fn get_run_group_counts(&self, run_group_id: Uuid) -> Result<RunGroupCounts> {
        let row = sqlx::query(
            "SELECT
                count(*) FILTER (WHERE status = 'PENDING') AS pending,
                count(*) FILTER (WHERE status = 'RUNNING') AS running,
                count(*) FILTER (WHERE status = 'COMPLETED') AS completed,
                count(*) FILTER (WHERE status = 'ERROR') AS error,
                count(*) FILTER (WHERE status = 'FAILED') AS failed
             FROM workflow_runs WHERE run_group_id = $1",
        )
        .bind(run_group_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("get_run_group_counts"))?;

        Ok(RunGroupCounts {
            pending: row.try_get::<i64, _>("pending").unwrap_or(0),
            running: row.try_get::<i64, _>("running").unwrap_or(0),
            completed: row.try_get::<i64, _>("completed").unwrap_or(0),
            error: row.try_get::<i64, _>("error").unwrap_or(0),
            failed: row.try_get::<i64, _>("failed").unwrap_or(0),
        })
    }

    /// Counters across a run's own steps, used to decide `STEP_START` →
    /// `GROUP_START` at the very first step of the very first run.
    pub async fn get_run_group_step_counts(&self, run_group_id: Uuid) -> Result<RunGroupCounts> {
        let row = sqlx::query(
            "SELECT
                count(*) FILTER (WHERE rs.status = 'PENDING') AS pending,
                count(*) FILTER (WHERE rs.status = 'RUNNING') AS running,
                count(*) FILTER (WHERE rs.status = 'COMPLETED') AS completed,
                count(*) FILTER (WHERE rs.status = 'ERROR') AS error,
                count(*) FILTER (WHERE rs.status = 'FAILED') AS failed
             FROM run_steps rs
             JOIN workflow_runs wr ON wr.id = rs.workflow_run_id
             WHERE wr.run_group_id = $1",
        )
        .bind(run_group_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("get_run_group_step_counts"))?;

        Ok(RunGroupCounts {
            pending: row.try_get::<i64, _>("pending").unwrap_or(0),
            running: row.try_get::<i64, _>("running").unwrap_or(0),
            completed: row.try_get::<i64, _>("completed").unwrap_or(0),
            error: row.try_get::<i64, _>("error").unwrap_or(0),
            failed: row.try_get::<i64, _>("failed").unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RunGroupCounts {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub error: i64,
    pub failed: i64,
}

// ---------------------------------------------------------------------
// Lifecycle history
// ---------------------------------------------------------------------

impl Database {
    pub async fn create_lifecycle_history(
        &self,
        run_group_id: Uuid,
        workflow_run_id: Uuid,
        step_id: Option<Uuid>,
        event: LifecycleEvent,
        status: RunStatus,
        status_meta: &Value,
    ) -> Result<LifecycleHistoryRow> {
        sqlx::query_as::<_, LifecycleHistoryRow>(
            "INSERT INTO lifecycle_history
                (id, run_group_id, workflow_run_id, step_id, event, status, start_date, status_meta)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(run_group_id)
        .bind(workflow_run_id)
        .bind(step_id)
        .bind(event)
        .bind(status)
        .bind(Utc::now())
        .bind(status_meta)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("create_lifecycle_history"))
    }

    pub async fn close_lifecycle_history(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE lifecycle_history SET completed_date = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx("close_lifecycle_history"))?;
        Ok(())
    }

    pub async fn get_lifecycle_history_for_run(&self, workflow_run_id: Uuid) -> Result<Vec<LifecycleHistoryRow>> {
        sqlx::query_as::<_, LifecycleHistoryRow>(
            "SELECT * FROM lifecycle_history WHERE workflow_run_id = $1 ORDER BY start_date",
        )
        .bind(workflow_run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx("get_lifecycle_history_for_run"))
    }

    pub async fn get_run_group_durations(&self, run_group_id: Uuid) -> Result<Vec<(Uuid, Option<i64>)>> {
        let rows = sqlx::query(
            "SELECT wr.id AS run_id,
                    EXTRACT(EPOCH FROM (wr.completed_date - wr.start_date))::bigint AS duration_secs
             FROM workflow_runs wr WHERE wr.run_group_id = $1",
        )
        .bind(run_group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx("get_run_group_durations"))?;
        Ok(rows
            .into_iter()
            .map(|r| (r.try_get("run_id").unwrap_or_default(), r.try_get("duration_secs").ok()))
            .collect())
    }

    pub async fn get_step_stats(&self, run_group_id: Uuid) -> Result<Vec<(WorkflowStepType, i64, i64)>> {
        let rows = sqlx::query(
            "SELECT rs.step_type AS step_type,
                    count(*) FILTER (WHERE rs.status = 'COMPLETED') AS completed,
                    count(*) FILTER (WHERE rs.status = 'FAILED') AS failed
             FROM run_steps rs
             JOIN workflow_runs wr ON wr.id = rs.workflow_run_id
             WHERE wr.run_group_id = $1
             GROUP BY rs.step_type",
        )
        .bind(run_group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx("get_step_stats"))?;
        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.try_get("step_type").unwrap_or(WorkflowStepType::Ingest),
                    r.try_get("completed").unwrap_or(0),
                    r.try_get("failed").unwrap_or(0),
                )
            })
            .collect())
    }
}

// ---------------------------------------------------------------------
// Worker checkins
// ---------------------------------------------------------------------

impl Database {
    pub async fn worker_checkin(&self, worker_id: Uuid) -> Result<WorkerCheckinRow> {
        sqlx::query_as::<_, WorkerCheckinRow>(
            "INSERT INTO worker_checkins (worker_id, first_checkin, last_checkin)
             VALUES ($1, $2, $2)
             ON CONFLICT (worker_id) DO UPDATE SET last_checkin = EXCLUDED.last_checkin
             RETURNING *",
        )
        .bind(worker_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("worker_checkin"))
    }

    pub async fn find_dead_workers(&self, timeout_secs: i64) -> Result<Vec<WorkerCheckinRow>> {
        sqlx::query_as::<_, WorkerCheckinRow>(
            "SELECT * FROM worker_checkins WHERE last_checkin < now() - ($1 * interval '1 second')",
        )
        .bind(timeout_secs as f64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx("find_dead_workers"))
    }

    pub async fn reap_worker(&self, worker_id: Uuid) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx("reap_worker/begin"))?;

        sqlx::query("DELETE FROM worker_checkins WHERE worker_id = $1")
            .bind(worker_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx("reap_worker/delete_checkin"))?;

        let reset = sqlx::query(
            "UPDATE run_steps SET status = 'PENDING', worker_id = NULL
             WHERE worker_id = $1 AND status = 'RUNNING'",
        )
        .bind(worker_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx("reap_worker/reset_running"))?
        .rows_affected();

        sqlx::query("UPDATE run_steps SET worker_id = NULL WHERE worker_id = $1 AND status != 'COMPLETED'")
            .bind(worker_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx("reap_worker/clear_owner"))?;

        tx.commit().await.map_err(map_sqlx("reap_worker/commit"))?;
        Ok(reset)
    }
}

// ---------------------------------------------------------------------
// Sync state
// ---------------------------------------------------------------------

impl Database {
    pub async fn get_sync_state(&self, source_id: &str) -> Result<Option<SyncStateRow>> {
        sqlx::query_as::<_, SyncStateRow>("SELECT * FROM sync_state WHERE source_id = $1")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx("get_sync_state"))
    }

    pub async fn put_sync_state(&self, source_id: &str, state: &Value) -> Result<SyncStateRow> {
        sqlx::query_as::<_, SyncStateRow>(
            "INSERT INTO sync_state (source_id, state, updated_date)
             VALUES ($1, $2, $3)
             ON CONFLICT (source_id) DO UPDATE SET state = EXCLUDED.state, updated_date = EXCLUDED.updated_date
             RETURNING *",
        )
        .bind(source_id)
        .bind(state)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx("put_sync_state"))
    }

    pub async fn delete_sync_state(&self, source_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_state WHERE source_id = $1")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx("delete_sync_state"))?;
        Ok(result.rows_affected())
    }
}
