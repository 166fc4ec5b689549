//! SQLite record store: one wide `samples` table, one nullable column per
//! derived value.

use std::path::Path;

use chartforge_normalize::PreprocessMeta;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::RecordStore;
use crate::error::StoreError;
use crate::sample::{BlobId, GraphType, NewSample, Sample, SampleId};
use crate::stage::{Stage, StageOutput};

/// Highest migration this build knows.
pub const SCHEMA_VERSION: i64 = 1;

const COLUMNS: &str = "id, source, graph_type, question, good_answer, raw_image_ref, \
    good_image_ref, original_width, original_height, preprocess_meta, hidden_answer, \
    adversarial_image_ref, output_answer, attack_succeeded";

/// Record store backed by a SQLite database file.
pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    /// Open (or create) the database at `path` and migrate it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// A private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if migration fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Current `user_version` of the database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the pragma cannot be read.
    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        if current < 1 {
            self.conn
                .execute_batch(include_str!("../../migrations/0001_samples.sql"))?;
            self.conn.execute("PRAGMA user_version = 1", [])?;
            tracing::debug!(version = 1, "applied schema migration");
        }

        Ok(())
    }

    fn query(&self, sql: &str, limit: Option<usize>) -> Result<Vec<Sample>, StoreError> {
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let mut statement = self.conn.prepare(sql)?;
        let rows = statement.query_map([limit], RawRow::from_row)?;
        let mut samples = Vec::new();
        for row in rows {
            samples.push(row?.into_sample()?);
        }
        Ok(samples)
    }
}

/// Column values as stored, before validation.
struct RawRow {
    id: i64,
    source: String,
    graph_type: String,
    question: String,
    good_answer: String,
    raw_image_ref: String,
    good_image_ref: Option<String>,
    original_width: Option<i64>,
    original_height: Option<i64>,
    preprocess_meta: Option<String>,
    hidden_answer: Option<String>,
    adversarial_image_ref: Option<String>,
    output_answer: Option<String>,
    attack_succeeded: Option<bool>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source: row.get(1)?,
            graph_type: row.get(2)?,
            question: row.get(3)?,
            good_answer: row.get(4)?,
            raw_image_ref: row.get(5)?,
            good_image_ref: row.get(6)?,
            original_width: row.get(7)?,
            original_height: row.get(8)?,
            preprocess_meta: row.get(9)?,
            hidden_answer: row.get(10)?,
            adversarial_image_ref: row.get(11)?,
            output_answer: row.get(12)?,
            attack_succeeded: row.get(13)?,
        })
    }

    fn into_sample(self) -> Result<Sample, StoreError> {
        let dimension = |value: Option<i64>, column: &str| {
            value
                .map(|v| {
                    u32::try_from(v).map_err(|_| {
                        StoreError::Corrupt(format!("sample #{}: {column} = {v}", self.id))
                    })
                })
                .transpose()
        };
        let original_width = dimension(self.original_width, "original_width")?;
        let original_height = dimension(self.original_height, "original_height")?;
        let preprocess_meta = self
            .preprocess_meta
            .as_deref()
            .map(serde_json::from_str::<PreprocessMeta>)
            .transpose()?;

        Ok(Sample {
            id: SampleId(self.id),
            source: self.source,
            graph_type: GraphType::from_label(&self.graph_type),
            question: self.question,
            good_answer: self.good_answer,
            raw_image_ref: BlobId::new(self.raw_image_ref),
            good_image_ref: self.good_image_ref.map(BlobId::new),
            original_width,
            original_height,
            preprocess_meta,
            hidden_answer: self.hidden_answer,
            adversarial_image_ref: self.adversarial_image_ref.map(BlobId::new),
            output_answer: self.output_answer,
            attack_succeeded: self.attack_succeeded,
        })
    }
}

impl RecordStore for SqliteRecordStore {
    fn insert(&mut self, sample: &NewSample) -> Result<SampleId, StoreError> {
        self.conn.execute(
            "INSERT INTO samples (source, graph_type, question, good_answer, raw_image_ref) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                sample.source,
                sample.graph_type.as_str(),
                sample.question,
                sample.good_answer,
                sample.raw_image_ref.as_str(),
            ],
        )?;
        Ok(SampleId(self.conn.last_insert_rowid()))
    }

    fn get(&self, id: SampleId) -> Result<Option<Sample>, StoreError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM samples WHERE id = ?1"),
                [id.0],
                RawRow::from_row,
            )
            .optional()?;
        raw.map(RawRow::into_sample).transpose()
    }

    fn samples(&self, limit: Option<usize>) -> Result<Vec<Sample>, StoreError> {
        self.query(
            &format!("SELECT {COLUMNS} FROM samples ORDER BY id ASC LIMIT ?1"),
            limit,
        )
    }

    fn select_pending(
        &self,
        stage: Stage,
        limit: Option<usize>,
    ) -> Result<Vec<Sample>, StoreError> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM samples \
                 WHERE {output} IS NULL AND {input} IS NOT NULL \
                 ORDER BY id ASC LIMIT ?1",
                output = stage.output_column(),
                input = stage.input_column(),
            ),
            limit,
        )
    }

    fn apply(&mut self, id: SampleId, output: &StageOutput) -> Result<bool, StoreError> {
        let changed = match output {
            StageOutput::Preprocessed {
                good_image_ref,
                original_width,
                original_height,
                preprocess_meta,
            } => self.conn.execute(
                "UPDATE samples SET \
                     good_image_ref = COALESCE(good_image_ref, ?1), \
                     original_width = COALESCE(original_width, ?2), \
                     original_height = COALESCE(original_height, ?3), \
                     preprocess_meta = COALESCE(preprocess_meta, ?4) \
                 WHERE id = ?5 AND good_image_ref IS NULL",
                params![
                    good_image_ref.as_str(),
                    original_width,
                    original_height,
                    serde_json::to_string(preprocess_meta)?,
                    id.0,
                ],
            )?,
            StageOutput::Perturbed {
                adversarial_image_ref,
            } => self.conn.execute(
                "UPDATE samples SET adversarial_image_ref = COALESCE(adversarial_image_ref, ?1) \
                 WHERE id = ?2 AND adversarial_image_ref IS NULL",
                params![adversarial_image_ref.as_str(), id.0],
            )?,
            StageOutput::Explained { hidden_answer } => self.conn.execute(
                "UPDATE samples SET hidden_answer = COALESCE(hidden_answer, ?1) \
                 WHERE id = ?2 AND hidden_answer IS NULL",
                params![hidden_answer, id.0],
            )?,
            StageOutput::Evaluated {
                output_answer,
                attack_succeeded,
            } => self.conn.execute(
                "UPDATE samples SET \
                     output_answer = COALESCE(output_answer, ?1), \
                     attack_succeeded = COALESCE(attack_succeeded, ?2) \
                 WHERE id = ?3 AND output_answer IS NULL",
                params![output_answer, attack_succeeded, id.0],
            )?,
        };
        Ok(changed == 1)
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        // A failed COMMIT may already have ended the transaction.
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn wipe(&mut self) -> Result<(), StoreError> {
        self.conn
            .execute_batch("DROP TABLE IF EXISTS samples; PRAGMA user_version = 0;")?;
        self.migrate()
    }
}
