//! PostgreSQL storage backend for the petition lifecycle engine.
//!
//! Petition rows carry a `row_version` column; updates are conditional on
//! the version read, so the engine's retry loop sees a clean conflict
//! instead of a lost update. The rejection table is keyed by petition id
//! and written with `ON CONFLICT ... DO UPDATE`, so two concurrent
//! moderators never trip a uniqueness violation.

#![deny(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use petition_core::model::{
    DebateState, ModeratorId, NewPetition, NewSignature, Petition, PetitionId, PetitionState,
    Rejection, Signature, SignatureId, SignatureState,
};
use petition_core::storage::{
    PetitionStore, RejectionStore, SignatureStore, StorageError, StorageResult, Version,
    VersionedPetition,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

/// PostgreSQL petition storage adapter.
#[derive(Debug, Clone)]
pub struct PostgresPetitionStore {
    pool: PgPool,
}

impl PostgresPetitionStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS petitions (
                id BIGSERIAL PRIMARY KEY,
                reference TEXT NULL UNIQUE,
                state TEXT NOT NULL,
                collect_signatures BOOLEAN NOT NULL,
                signature_count BIGINT NOT NULL DEFAULT 0,
                last_signed_at TIMESTAMPTZ NULL,
                moderation_threshold_reached_at TIMESTAMPTZ NULL,
                referral_threshold_reached_at TIMESTAMPTZ NULL,
                debate_threshold_reached_at TIMESTAMPTZ NULL,
                debate_state TEXT NOT NULL,
                scheduled_debate_date DATE NULL,
                open_at TIMESTAMPTZ NULL,
                closed_at TIMESTAMPTZ NULL,
                rejected_at TIMESTAMPTZ NULL,
                moderated_by TEXT NULL,
                moderation_lag BIGINT NULL,
                locked_by TEXT NULL,
                locked_at TIMESTAMPTZ NULL,
                created_at TIMESTAMPTZ NOT NULL,
                row_version BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres schema create failed: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signatures (
                id BIGSERIAL PRIMARY KEY,
                petition_id BIGINT NOT NULL REFERENCES petitions (id),
                state TEXT NOT NULL,
                creator BOOLEAN NOT NULL DEFAULT FALSE,
                sponsor BOOLEAN NOT NULL DEFAULT FALSE,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                validated_at TIMESTAMPTZ NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres schema create failed: {e}")))?;

        // One creator signature per petition, enforced by the database.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_signatures_one_creator \
             ON signatures (petition_id) WHERE creator",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres index create failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_signatures_petition_state \
             ON signatures (petition_id, state)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres index create failed: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rejections (
                petition_id BIGINT PRIMARY KEY REFERENCES petitions (id),
                code TEXT NOT NULL,
                details TEXT NULL,
                rejected_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres schema create failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl PetitionStore for PostgresPetitionStore {
    async fn create_petition(&self, new: NewPetition) -> StorageResult<Petition> {
        let row = sqlx::query(
            r#"
            INSERT INTO petitions (state, collect_signatures, debate_state, created_at)
            VALUES ('pending', $1, 'pending', $2)
            RETURNING id
            "#,
        )
        .bind(new.collect_signatures)
        .bind(new.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres insert failed: {e}")))?;

        let id: PetitionId = row
            .try_get("id")
            .map_err(|e| StorageError::Serialization(format!("decode id failed: {e}")))?;

        Ok(Petition::from_new(id, &new))
    }

    async fn get_petition(&self, id: PetitionId) -> StorageResult<Option<VersionedPetition>> {
        let row = sqlx::query(&format!(
            "SELECT {PETITION_COLUMNS} FROM petitions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres select failed: {e}")))?;

        row.map(|row| decode_petition(&row)).transpose()
    }

    async fn update_petition(
        &self,
        id: PetitionId,
        expected: Version,
        petition: Petition,
    ) -> StorageResult<Version> {
        let expected_version: i64 = expected.try_into().map_err(|_| {
            StorageError::Backend("row version exceeds postgres BIGINT range".to_string())
        })?;
        let signature_count: i64 = petition.signature_count.try_into().map_err(|_| {
            StorageError::Backend("signature count exceeds postgres BIGINT range".to_string())
        })?;

        let result = sqlx::query(
            r#"
            UPDATE petitions SET
                reference = $3,
                state = $4,
                signature_count = $5,
                last_signed_at = $6,
                moderation_threshold_reached_at = $7,
                referral_threshold_reached_at = $8,
                debate_threshold_reached_at = $9,
                debate_state = $10,
                scheduled_debate_date = $11,
                open_at = $12,
                closed_at = $13,
                rejected_at = $14,
                moderated_by = $15,
                moderation_lag = $16,
                locked_by = $17,
                locked_at = $18,
                row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(&petition.reference)
        .bind(petition.state.name())
        .bind(signature_count)
        .bind(petition.last_signed_at)
        .bind(petition.moderation_threshold_reached_at)
        .bind(petition.referral_threshold_reached_at)
        .bind(petition.debate_threshold_reached_at)
        .bind(petition.debate_state.name())
        .bind(petition.scheduled_debate_date)
        .bind(petition.open_at)
        .bind(petition.closed_at)
        .bind(petition.rejected_at)
        .bind(petition.moderated_by.as_ref().map(|m| m.as_str().to_string()))
        .bind(petition.moderation_lag)
        .bind(petition.locked_by.as_ref().map(|m| m.as_str().to_string()))
        .bind(petition.locked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres update failed: {e}")))?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM petitions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("postgres select failed: {e}")))?;
            return if exists.is_some() {
                Err(StorageError::Conflict(format!(
                    "petition {id}: version {expected} is stale"
                )))
            } else {
                Err(StorageError::NotFound(format!("petition {id}")))
            };
        }

        Ok(expected + 1)
    }

    async fn list_open_past_closing(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<VersionedPetition>> {
        let rows = sqlx::query(&format!(
            "SELECT {PETITION_COLUMNS} FROM petitions \
             WHERE state = 'open' AND closed_at IS NOT NULL AND closed_at <= $1 \
             ORDER BY id ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres select failed: {e}")))?;

        rows.iter().map(decode_petition).collect()
    }

    async fn list_scheduled_debates_due(
        &self,
        date: NaiveDate,
    ) -> StorageResult<Vec<VersionedPetition>> {
        let rows = sqlx::query(&format!(
            "SELECT {PETITION_COLUMNS} FROM petitions \
             WHERE debate_state = 'scheduled' \
               AND scheduled_debate_date IS NOT NULL AND scheduled_debate_date <= $1 \
             ORDER BY id ASC"
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres select failed: {e}")))?;

        rows.iter().map(decode_petition).collect()
    }
}

#[async_trait]
impl SignatureStore for PostgresPetitionStore {
    async fn create_signature(&self, new: NewSignature) -> StorageResult<Signature> {
        let row = sqlx::query(
            r#"
            INSERT INTO signatures (petition_id, state, creator, sponsor, name, email, created_at)
            VALUES ($1, 'pending', $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(new.petition_id)
        .bind(new.creator)
        .bind(new.sponsor)
        .bind(&new.name)
        .bind(&new.email)
        .bind(new.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::InvariantViolation(format!(
                    "petition {} already has a creator signature",
                    new.petition_id
                ))
            }
            other => StorageError::Backend(format!("postgres insert failed: {other}")),
        })?;

        let id: SignatureId = row
            .try_get("id")
            .map_err(|e| StorageError::Serialization(format!("decode id failed: {e}")))?;

        Ok(Signature::from_new(id, &new))
    }

    async fn get_signature(&self, id: SignatureId) -> StorageResult<Option<Signature>> {
        let row = sqlx::query(&format!(
            "SELECT {SIGNATURE_COLUMNS} FROM signatures WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres select failed: {e}")))?;

        row.map(|row| decode_signature(&row)).transpose()
    }

    async fn update_signature(&self, signature: Signature) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE signatures SET
                state = $2,
                name = $3,
                email = $4,
                validated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(signature.id)
        .bind(signature.state.name())
        .bind(&signature.name)
        .bind(&signature.email)
        .bind(signature.validated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres update failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "signature {}",
                signature.id
            )));
        }
        Ok(())
    }

    async fn creator_signature(&self, petition_id: PetitionId) -> StorageResult<Option<Signature>> {
        let row = sqlx::query(&format!(
            "SELECT {SIGNATURE_COLUMNS} FROM signatures \
             WHERE petition_id = $1 AND creator LIMIT 1"
        ))
        .bind(petition_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres select failed: {e}")))?;

        row.map(|row| decode_signature(&row)).transpose()
    }

    async fn count_validated_signatures(&self, petition_id: PetitionId) -> StorageResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS validated FROM signatures \
             WHERE petition_id = $1 AND state = 'validated'",
        )
        .bind(petition_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres select failed: {e}")))?;

        let count: i64 = row
            .try_get("validated")
            .map_err(|e| StorageError::Serialization(format!("decode count failed: {e}")))?;
        count
            .try_into()
            .map_err(|_| StorageError::InvariantViolation("negative signature count".to_string()))
    }
}

#[async_trait]
impl RejectionStore for PostgresPetitionStore {
    async fn upsert_rejection(&self, rejection: Rejection) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rejections (petition_id, code, details, rejected_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (petition_id) DO UPDATE SET
                code = EXCLUDED.code,
                details = EXCLUDED.details,
                rejected_at = EXCLUDED.rejected_at
            "#,
        )
        .bind(rejection.petition_id)
        .bind(&rejection.code)
        .bind(&rejection.details)
        .bind(rejection.rejected_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres upsert failed: {e}")))?;

        Ok(())
    }

    async fn get_rejection(&self, petition_id: PetitionId) -> StorageResult<Option<Rejection>> {
        let row = sqlx::query(
            "SELECT petition_id, code, details, rejected_at FROM rejections WHERE petition_id = $1",
        )
        .bind(petition_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("postgres select failed: {e}")))?;

        row.map(|row| {
            Ok(Rejection {
                petition_id: decode_column(&row, "petition_id")?,
                code: decode_column(&row, "code")?,
                details: decode_column(&row, "details")?,
                rejected_at: decode_column(&row, "rejected_at")?,
            })
        })
        .transpose()
    }
}

const PETITION_COLUMNS: &str = "id, reference, state, collect_signatures, signature_count, \
    last_signed_at, moderation_threshold_reached_at, referral_threshold_reached_at, \
    debate_threshold_reached_at, debate_state, scheduled_debate_date, open_at, closed_at, \
    rejected_at, moderated_by, moderation_lag, locked_by, locked_at, created_at, row_version";

const SIGNATURE_COLUMNS: &str =
    "id, petition_id, state, creator, sponsor, name, email, validated_at, created_at";

fn decode_column<'r, T>(row: &'r PgRow, column: &str) -> StorageResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| StorageError::Serialization(format!("decode {column} failed: {e}")))
}

fn decode_petition(row: &PgRow) -> StorageResult<VersionedPetition> {
    let state: String = decode_column(row, "state")?;
    let debate_state: String = decode_column(row, "debate_state")?;
    let signature_count: i64 = decode_column(row, "signature_count")?;
    let row_version: i64 = decode_column(row, "row_version")?;
    let moderated_by: Option<String> = decode_column(row, "moderated_by")?;
    let locked_by: Option<String> = decode_column(row, "locked_by")?;

    let petition = Petition {
        id: decode_column(row, "id")?,
        reference: decode_column(row, "reference")?,
        state: parse_state(&state)?,
        collect_signatures: decode_column(row, "collect_signatures")?,
        signature_count: signature_count
            .try_into()
            .map_err(|_| StorageError::InvariantViolation("negative signature count".to_string()))?,
        last_signed_at: decode_column(row, "last_signed_at")?,
        moderation_threshold_reached_at: decode_column(row, "moderation_threshold_reached_at")?,
        referral_threshold_reached_at: decode_column(row, "referral_threshold_reached_at")?,
        debate_threshold_reached_at: decode_column(row, "debate_threshold_reached_at")?,
        debate_state: parse_debate_state(&debate_state)?,
        scheduled_debate_date: decode_column(row, "scheduled_debate_date")?,
        open_at: decode_column(row, "open_at")?,
        closed_at: decode_column(row, "closed_at")?,
        rejected_at: decode_column(row, "rejected_at")?,
        moderated_by: moderated_by.map(ModeratorId::new),
        moderation_lag: decode_column(row, "moderation_lag")?,
        locked_by: locked_by.map(ModeratorId::new),
        locked_at: decode_column(row, "locked_at")?,
        created_at: decode_column(row, "created_at")?,
    };

    Ok(VersionedPetition {
        petition,
        version: row_version
            .try_into()
            .map_err(|_| StorageError::InvariantViolation("negative row version".to_string()))?,
    })
}

fn decode_signature(row: &PgRow) -> StorageResult<Signature> {
    let state: String = decode_column(row, "state")?;

    Ok(Signature {
        id: decode_column(row, "id")?,
        petition_id: decode_column(row, "petition_id")?,
        state: parse_signature_state(&state)?,
        creator: decode_column(row, "creator")?,
        sponsor: decode_column(row, "sponsor")?,
        name: decode_column(row, "name")?,
        email: decode_column(row, "email")?,
        validated_at: decode_column(row, "validated_at")?,
        created_at: decode_column(row, "created_at")?,
    })
}

fn parse_state(value: &str) -> StorageResult<PetitionState> {
    match value {
        "pending" => Ok(PetitionState::Pending),
        "validated" => Ok(PetitionState::Validated),
        "sponsored" => Ok(PetitionState::Sponsored),
        "flagged" => Ok(PetitionState::Flagged),
        "open" => Ok(PetitionState::Open),
        "rejected" => Ok(PetitionState::Rejected),
        "hidden" => Ok(PetitionState::Hidden),
        "closed" => Ok(PetitionState::Closed),
        other => Err(StorageError::Serialization(format!(
            "unknown petition state '{other}' in postgres"
        ))),
    }
}

fn parse_debate_state(value: &str) -> StorageResult<DebateState> {
    match value {
        "pending" => Ok(DebateState::Pending),
        "awaiting" => Ok(DebateState::Awaiting),
        "scheduled" => Ok(DebateState::Scheduled),
        "debated" => Ok(DebateState::Debated),
        "not_debated" => Ok(DebateState::NotDebated),
        other => Err(StorageError::Serialization(format!(
            "unknown debate state '{other}' in postgres"
        ))),
    }
}

fn parse_signature_state(value: &str) -> StorageResult<SignatureState> {
    match value {
        "pending" => Ok(SignatureState::Pending),
        "validated" => Ok(SignatureState::Validated),
        "invalidated" => Ok(SignatureState::Invalidated),
        other => Err(StorageError::Serialization(format!(
            "unknown signature state '{other}' in postgres"
        ))),
    }
}
