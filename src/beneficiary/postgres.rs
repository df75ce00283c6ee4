//! PostgreSQL beneficiary directory.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{Beneficiary, BeneficiaryError, BeneficiaryStore};
use crate::ledger::UserId;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS beneficiaries (
    user_id         BIGINT NOT NULL REFERENCES users(id),
    nickname        TEXT NOT NULL,
    account_number  TEXT NOT NULL,
    bank_code       TEXT NOT NULL,
    account_name    TEXT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (user_id, nickname)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_beneficiaries_nickname_ci
    ON beneficiaries (user_id, LOWER(nickname));
"#;

pub struct PgBeneficiaries {
    pool: PgPool,
}

impl PgBeneficiaries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), BeneficiaryError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn map(row: &sqlx::postgres::PgRow) -> Result<Beneficiary, BeneficiaryError> {
        Ok(Beneficiary {
            user_id: row.try_get("user_id")?,
            nickname: row.try_get("nickname")?,
            account_number: row.try_get("account_number")?,
            bank_code: row.try_get("bank_code")?,
            account_name: row.try_get("account_name")?,
        })
    }
}

#[async_trait]
impl BeneficiaryStore for PgBeneficiaries {
    async fn find(
        &self,
        user_id: UserId,
        nickname: &str,
    ) -> Result<Option<Beneficiary>, BeneficiaryError> {
        let row = sqlx::query(
            "SELECT * FROM beneficiaries WHERE user_id = $1 AND LOWER(nickname) = LOWER($2)",
        )
        .bind(user_id)
        .bind(nickname.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::map).transpose()
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<Beneficiary>, BeneficiaryError> {
        let rows = sqlx::query(
            "SELECT * FROM beneficiaries WHERE user_id = $1 ORDER BY LOWER(nickname)",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map).collect()
    }

    async fn save(&self, beneficiary: Beneficiary) -> Result<(), BeneficiaryError> {
        let res = sqlx::query(
            "INSERT INTO beneficiaries (user_id, nickname, account_number, bank_code, account_name) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING",
        )
        .bind(beneficiary.user_id)
        .bind(beneficiary.nickname.trim())
        .bind(&beneficiary.account_number)
        .bind(&beneficiary.bank_code)
        .bind(&beneficiary.account_name)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(BeneficiaryError::NicknameTaken(beneficiary.nickname));
        }
        Ok(())
    }

    async fn remove(&self, user_id: UserId, nickname: &str) -> Result<(), BeneficiaryError> {
        let res = sqlx::query(
            "DELETE FROM beneficiaries WHERE user_id = $1 AND LOWER(nickname) = LOWER($2)",
        )
        .bind(user_id)
        .bind(nickname.trim())
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(BeneficiaryError::NotFound(nickname.to_string()));
        }
        Ok(())
    }
}
