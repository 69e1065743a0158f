use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crate::repo::{
    DataStore, ExpensePatch, ExpenseQuery, ExpenseRecord, NewExpense, NewPayment, NewUser,
    StoreResult, UserRecord,
};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        first_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS payments (
        id UUID PRIMARY KEY,
        card_no BIGINT NOT NULL,
        card_type TEXT NOT NULL,
        name TEXT NOT NULL,
        address TEXT NOT NULL,
        amount DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS expenses (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        amount_cents BIGINT NOT NULL,
        currency_code TEXT NOT NULL,
        category TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS expenses_user_created_idx ON expenses (user_id, created_at DESC)",
];

const EXPENSE_COLUMNS: &str =
    "id, user_id, amount_cents, currency_code, category, description, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(Duration::from_secs(180))
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes that do not exist yet.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("database schema ensured");
        Ok(())
    }
}

#[async_trait]
impl DataStore for PgStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<UserRecord> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (id, email, password_hash, first_name, last_name)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, email, password_hash, first_name, last_name, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.first_name)
        .bind(user.last_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, email, password_hash, first_name, last_name, created_at
             FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn insert_payment(&self, payment: NewPayment) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO payments (id, card_no, card_type, name, address, amount)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(payment.card_no)
        .bind(payment.card_type)
        .bind(payment.name)
        .bind(payment.address)
        .bind(payment.amount)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn insert_expense(&self, expense: NewExpense) -> StoreResult<ExpenseRecord> {
        let record = sqlx::query_as::<_, ExpenseRecord>(&format!(
            "INSERT INTO expenses (id, user_id, amount_cents, currency_code, category, description)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {EXPENSE_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(expense.user_id)
        .bind(expense.amount_cents)
        .bind(expense.currency_code)
        .bind(expense.category)
        .bind(expense.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_expense(&self, id: &str) -> StoreResult<Option<ExpenseRecord>> {
        let record = sqlx::query_as::<_, ExpenseRecord>(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_expenses(&self, query: ExpenseQuery) -> StoreResult<Vec<ExpenseRecord>> {
        let rows = match query.user_id {
            Some(user_id) => {
                sqlx::query_as::<_, ExpenseRecord>(&format!(
                    "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = $1
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3"
                ))
                .bind(user_id)
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ExpenseRecord>(&format!(
                    "SELECT {EXPENSE_COLUMNS} FROM expenses
                     ORDER BY created_at DESC LIMIT $1 OFFSET $2"
                ))
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn update_expense(
        &self,
        id: &str,
        patch: ExpensePatch,
    ) -> StoreResult<Option<ExpenseRecord>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE expenses SET ");
        {
            let mut set = builder.separated(", ");
            if let Some(category) = patch.category {
                set.push("category = ").push_bind_unseparated(category);
            }
            if let Some(description) = patch.description {
                set.push("description = ").push_bind_unseparated(description);
            }
            if let Some((cents, currency)) = patch.amount {
                set.push("amount_cents = ").push_bind_unseparated(cents);
                set.push("currency_code = ").push_bind_unseparated(currency);
            }
            set.push("updated_at = NOW()");
        }
        builder.push(" WHERE id = ").push_bind(id.to_string());
        builder.push(format!(" RETURNING {EXPENSE_COLUMNS}"));

        let record = builder
            .build_query_as::<ExpenseRecord>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn delete_expense(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM expenses WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
