use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_rpc::{Code, RpcError};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl From<StoreError> for RpcError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => {
                RpcError::new(Code::AlreadyExists).with_message("record already exists")
            }
            StoreError::Backend(_) => RpcError::internal("storage failure").with_source(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub card_no: i64,
    pub card_type: String,
    pub name: String,
    pub address: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ExpenseRecord {
    pub id: String,
    pub user_id: String,
    pub amount_cents: i64,
    pub currency_code: String,
    pub category: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewExpense {
    pub user_id: String,
    pub amount_cents: i64,
    pub currency_code: String,
    pub category: String,
    pub description: String,
}

/// Fields to overwrite on an expense; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ExpensePatch {
    pub category: Option<String>,
    pub description: Option<String>,
    /// `(amount_cents, currency_code)`
    pub amount: Option<(i64, String)>,
}

impl ExpensePatch {
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.description.is_none() && self.amount.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExpenseQuery {
    pub user_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn insert_user(&self, user: NewUser) -> StoreResult<UserRecord>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>>;
    async fn insert_payment(&self, payment: NewPayment) -> StoreResult<Uuid>;
    async fn insert_expense(&self, expense: NewExpense) -> StoreResult<ExpenseRecord>;
    async fn get_expense(&self, id: &str) -> StoreResult<Option<ExpenseRecord>>;
    /// Newest first.
    async fn list_expenses(&self, query: ExpenseQuery) -> StoreResult<Vec<ExpenseRecord>>;
    async fn update_expense(&self, id: &str, patch: ExpensePatch)
        -> StoreResult<Option<ExpenseRecord>>;
    /// Returns whether a row was removed.
    async fn delete_expense(&self, id: &str) -> StoreResult<bool>;
    async fn ping(&self) -> StoreResult<()>;
}

#[derive(Default)]
struct MemoryTables {
    users: HashMap<String, UserRecord>,
    payments: Vec<(Uuid, NewPayment)>,
    expenses: Vec<ExpenseRecord>,
}

/// Process-local store for development and tests.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<MemoryTables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payment_count(&self) -> usize {
        self.tables.read().await.payments.len()
    }
}

#[async_trait]
impl DataStore for InMemoryStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<UserRecord> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.email) {
            return Err(StoreError::Conflict(format!("email {}", user.email)));
        }
        let record = UserRecord {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            created_at: Utc::now(),
        };
        tables.users.insert(record.email.clone(), record.clone());
        Ok(record)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.tables.read().await.users.get(email).cloned())
    }

    async fn insert_payment(&self, payment: NewPayment) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        self.tables.write().await.payments.push((id, payment));
        Ok(id)
    }

    async fn insert_expense(&self, expense: NewExpense) -> StoreResult<ExpenseRecord> {
        let now = Utc::now();
        let record = ExpenseRecord {
            id: Uuid::new_v4().to_string(),
            user_id: expense.user_id,
            amount_cents: expense.amount_cents,
            currency_code: expense.currency_code,
            category: expense.category,
            description: expense.description,
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.expenses.push(record.clone());
        Ok(record)
    }

    async fn get_expense(&self, id: &str) -> StoreResult<Option<ExpenseRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.expenses.iter().find(|e| e.id == id).cloned())
    }

    async fn list_expenses(&self, query: ExpenseQuery) -> StoreResult<Vec<ExpenseRecord>> {
        let tables = self.tables.read().await;
        // Insertion order is creation order; walk it backwards for newest first.
        let rows = tables
            .expenses
            .iter()
            .rev()
            .filter(|e| {
                query
                    .user_id
                    .as_deref()
                    .map_or(true, |user_id| e.user_id == user_id)
            })
            .skip(usize::try_from(query.offset).unwrap_or(0))
            .take(usize::try_from(query.limit).unwrap_or(0))
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn update_expense(
        &self,
        id: &str,
        patch: ExpensePatch,
    ) -> StoreResult<Option<ExpenseRecord>> {
        let mut tables = self.tables.write().await;
        let Some(record) = tables.expenses.iter_mut().find(|e| e.id == id) else {
            return Ok(None);
        };
        if let Some(category) = patch.category {
            record.category = category;
        }
        if let Some(description) = patch.description {
            record.description = description;
        }
        if let Some((cents, currency)) = patch.amount {
            record.amount_cents = cents;
            record.currency_code = currency;
        }
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn delete_expense(&self, id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.expenses.len();
        tables.expenses.retain(|e| e.id != id);
        Ok(tables.expenses.len() != before)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
