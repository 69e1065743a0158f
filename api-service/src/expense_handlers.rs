use chrono::{DateTime, SecondsFormat, Utc};
use common_rpc::{RpcError, RpcRequest, RpcResponse, RpcResult};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::repo::{ExpensePatch, ExpenseQuery, ExpenseRecord, NewExpense};

pub const CREATE_EXPENSE: &str = "/rpc.expense.v1.ExpenseService/CreateExpense";
pub const GET_EXPENSE: &str = "/rpc.expense.v1.ExpenseService/GetExpense";
pub const LIST_EXPENSES: &str = "/rpc.expense.v1.ExpenseService/ListExpenses";
pub const UPDATE_EXPENSE: &str = "/rpc.expense.v1.ExpenseService/UpdateExpense";
pub const DELETE_EXPENSE: &str = "/rpc.expense.v1.ExpenseService/DeleteExpense";

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 1000;

const NANOS_PER_CENT: i64 = 10_000_000;
const PAGE_TOKEN_PREFIX: &str = "o:";

/// Currency amount in `google.type.Money` form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Money {
    pub currency_code: String,
    pub units: i64,
    pub nanos: i32,
}

impl Money {
    /// Sub-cent precision is truncated. `None` when the amount does not fit in cents.
    pub fn to_cents(&self) -> Option<i64> {
        self.units
            .checked_mul(100)?
            .checked_add(i64::from(self.nanos) / NANOS_PER_CENT)
    }

    pub fn from_cents(currency_code: &str, cents: i64) -> Self {
        Self {
            currency_code: currency_code.to_string(),
            units: cents / 100,
            nanos: i32::try_from((cents % 100) * NANOS_PER_CENT).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub user_id: String,
    pub amount: Option<Money>,
    pub category: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl From<ExpenseRecord> for Expense {
    fn from(record: ExpenseRecord) -> Self {
        Self {
            amount: Some(Money::from_cents(&record.currency_code, record.amount_cents)),
            id: record.id,
            user_id: record.user_id,
            category: record.category,
            description: record.description,
            create_time: Some(timestamp(record.created_at)),
            update_time: Some(timestamp(record.updated_at)),
        }
    }
}

/// `google.protobuf.FieldMask` in either JSON form: `"a,b"` or `{"paths": [...]}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FieldMask {
    Joined(String),
    Paths { paths: Vec<String> },
}

impl FieldMask {
    pub fn paths(&self) -> Vec<String> {
        match self {
            FieldMask::Joined(joined) => joined
                .split(',')
                .map(|path| path.trim().to_string())
                .filter(|path| !path.is_empty())
                .collect(),
            FieldMask::Paths { paths } => paths.iter().map(|path| path.trim().to_string()).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateExpenseRequest {
    pub expense: Option<Expense>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExpenseIdRequest {
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListExpensesRequest {
    pub user_id: String,
    pub page_size: i64,
    pub page_token: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExpensesResponse {
    pub expenses: Vec<Expense>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub next_page_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateExpenseRequest {
    pub expense: Option<Expense>,
    pub update_mask: Option<FieldMask>,
}

pub async fn create_expense(state: AppState, request: RpcRequest) -> RpcResult<RpcResponse> {
    let CreateExpenseRequest { expense } = request.decode()?;
    let expense = expense.ok_or_else(|| RpcError::invalid_argument("expense is required"))?;

    let user_id = expense.user_id.trim();
    if user_id.is_empty() {
        return Err(RpcError::invalid_argument("user_id is required"));
    }
    let amount = match &expense.amount {
        Some(amount) if !amount.currency_code.is_empty() => amount,
        _ => return Err(RpcError::invalid_argument("amount currency_code is required")),
    };

    let record = state
        .store
        .insert_expense(NewExpense {
            user_id: user_id.to_string(),
            amount_cents: cents(amount)?,
            currency_code: amount.currency_code.clone(),
            category: expense.category.clone(),
            description: expense.description.clone(),
        })
        .await?;

    RpcResponse::json(&Expense::from(record))
}

pub async fn get_expense(state: AppState, request: RpcRequest) -> RpcResult<RpcResponse> {
    let ExpenseIdRequest { id } = request.decode()?;
    let id = require_id(&id)?;

    let record = state
        .store
        .get_expense(id)
        .await?
        .ok_or_else(expense_not_found)?;

    RpcResponse::json(&Expense::from(record))
}

pub async fn list_expenses(state: AppState, request: RpcRequest) -> RpcResult<RpcResponse> {
    let ListExpensesRequest {
        user_id,
        page_size,
        page_token,
    } = request.decode()?;

    let limit = normalize_page_size(page_size);
    let offset = parse_page_token(&page_token);
    let user_id = user_id.trim();

    let records = state
        .store
        .list_expenses(ExpenseQuery {
            user_id: (!user_id.is_empty()).then(|| user_id.to_string()),
            limit,
            offset,
        })
        .await?;

    let next_page_token = if i64::try_from(records.len()).unwrap_or(i64::MAX) == limit {
        format!("{PAGE_TOKEN_PREFIX}{}", offset + limit)
    } else {
        String::new()
    };

    RpcResponse::json(&ListExpensesResponse {
        expenses: records.into_iter().map(Expense::from).collect(),
        next_page_token,
    })
}

pub async fn update_expense(state: AppState, request: RpcRequest) -> RpcResult<RpcResponse> {
    let UpdateExpenseRequest {
        expense,
        update_mask,
    } = request.decode()?;

    let expense = expense.unwrap_or_default();
    let id = expense.id.trim();
    if id.is_empty() {
        return Err(RpcError::invalid_argument("expense.id is required"));
    }

    let paths = update_mask.map(|mask| mask.paths()).unwrap_or_default();
    let patch = build_patch(&expense, &paths)?;
    if patch.is_empty() {
        return Err(RpcError::invalid_argument(
            "update_mask has no supported fields",
        ));
    }

    let record = state
        .store
        .update_expense(id, patch)
        .await?
        .ok_or_else(expense_not_found)?;

    RpcResponse::json(&Expense::from(record))
}

pub async fn delete_expense(state: AppState, request: RpcRequest) -> RpcResult<RpcResponse> {
    let ExpenseIdRequest { id } = request.decode()?;
    let id = require_id(&id)?;

    if !state.store.delete_expense(id).await? {
        return Err(expense_not_found());
    }

    // google.protobuf.Timestamp renders as an RFC 3339 string in JSON.
    RpcResponse::json(&timestamp(Utc::now()))
}

fn build_patch(expense: &Expense, paths: &[String]) -> RpcResult<ExpensePatch> {
    let mut patch = ExpensePatch::default();
    for path in paths {
        match path.as_str() {
            "category" => patch.category = Some(expense.category.clone()),
            "description" => patch.description = Some(expense.description.clone()),
            "amount" => {
                if let Some(amount) = &expense.amount {
                    patch.amount = Some((cents(amount)?, amount.currency_code.clone()));
                }
            }
            _ => {}
        }
    }
    Ok(patch)
}

fn cents(amount: &Money) -> RpcResult<i64> {
    amount
        .to_cents()
        .ok_or_else(|| RpcError::invalid_argument("amount out of range"))
}

fn normalize_page_size(page_size: i64) -> i64 {
    if (1..=MAX_PAGE_SIZE).contains(&page_size) {
        page_size
    } else {
        DEFAULT_PAGE_SIZE
    }
}

fn parse_page_token(token: &str) -> i64 {
    token
        .strip_prefix(PAGE_TOKEN_PREFIX)
        .and_then(|offset| offset.parse::<i64>().ok())
        .filter(|offset| *offset >= 0)
        .unwrap_or(0)
}

fn require_id(id: &str) -> RpcResult<&str> {
    let id = id.trim();
    if id.is_empty() {
        Err(RpcError::invalid_argument("id is required"))
    } else {
        Ok(id)
    }
}

fn expense_not_found() -> RpcError {
    RpcError::not_found("expense not found")
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_converts_to_cents_truncating_sub_cent() {
        let money = Money {
            currency_code: "USD".into(),
            units: 12,
            nanos: 345_000_000,
        };
        assert_eq!(money.to_cents(), Some(1234));
        assert_eq!(Money::from_cents("USD", 1234).nanos, 340_000_000);
        assert_eq!(Money::from_cents("USD", 1234).units, 12);
    }

    #[test]
    fn oversized_units_do_not_overflow() {
        let money = Money {
            currency_code: "USD".into(),
            units: i64::MAX / 10,
            nanos: 0,
        };
        assert_eq!(money.to_cents(), None);

        let at_limit = Money {
            currency_code: "USD".into(),
            units: i64::MAX / 100,
            nanos: 990_000_000,
        };
        assert_eq!(at_limit.to_cents(), None);

        let expense = Expense {
            amount: Some(money),
            ..Expense::default()
        };
        let err = build_patch(&expense, &["amount".into()]).unwrap_err();
        assert_eq!(err.code(), common_rpc::Code::InvalidArgument);
    }

    #[test]
    fn page_size_outside_range_defaults() {
        assert_eq!(normalize_page_size(0), 50);
        assert_eq!(normalize_page_size(-5), 50);
        assert_eq!(normalize_page_size(1001), 50);
        assert_eq!(normalize_page_size(1000), 1000);
        assert_eq!(normalize_page_size(1), 1);
    }

    #[test]
    fn page_token_parses_offset_or_zero() {
        assert_eq!(parse_page_token("o:20"), 20);
        assert_eq!(parse_page_token(""), 0);
        assert_eq!(parse_page_token("o:abc"), 0);
        assert_eq!(parse_page_token("20"), 0);
        assert_eq!(parse_page_token("o:-4"), 0);
    }

    #[test]
    fn field_mask_accepts_both_json_forms() {
        let joined: FieldMask = serde_json::from_str(r#""category, amount""#).unwrap();
        assert_eq!(joined.paths(), vec!["category", "amount"]);

        let object: FieldMask = serde_json::from_str(r#"{"paths":["description"]}"#).unwrap();
        assert_eq!(object.paths(), vec!["description"]);
    }

    #[test]
    fn patch_ignores_unknown_paths_and_missing_amount() {
        let expense = Expense {
            category: "food".into(),
            ..Expense::default()
        };
        let patch = build_patch(&expense, &["user_id".into(), "amount".into()]).unwrap();
        assert!(patch.is_empty());

        let patch = build_patch(&expense, &["category".into()]).unwrap();
        assert_eq!(patch.category.as_deref(), Some("food"));
    }
}
