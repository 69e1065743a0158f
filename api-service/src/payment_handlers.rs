use common_rpc::{Code, RpcError, RpcRequest, RpcResponse, RpcResult};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppState;
use crate::repo::NewPayment;

pub const MAKE_PAYMENT: &str = "/rpc.payment.v1.Payment/MakePayment";
pub const MARK_INVOICE_PAID: &str = "/rpc.payment.v1.Payment/MarkInvoicePaid";
pub const PAY_INVOICE: &str = "/rpc.payment.v1.Payment/PayInvoice";

pub const PAYMENT_STATUS_PAID: &str = "PAYMENT_STATUS_PAID";

const CARD_TYPES: &[&str] = &[
    "CARD_TYPE_DEBIT",
    "CARD_TYPE_CREDIT",
    "CARD_TYPE_MASTER",
    "CARD_TYPE_REWARD",
];

/// Card type as sent on the wire: enum name or enum number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CardField {
    Number(i32),
    Name(String),
}

impl Default for CardField {
    fn default() -> Self {
        CardField::Number(0)
    }
}

impl CardField {
    pub fn as_name(&self) -> Option<&'static str> {
        match self {
            CardField::Number(n) => usize::try_from(*n)
                .ok()
                .and_then(|idx| CARD_TYPES.get(idx).copied()),
            CardField::Name(name) => CARD_TYPES
                .iter()
                .copied()
                .find(|known| *known == name.as_str()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaymentRequest {
    #[serde(alias = "CardNo")]
    pub card_no: i64,
    pub card: CardField,
    pub name: String,
    #[serde(alias = "addressLines")]
    pub address: Vec<String>,
    pub amount: f64,
}

impl PaymentRequest {
    fn is_valid(&self) -> bool {
        self.card_no != 0
            && self.amount >= 0.0
            && self.address.iter().any(|line| !line.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub status: &'static str,
}

pub async fn make_payment(state: AppState, request: RpcRequest) -> RpcResult<RpcResponse> {
    let payment: PaymentRequest = request.decode()?;

    if !payment.is_valid() {
        return Err(RpcError::new(Code::FailedPrecondition).with_message("field validation failed"));
    }
    let card_type = payment
        .card
        .as_name()
        .ok_or_else(|| RpcError::invalid_argument("unknown card type"))?;

    let address = payment
        .address
        .iter()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string();

    let payment_id = state
        .store
        .insert_payment(NewPayment {
            card_no: payment.card_no,
            card_type: card_type.to_string(),
            name: payment.name,
            address,
            amount: payment.amount,
        })
        .await?;

    info!(%payment_id, amount = payment.amount, "payment recorded");

    RpcResponse::json(&PaymentResponse {
        status: PAYMENT_STATUS_PAID,
    })
}

pub async fn mark_invoice_paid(_state: AppState, _request: RpcRequest) -> RpcResult<RpcResponse> {
    Err(RpcError::unimplemented("MarkInvoicePaid is not implemented"))
}

pub async fn pay_invoice(_state: AppState, _request: RpcRequest) -> RpcResult<RpcResponse> {
    Err(RpcError::unimplemented("PayInvoice is not implemented"))
}
