use rust_decimal::Decimal;

use super::{AccountId, Currency};

/// An authenticated, already-validated transfer request handed over by the
/// outer layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub amount: Decimal,
    pub currency: Currency,
    pub idempotency_key: String,
    /// Correlation id of the inbound request, stamped on the transaction.
    pub reference_id: String,
}
