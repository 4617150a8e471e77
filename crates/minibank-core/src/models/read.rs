use uuid::Uuid;

use super::AccountId;

pub const TRANSFER_COMPLETED: &str = "Transfer completed successfully";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfirmation {
    pub transaction_id: Uuid,
    pub sender: AccountId,
    pub receiver: AccountId,
    /// Fixed two-decimal rendering of the transferred amount.
    pub amount: String,
    pub status: &'static str,
}
