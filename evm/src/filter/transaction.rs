use crate::model::{block::sighash, Transaction, TransactionRequest};

use super::{matches_any, ItemFilter};

impl ItemFilter<Transaction> for TransactionRequest {
    fn matches(&self, tx: &Transaction) -> bool {
        let sighash = tx.sighash.clone().or_else(|| tx.input.as_ref().and_then(sighash));

        matches_any(&self.from, tx.from.as_ref())
            && matches_any(&self.to, tx.to.as_ref())
            && matches_any(&self.sighash, sighash.as_ref())
    }
}
