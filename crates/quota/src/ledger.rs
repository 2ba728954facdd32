//! Credit ledger: atomic balance checks, debits and compensating refunds.

use conclave_core::error::{QuotaError, StoreError};
use conclave_core::ledger::{CreditTransaction, DebitOutcome};
use conclave_core::store::CreditStore;
use std::sync::Arc;
use tracing::{info, warn};

/// A completed debit, kept so it can be refunded exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub user_id: String,
    /// Zero when billing is disabled
    pub amount: i64,
    pub new_balance: i64,
}

#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn CreditStore>,
    enabled: bool,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn CreditStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Debit `amount` if the balance covers it, in one atomic step.
    ///
    /// On shortfall nothing is mutated and `InsufficientCredits` carries
    /// the balance seen.
    pub async fn check_and_debit(
        &self,
        user_id: &str,
        amount: i64,
        context_id: Option<&str>,
        description: &str,
    ) -> Result<Charge, QuotaError> {
        if !self.enabled || amount == 0 {
            return Ok(Charge {
                user_id: user_id.to_string(),
                amount: 0,
                new_balance: self.store.balance(user_id).await?,
            });
        }

        match self
            .store
            .debit(user_id, amount, context_id, description)
            .await?
        {
            DebitOutcome::Debited { new_balance } => {
                info!(user_id, amount, new_balance, "Credits debited");
                Ok(Charge {
                    user_id: user_id.to_string(),
                    amount,
                    new_balance,
                })
            }
            DebitOutcome::Insufficient { balance, required } => {
                warn!(user_id, balance, required, "Insufficient credits");
                Err(QuotaError::InsufficientCredits { balance, required })
            }
        }
    }

    /// Reverse a charge whose work never happened.
    pub async fn refund(
        &self,
        charge: &Charge,
        context_id: Option<&str>,
        reason: &str,
    ) -> Result<i64, StoreError> {
        if charge.amount == 0 {
            return self.store.balance(&charge.user_id).await;
        }
        let balance = self
            .store
            .refund(&charge.user_id, charge.amount, context_id, reason)
            .await?;
        info!(user_id = %charge.user_id, amount = charge.amount, balance, "Credits refunded");
        Ok(balance)
    }

    /// Apply a purchase. This is the effect of the external billing hook.
    pub async fn grant(&self, user_id: &str, amount: i64, description: &str) -> Result<i64, StoreError> {
        self.store.grant(user_id, amount, description).await
    }

    pub async fn balance(&self, user_id: &str) -> Result<i64, StoreError> {
        self.store.balance(user_id).await
    }

    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<CreditTransaction>, StoreError> {
        self.store.transactions(user_id, limit).await
    }
}
