//! `conclave credits` — Grant credits and inspect balances.

use clap::Subcommand;
use conclave_quota::CreditLedger;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Subcommand)]
pub enum CreditsAction {
    /// Add purchased credits to a user's account
    Grant {
        user: String,
        amount: i64,

        #[arg(short, long, default_value = "Manual grant")]
        description: String,
    },

    /// Show a user's balance
    Balance { user: String },

    /// Show a user's most recent transactions
    History {
        user: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

pub async fn run(
    config_path: Option<&Path>,
    action: CreditsAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config.storage.resolved_path()).await?;
    let ledger = CreditLedger::new(Arc::new(store), config.billing.enabled);

    match action {
        CreditsAction::Grant {
            user,
            amount,
            description,
        } => {
            if amount <= 0 {
                return Err("amount must be positive".into());
            }
            let balance = ledger.grant(&user, amount, &description).await?;
            info!(user_id = %user, amount, balance, "Credits granted");
            println!("✅ Granted {amount} credits to {user} (balance: {balance})");
        }
        CreditsAction::Balance { user } => {
            let balance = ledger.balance(&user).await?;
            println!("{user}: {balance} credits");
        }
        CreditsAction::History { user, limit } => {
            let history = ledger.history(&user, limit).await?;
            if history.is_empty() {
                println!("No transactions for {user}");
            }
            for tx in history {
                println!(
                    "  {}  {:>8}  {:<8}  {}{}",
                    tx.created_at.format("%Y-%m-%d %H:%M:%S"),
                    format!("{:+}", tx.amount),
                    tx.kind.as_str(),
                    tx.description,
                    tx.context_id
                        .map(|id| format!(" [{id}]"))
                        .unwrap_or_default(),
                );
            }
        }
    }

    Ok(())
}
