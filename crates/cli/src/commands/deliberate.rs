//! `conclave deliberate` — Run a deliberation in-process and print each
//! round as it completes.
//!
//! Uses an in-memory store with billing off; nothing is persisted.

use conclave_config::AppConfig;
use conclave_core::council::AgentDescriptor;
use conclave_council::{AdvanceRequest, Caller, Orchestrator, SubmitRequest};
use conclave_quota::{CreditLedger, RateLimiter};
use conclave_store::InMemoryStore;
use std::path::Path;
use std::sync::Arc;

/// Parse `id:name:specialty:provider:model`. The model may contain colons.
pub fn parse_agent(spec: &str) -> Result<AgentDescriptor, String> {
    let parts: Vec<&str> = spec.splitn(5, ':').map(str::trim).collect();
    match parts.as_slice() {
        [id, name, specialty, provider, model]
            if !id.is_empty() && !name.is_empty() && !provider.is_empty() && !model.is_empty() =>
        {
            Ok(AgentDescriptor {
                id: id.to_string(),
                name: name.to_string(),
                specialty: specialty.to_string(),
                provider: provider.to_string(),
                model: model.to_string(),
            })
        }
        _ => Err(format!(
            "invalid agent '{spec}', expected id:name:specialty:provider:model"
        )),
    }
}

pub fn local_orchestrator(config: &AppConfig) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    let providers = conclave_providers::build_from_config(config)?;
    let limiter = RateLimiter::new(store.clone(), config.rate_limit.clone());
    let ledger = CreditLedger::new(store.clone(), false);
    Ok(Orchestrator::new(store, providers, limiter, ledger).with_config(config.council.clone()))
}

pub async fn run(
    config_path: Option<&Path>,
    prompt: String,
    agents: Vec<String>,
    rounds: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let agents = agents
        .iter()
        .map(|spec| parse_agent(spec))
        .collect::<Result<Vec<_>, _>>()?;

    let orchestrator = local_orchestrator(&config)?;
    let task = orchestrator
        .submit(
            &Caller::user("local"),
            SubmitRequest {
                prompt,
                agents,
                max_rounds: rounds,
                auto_advance: false,
            },
        )
        .await?;

    println!("🏛️  Deliberation {} ({} rounds)\n", task.id, task.max_rounds);

    loop {
        let outcome = orchestrator
            .advance(&task.id, AdvanceRequest::default())
            .await?;

        println!("━━ Round {} ━━", outcome.current_round);
        for response in &outcome.results {
            println!("\n▸ {}\n{}", response.agent_name, response.response.trim());
        }
        println!();

        if !outcome.should_continue {
            break;
        }
    }

    println!("✅ Deliberation complete");
    Ok(())
}
