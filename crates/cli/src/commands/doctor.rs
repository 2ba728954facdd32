//! `conclave doctor` — Diagnose configuration, storage and providers.

use conclave_core::provider::Provider;
use std::path::Path;
use std::time::{Duration, Instant};

/// Result of probing one provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeStatus {
    NotConfigured,
    Ok { latency: Duration },
    Error { message: String, latency: Duration },
}

pub async fn probe(provider: &dyn Provider) -> ProbeStatus {
    if !provider.is_configured() {
        return ProbeStatus::NotConfigured;
    }
    let started = Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(15), provider.health_check()).await;
    let latency = started.elapsed();
    match result {
        Ok(Ok(true)) => ProbeStatus::Ok { latency },
        Ok(Ok(false)) => ProbeStatus::Error {
            message: "health check rejected".into(),
            latency,
        },
        Ok(Err(e)) => ProbeStatus::Error {
            message: e.to_string(),
            latency,
        },
        Err(_) => ProbeStatus::Error {
            message: "timed out".into(),
            latency,
        },
    }
}

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Conclave Doctor — System Diagnostics");
    println!("=======================================\n");

    let mut issues = 0;

    let config = match super::load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ {e}");
            println!("\n  ⚠️  Cannot continue without a valid config.");
            return Ok(());
        }
    };

    // Auth
    if config.auth.static_tokens.is_empty() && config.auth.verify_url.is_none() {
        println!("  ⚠️  No auth.static_tokens or auth.verify_url — /v1 will reject every request");
        issues += 1;
    } else {
        println!("  ✅ Authentication configured");
    }

    // Storage
    if config.storage.backend == "memory" {
        println!("  ⚠️  In-memory storage — state is lost on restart");
    } else {
        let path = config.storage.resolved_path();
        match super::open_store(&path).await {
            Ok(_) => println!("  ✅ Database reachable: {}", path.display()),
            Err(e) => {
                println!("  ❌ {e}");
                issues += 1;
            }
        }
    }

    // Providers
    println!("\n  Providers:");
    let router = conclave_providers::build_from_config(&config)?;
    for name in router.list() {
        let Some(provider) = router.get(name) else {
            continue;
        };
        match probe(provider.as_ref()).await {
            ProbeStatus::NotConfigured => {
                println!("    ⚪ {name:<11} not configured (demo responses)");
            }
            ProbeStatus::Ok { latency } => {
                println!("    ✅ {name:<11} ok ({} ms)", latency.as_millis());
            }
            ProbeStatus::Error { message, latency } => {
                println!("    ❌ {name:<11} error after {} ms: {message}", latency.as_millis());
                issues += 1;
            }
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
