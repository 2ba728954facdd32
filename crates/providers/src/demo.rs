//! Placeholder responses for unconfigured backends.
//!
//! Without a credential an adapter still answers, deterministically, so a
//! deliberation can run end to end in demo mode.

use conclave_core::provider::{Completion, CompletionRequest, Usage};

/// The fixed placeholder text for a backend's display name.
pub fn placeholder_text(display_name: &str) -> String {
    format!(
        "[Demo Mode] {display_name} API key not configured. This is a simulated response."
    )
}

/// A complete placeholder response for `request`.
pub fn placeholder_completion(display_name: &str, request: &CompletionRequest) -> Completion {
    let text = placeholder_text(display_name);
    let completion_tokens = text.split_whitespace().count() as u32;
    Completion {
        text,
        usage: Some(Usage::new(0, completion_tokens)),
        model: request.model.clone(),
        finish_reason: Some("stop".into()),
    }
}

/// Answer for an agent whose provider key has no adapter at all.
pub fn simulated_agent_response(agent_name: &str, specialty: &str) -> String {
    format!(
        "[Simulated response from {agent_name}]: As a {specialty} expert, I would analyze this \
         from the perspective of my domain. This is a placeholder response - in production, \
         this would be a real AI-generated analysis."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_deterministic() {
        assert_eq!(
            placeholder_text("Anthropic"),
            "[Demo Mode] Anthropic API key not configured. This is a simulated response."
        );
        let req = CompletionRequest::single_turn("m", "s", "u");
        let a = placeholder_completion("OpenAI", &req);
        let b = placeholder_completion("OpenAI", &req);
        assert_eq!(a.text, b.text);
        assert_eq!(a.usage, b.usage);
    }

    #[test]
    fn simulated_response_names_agent_and_specialty() {
        let text = simulated_agent_response("Ada", "cryptography");
        assert!(text.starts_with("[Simulated response from Ada]: As a cryptography expert"));
        assert!(text.contains("placeholder response - in production"));
    }
}
