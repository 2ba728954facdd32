//! Model alias tables.
//!
//! Callers may name models by short alias; each backend is sent the
//! canonical versioned id. Names missing from a table pass through
//! unchanged so newly released models work without a code change.

const ANTHROPIC_ALIASES: &[(&str, &str)] = &[
    ("claude-3-5-sonnet", "claude-3-5-sonnet-20240620"),
    ("claude-3-5-haiku", "claude-3-5-haiku-20241022"),
    ("claude-3-opus", "claude-3-opus-20240229"),
    ("claude-3-sonnet", "claude-3-sonnet-20240229"),
    ("claude-3-haiku", "claude-3-haiku-20240307"),
];

const OPENAI_ALIASES: &[(&str, &str)] = &[
    ("gpt-4-turbo", "gpt-4-turbo-2024-04-09"),
    ("gpt-4o", "gpt-4o-2024-08-06"),
    ("gpt-4o-mini", "gpt-4o-mini-2024-07-18"),
];

const GOOGLE_ALIASES: &[(&str, &str)] = &[
    ("gemini-pro", "gemini-1.0-pro"),
    ("gemini-1.5-pro", "gemini-1.5-pro-002"),
    ("gemini-1.5-flash", "gemini-1.5-flash-002"),
];

/// Map a model name to the canonical id for `provider`.
pub fn resolve_model(provider: &str, model: &str) -> String {
    let table = match provider {
        "anthropic" => {
            // Already dated
            if model.contains("-2024") || model.contains("-2025") {
                return model.to_string();
            }
            ANTHROPIC_ALIASES
        }
        "openai" => OPENAI_ALIASES,
        "google" => GOOGLE_ALIASES,
        // OpenRouter ids are namespaced ("vendor/model") and sent as-is
        _ => return model.to_string(),
    };

    table
        .iter()
        .find(|(alias, _)| *alias == model)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| model.to_string())
}
