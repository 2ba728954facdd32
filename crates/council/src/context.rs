//! Transcript formatting for round prompts.
//!
//! Everything here is pure: identical rounds always render to identical
//! text, so a round's prompts are reproducible from stored state.

use conclave_core::council::{AgentResponse, DiscussionRound};
use std::fmt::Write;

/// Render rounds as `Round N:` headers followed by one `- name: text` line
/// per response, in round-then-roster order.
pub fn transcript(rounds: &[DiscussionRound]) -> String {
    let mut out = String::new();
    for round in rounds {
        let _ = writeln!(out, "Round {}:", round.round_number);
        for response in &round.agent_responses {
            let _ = writeln!(out, "{}", response_line(response));
        }
        out.push('\n');
    }
    out
}

/// The block of earlier rounds appended to the user prompt, ending with the
/// consensus instruction. Empty before the first round completes.
pub fn previous_rounds(rounds: &[DiscussionRound]) -> String {
    if rounds.is_empty() {
        return String::new();
    }

    format!(
        "\n\n=== PREVIOUS DISCUSSION ROUNDS ===\n\n{}=== END PREVIOUS ROUNDS ===\n\n\
         Based on the discussion above, provide your updated perspective. \
         Build on other agents' insights and work towards a consensus answer.\n",
        transcript(rounds)
    )
}

/// Answers already given in the round being run.
pub fn current_round(responses: &[AgentResponse]) -> String {
    if responses.is_empty() {
        return String::new();
    }

    let lines: Vec<String> = responses.iter().map(response_line).collect();
    format!(
        "\n\n=== CURRENT ROUND RESPONSES SO FAR ===\n{}\n=== END CURRENT RESPONSES ===\n\n",
        lines.join("\n")
    )
}

/// The user prompt for the next agent in a round.
pub fn user_prompt(prompt: &str, previous: &str, so_far: &[AgentResponse]) -> String {
    format!("{prompt}{previous}{}", current_round(so_far))
}

fn response_line(response: &AgentResponse) -> String {
    format!("- {}: {}", response.agent_name, response.response)
}
