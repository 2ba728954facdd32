use conclave_core::council::AgentDescriptor;

const FOLLOW_UP_GUIDANCE: &str = "In this round, you should:
- Build on insights from previous rounds
- Address gaps or disagreements
- Work towards a consensus answer
- Be concise but substantive";

const OPENING_GUIDANCE: &str = "Provide your initial expert analysis from your domain perspective.";

/// System directive for `agent` in `round_number`.
///
/// Round 1 asks for an independent analysis; later rounds ask the agent to
/// reconcile with the transcript.
pub fn system_prompt(agent: &AgentDescriptor, round_number: u32, has_previous: bool) -> String {
    let review = if has_previous {
        "Review what other agents have said in previous rounds and provide insights from your unique perspective."
    } else {
        "Provide insights from your unique perspective."
    };
    let guidance = if round_number > 1 {
        FOLLOW_UP_GUIDANCE
    } else {
        OPENING_GUIDANCE
    };

    format!(
        "You are {}, a specialized AI agent with expertise in {}.\n\n\
         This is round {round_number} of a multi-agent discussion. {review}\n\n\
         {guidance}",
        agent.name, agent.specialty
    )
}
