//! Prompt construction for experts and the quality assessor.

use super::types::{ContextEntry, DebateRound, ExpertProfile, Opinion};

/// Reply format every expert is asked to follow.
pub const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object:
{
  "recommendation": "<one-sentence recommendation>",
  "reasoning": "<why, referencing the question>",
  "confidence": <number between 0 and 1>,
  "pros": ["..."],
  "cons": ["..."]
}"#;

/// System prompt establishing the expert persona.
pub fn expert_system_prompt(expert: &ExpertProfile) -> String {
    format!(
        "You are {name}, a panel expert in {tags}. {description}\n\
         You take part in a structured multi-round debate with other experts. \
         State a concrete recommendation, argue from your expertise, and revise \
         your position only when the other experts' arguments convince you.\n\n\
         {format}",
        name = expert.name,
        tags = expert.expertise.join(", "),
        description = expert.description,
        format = RESPONSE_FORMAT,
    )
}

/// Inputs for one expert's user prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub question: &'a str,
    pub domain_context: Option<&'a str>,
    pub round_number: u32,
    pub max_rounds: u32,
    pub previous_round: Option<&'a DebateRound>,
    pub additional_context: &'a [ContextEntry],
}

/// User prompt for one expert in one round.
pub fn expert_user_prompt(ctx: &PromptContext<'_>, request_dissent: bool) -> String {
    let mut prompt = format!(
        "Decision question: {}\n\nRound {} of {}.\n",
        ctx.question, ctx.round_number, ctx.max_rounds
    );

    if let Some(domain) = ctx.domain_context {
        prompt.push_str(&format!("\nBackground:\n{}\n", domain));
    }

    if !ctx.additional_context.is_empty() {
        prompt.push_str("\nAdditional context provided during the debate:\n");
        for entry in ctx.additional_context {
            prompt.push_str(&format!("- [{}] {}\n", entry.injected_by, entry.text));
        }
    }

    match ctx.previous_round {
        Some(round) => {
            prompt.push('\n');
            prompt.push_str(&round.summarize());
            prompt.push_str(
                "\nConsider the positions above. Keep or change your recommendation and explain why.\n",
            );
        }
        None => prompt.push_str("\nGive your initial recommendation.\n"),
    }

    if request_dissent {
        prompt.push_str(
            "\nThe panel is converging quickly. Argue the strongest case AGAINST the \
             leading option, even if you currently agree with it.\n",
        );
    }

    prompt
}

/// Clarifying context injected by the moderator when the debate drifts.
pub fn clarification_prompt(question: &str, leading: Option<&str>) -> String {
    match leading {
        Some(option) => format!(
            "Moderator: agreement is slipping. Re-read the question (\"{}\") and address \
             directly whether \"{}\" answers it, naming the single deciding factor.",
            question, option
        ),
        None => format!(
            "Moderator: focus on the question (\"{}\") and name the single deciding factor \
             for your recommendation.",
            question
        ),
    }
}

/// Prompt asking an auxiliary model to score a round.
pub fn quality_assessment_prompt(question: &str, opinions: &[Opinion]) -> String {
    let mut prompt = format!(
        "Assess the quality of this expert debate round.\nQuestion: {}\n\nOpinions:\n",
        question
    );
    for opinion in opinions {
        prompt.push_str(&format!(
            "- {}: {} | {}\n",
            opinion.expert_id, opinion.recommendation, opinion.reasoning
        ));
    }
    prompt.push_str(
        "\nReturn JSON: {\"coherence\": <0-1>, \"relevance\": <0-1>} where coherence rates \
         how well-reasoned the arguments are and relevance how directly they address the question.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{AiConfig, ProviderKind};
    use chrono::Utc;

    fn expert() -> ExpertProfile {
        ExpertProfile::new(
            "security",
            "Security Architect",
            vec!["security".into(), "risk".into()],
            "Focuses on threat models.",
            AiConfig::new(ProviderKind::OpenRouter, "m"),
        )
    }

    #[test]
    fn test_system_prompt_mentions_persona() {
        let prompt = expert_system_prompt(&expert());
        assert!(prompt.contains("Security Architect"));
        assert!(prompt.contains("security, risk"));
        assert!(prompt.contains("\"recommendation\""));
    }

    #[test]
    fn test_user_prompt_includes_context_and_dissent() {
        let entries = vec![ContextEntry {
            text: "Budget is capped at $50k".to_string(),
            injected_at: Utc::now(),
            injected_by: "user".to_string(),
            applies_to_round: 2,
        }];
        let ctx = PromptContext {
            question: "Build or buy?",
            domain_context: Some("Series A startup"),
            round_number: 2,
            max_rounds: 3,
            previous_round: None,
            additional_context: &entries,
        };

        let prompt = expert_user_prompt(&ctx, true);
        assert!(prompt.contains("Build or buy?"));
        assert!(prompt.contains("Series A startup"));
        assert!(prompt.contains("[user] Budget is capped at $50k"));
        assert!(prompt.contains("AGAINST"));

        let plain = expert_user_prompt(&ctx, false);
        assert!(!plain.contains("AGAINST"));
    }
}
