//! Analyst prompt

use crate::registry::ProviderConfig;

/// Render the prompt sent to one analyst.
///
/// The model is told who it is, what it focuses on, and that the answer must
/// be a single JSON object with `signal`, `confidence` and `reasoning`.
#[must_use]
pub fn build_analyst_prompt(provider: &ProviderConfig, query: &str) -> String {
    format!(
        r#"You are {name}, a {role} AI analyst for a crypto trading vault.

YOUR ROLE: {description}

USER QUERY: "{query}"

Analyze this query from your specialized perspective and provide a trading signal.

Respond with ONLY a JSON object in this exact format:
{{"signal": "BUY" | "SELL" | "HOLD", "confidence": <integer 0-100>, "reasoning": "<2-3 sentences explaining your analysis>"}}

Do not include any text outside the JSON object."#,
        name = provider.name,
        role = provider.role,
        description = provider.role_description,
        query = query.trim(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_providers;

    #[test]
    fn test_prompt_mentions_identity_and_query() {
        let providers = default_providers();
        let gemini = providers.iter().find(|p| p.id == "gemini").unwrap();

        let prompt = build_analyst_prompt(gemini, "  Should I rotate into ETH?  ");
        assert!(prompt.starts_with("You are Gemini, a Risk Manager AI analyst"));
        assert!(prompt.contains("stop-loss"));
        assert!(prompt.contains("USER QUERY: \"Should I rotate into ETH?\""));
        assert!(prompt.contains(r#"{"signal": "BUY" | "SELL" | "HOLD""#));
    }
}
