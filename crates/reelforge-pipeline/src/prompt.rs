//! Mutation prompt construction.

/// Transcript characters forwarded to the model.
pub const MAX_TRANSCRIPT_CHARS: usize = 15_000;

pub const SYSTEM_PROMPT: &str = "You rewrite short-form video concepts. Reply with a single JSON object and nothing else.";

/// Prompt asking for a mutation plan of `title` / `transcript`.
pub fn mutation_prompt(title: &str, transcript: &str) -> String {
    let transcript: String = transcript.chars().take(MAX_TRANSCRIPT_CHARS).collect();
    format!(
        r#"Analyze this viral video and produce a "Mutation Plan":
Title: {title}
Transcript: {transcript}

Output JSON:
{{
  "emotion_core": "Analysis of hook",
  "hook_script": "First 5s",
  "full_script": "MP4 script (suitable for TTS)",
  "ab_titles": ["Title 1", "Title 2", "Title 3", "Title 4", "Title 5"],
  "thumbnail_prompts": ["Prompt 1", "Prompt 2", "Prompt 3"]
}}
Replace every example value with real content."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_is_truncated() {
        let long = "a".repeat(MAX_TRANSCRIPT_CHARS + 500);
        let prompt = mutation_prompt("Host", &long);
        assert!(prompt.contains("Title: Host"));
        assert!(prompt.contains(&"a".repeat(MAX_TRANSCRIPT_CHARS)));
        assert!(!prompt.contains(&"a".repeat(MAX_TRANSCRIPT_CHARS + 1)));
        assert!(prompt.contains("\"ab_titles\""));
    }
}
