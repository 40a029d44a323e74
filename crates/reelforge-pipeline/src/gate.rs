//! Structural validation of generated mutation plans.

use reelforge_core::config::QualityGateConfig;
use reelforge_core::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A validated mutation plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationPlan {
    pub emotion_core: String,
    pub hook_script: String,
    pub full_script: String,
    pub ab_titles: Vec<String>,
    pub thumbnail_prompts: Vec<String>,
}

/// Example values from the output schema in the prompt. A model that
/// echoes them back has not done the work.
const SCHEMA_ECHOES: &[&str] = &[
    "analysis of hook",
    "first 5s",
    "mp4 script (suitable for tts)",
    "mp4 script",
];

const FILLER: &[&str] = &["...", "…", "n/a", "tbd", "todo", "placeholder", "null", "undefined"];

/// Whether `text` is placeholder or schema-echo text rather than content.
pub fn is_placeholder(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    if t.is_empty() || SCHEMA_ECHOES.contains(&t.as_str()) || FILLER.contains(&t.as_str()) {
        return true;
    }
    if t.contains("lorem ipsum") || (t.contains("{{") && t.contains("}}")) {
        return true;
    }
    // "Title 3", "Prompt 1"
    for prefix in ["title ", "prompt "] {
        if let Some(rest) = t.strip_prefix(prefix) {
            if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
                return true;
            }
        }
    }
    false
}

pub struct QualityGate {
    config: QualityGateConfig,
}

impl QualityGate {
    pub fn new(config: QualityGateConfig) -> Self {
        Self { config }
    }

    /// Accept or reject a raw plan. Rejections are [`ForgeError::Validation`].
    pub fn validate(&self, raw: &Value) -> Result<MutationPlan> {
        let obj = raw
            .as_object()
            .ok_or_else(|| reject("plan is not a JSON object".into()))?;

        let text = |field: &str| -> Result<String> {
            match obj.get(field) {
                Some(Value::String(s)) => Ok(s.trim().to_string()),
                Some(_) => Err(reject(format!("field '{field}' is not a string"))),
                None => Err(reject(format!("missing field '{field}'"))),
            }
        };
        let list = |field: &str| -> Result<Vec<String>> {
            let items = obj
                .get(field)
                .ok_or_else(|| reject(format!("missing field '{field}'")))?
                .as_array()
                .ok_or_else(|| reject(format!("field '{field}' is not a list")))?;
            items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(|s| s.trim().to_string())
                        .ok_or_else(|| reject(format!("field '{field}' holds a non-string")))
                })
                .collect()
        };

        let plan = MutationPlan {
            emotion_core: text("emotion_core")?,
            hook_script: text("hook_script")?,
            full_script: text("full_script")?,
            ab_titles: list("ab_titles")?,
            thumbnail_prompts: list("thumbnail_prompts")?,
        };
        self.check_bounds(&plan)?;
        Ok(plan)
    }

    fn check_bounds(&self, plan: &MutationPlan) -> Result<()> {
        let c = &self.config;
        for (field, value) in [
            ("emotion_core", &plan.emotion_core),
            ("hook_script", &plan.hook_script),
            ("full_script", &plan.full_script),
        ] {
            if is_placeholder(value) {
                return Err(reject(format!("field '{field}' is placeholder text")));
            }
        }

        let script_len = plan.full_script.chars().count();
        if script_len < c.min_script_chars || script_len > c.max_script_chars {
            return Err(reject(format!(
                "full_script has {script_len} chars, expected {}..={}",
                c.min_script_chars, c.max_script_chars
            )));
        }
        if plan.hook_script.chars().count() > c.max_hook_chars {
            return Err(reject(format!("hook_script exceeds {} chars", c.max_hook_chars)));
        }

        let titles = plan.ab_titles.len();
        if titles < c.min_titles || titles > c.max_titles {
            return Err(reject(format!(
                "ab_titles has {titles} entries, expected {}..={}",
                c.min_titles, c.max_titles
            )));
        }
        for title in &plan.ab_titles {
            if is_placeholder(title) {
                return Err(reject(format!("title '{title}' is placeholder text")));
            }
            if title.chars().count() > c.max_title_chars {
                return Err(reject(format!("title exceeds {} chars", c.max_title_chars)));
            }
        }
        if plan.thumbnail_prompts.iter().any(|p| is_placeholder(p)) {
            return Err(reject("thumbnail_prompts contain placeholder text".into()));
        }
        Ok(())
    }
}

fn reject(reason: String) -> ForgeError {
    ForgeError::Validation(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn script() -> String {
        "Nobody tells you this about cold brew. ".repeat(4)
    }

    fn valid() -> Value {
        json!({
            "emotion_core": "Curiosity gap around a kitchen shortcut",
            "hook_script": "Stop making coffee like this.",
            "full_script": script(),
            "ab_titles": ["The cold brew trick baristas hide", "Why your coffee tastes flat"],
            "thumbnail_prompts": ["Close-up of a mason jar of coffee"]
        })
    }

    fn gate() -> QualityGate {
        QualityGate::new(QualityGateConfig::default())
    }

    #[test]
    fn test_accepts_valid_plan() {
        let plan = gate().validate(&valid()).unwrap();
        assert_eq!(plan.ab_titles.len(), 2);
        assert_eq!(plan.ab_titles[0], "The cold brew trick baristas hide");
    }

    #[test]
    fn test_rejects_missing_field() {
        let mut raw = valid();
        raw.as_object_mut().unwrap().remove("full_script");
        let err = gate().validate(&raw).unwrap_err();
        assert!(matches!(err, ForgeError::Validation(m) if m.contains("full_script")));
    }

    #[test]
    fn test_rejects_schema_echo() {
        let mut raw = valid();
        raw["emotion_core"] = json!("Analysis of hook");
        assert!(gate().validate(&raw).is_err());

        let mut raw = valid();
        raw["ab_titles"] = json!(["Title 1", "Title 2"]);
        assert!(gate().validate(&raw).is_err());
    }

    #[test]
    fn test_rejects_out_of_bounds() {
        let mut raw = valid();
        raw["full_script"] = json!("too short");
        assert!(gate().validate(&raw).is_err());

        let mut raw = valid();
        raw["ab_titles"] = json!([]);
        assert!(gate().validate(&raw).is_err());

        let mut raw = valid();
        raw["ab_titles"] = json!(["x".repeat(101)]);
        assert!(gate().validate(&raw).is_err());
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder("  Prompt 3 "));
        assert!(is_placeholder("{{title}}"));
        assert!(is_placeholder("..."));
        assert!(!is_placeholder("Title fight recap"));
        assert!(!is_placeholder("Prompt engineering in 60 seconds"));
    }
}
