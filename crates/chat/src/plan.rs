//! Reads the research plan out of a planner message, including while the
//! planner is still streaming it.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::json;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub has_enough_context: Option<bool>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PlanStep {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub need_web_search: Option<bool>,
    #[serde(default)]
    pub step_type: Option<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self == &Plan::default()
    }
}

/// Parses a complete plan, or recovers the fields written so far.
pub fn parse_plan(content: &str) -> Plan {
    if content.trim().is_empty() {
        return Plan::default();
    }

    match json::parse_lenient::<Plan>(content) {
        Ok(plan) => plan,
        Err(_) => parse_partial_plan(content),
    }
}

fn parse_partial_plan(content: &str) -> Plan {
    let patterns = PlanPatterns::get();

    let steps = patterns
        .steps
        .captures(content)
        .and_then(|captures| captures.get(1))
        .map(|body| parse_partial_steps(body.as_str()))
        .unwrap_or_default();

    Plan {
        locale: capture_string(&patterns.locale, content),
        has_enough_context: capture_bool(&patterns.has_enough_context, content),
        title: capture_string(&patterns.title, content),
        thought: patterns
            .thought
            .captures(content)
            .and_then(|captures| captures.get(1))
            .map(|value| unescape(value.as_str())),
        steps,
    }
}

fn parse_partial_steps(body: &str) -> Vec<PlanStep> {
    let patterns = PlanPatterns::get();

    patterns
        .step_object
        .find_iter(body)
        .filter_map(|object| {
            if let Ok(step) = serde_json::from_str::<PlanStep>(object.as_str()) {
                return Some(step);
            }
            let step = PlanStep {
                title: capture_string(&patterns.title, object.as_str()),
                description: capture_string(&patterns.description, object.as_str()),
                need_web_search: capture_bool(&patterns.need_web_search, object.as_str()),
                step_type: capture_string(&patterns.step_type, object.as_str()),
            };
            (step.title.is_some() || step.description.is_some()).then_some(step)
        })
        .collect()
}

fn capture_string(pattern: &Regex, content: &str) -> Option<String> {
    pattern
        .captures(content)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_string())
}

fn capture_bool(pattern: &Regex, content: &str) -> Option<bool> {
    pattern
        .captures(content)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str() == "true")
}

fn unescape(raw: &str) -> String {
    let mut decoded = String::with_capacity(raw.len());
    let mut characters = raw.chars();

    while let Some(character) = characters.next() {
        if character != '\\' {
            decoded.push(character);
            continue;
        }

        match characters.next() {
            Some('n') => decoded.push('\n'),
            Some('t') => decoded.push('\t'),
            Some('"') => decoded.push('"'),
            Some('\\') => decoded.push('\\'),
            Some(other) => {
                decoded.push('\\');
                decoded.push(other);
            }
            None => {}
        }
    }

    decoded
}

struct PlanPatterns {
    locale: Regex,
    has_enough_context: Regex,
    title: Regex,
    thought: Regex,
    steps: Regex,
    step_object: Regex,
    description: Regex,
    need_web_search: Regex,
    step_type: Regex,
}

impl PlanPatterns {
    fn get() -> &'static PlanPatterns {
        static PATTERNS: OnceLock<PlanPatterns> = OnceLock::new();
        PATTERNS.get_or_init(|| PlanPatterns {
            locale: Regex::new(r#""locale"\s*:\s*"([^"]*)"?"#).expect("valid regex"),
            has_enough_context: Regex::new(r#""has_enough_context"\s*:\s*(true|false)"#)
                .expect("valid regex"),
            title: Regex::new(r#""title"\s*:\s*"([^"]*)"?"#).expect("valid regex"),
            thought: Regex::new(r#"(?s)"thought"\s*:\s*"((?:[^"\\]|\\.)*)"?"#)
                .expect("valid regex"),
            steps: Regex::new(r#"(?s)"steps"\s*:\s*\[(.*?)(?:\]|$)"#).expect("valid regex"),
            step_object: Regex::new(r"\{[^}]*\}").expect("valid regex"),
            description: Regex::new(r#""description"\s*:\s*"([^"]*)"?"#).expect("valid regex"),
            need_web_search: Regex::new(r#""need_web_search"\s*:\s*(true|false)"#)
                .expect("valid regex"),
            step_type: Regex::new(r#""step_type"\s*:\s*"([^"]*)"?"#).expect("valid regex"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_plan_parses_directly() {
        let plan = parse_plan(
            r#"```json
{"locale":"en-US","has_enough_context":false,"title":"Rust adoption","thought":"Survey first.",
 "steps":[{"title":"Collect data","description":"Find surveys","need_web_search":true,"step_type":"research"}]}
```"#,
        );

        assert_eq!(plan.locale.as_deref(), Some("en-US"));
        assert_eq!(plan.has_enough_context, Some(false));
        assert_eq!(plan.title.as_deref(), Some("Rust adoption"));
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].need_web_search, Some(true));
    }

    #[test]
    fn streaming_plan_recovers_written_fields() {
        let plan = parse_plan(
            r#"{"locale":"en-US","has_enough_context":true,"thought":"Line one\nsays \"hi\"","title":"Rust adop"#,
        );

        assert_eq!(plan.locale.as_deref(), Some("en-US"));
        assert_eq!(plan.has_enough_context, Some(true));
        assert_eq!(plan.thought.as_deref(), Some("Line one\nsays \"hi\""));
        assert_eq!(plan.title.as_deref(), Some("Rust adop"));
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn streaming_plan_keeps_complete_steps_only() {
        let plan = parse_plan(
            r#"{"title":"T","steps":[{"title":"One","description":"first","need_web_search":true,"step_type":"research"},{"title":"Tw"#,
        );

        assert_eq!(plan.title.as_deref(), Some("T"));
        assert_eq!(
            plan.steps,
            vec![PlanStep {
                title: Some("One".to_string()),
                description: Some("first".to_string()),
                need_web_search: Some(true),
                step_type: Some("research".to_string()),
            }]
        );
    }

    #[test]
    fn empty_content_is_an_empty_plan() {
        assert!(parse_plan("").is_empty());
        assert!(parse_plan("   ").is_empty());
    }
}
