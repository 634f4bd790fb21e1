//! Model-output hygiene
//!
//! Strict JSON extraction (code fences happen even with response-format
//! hints) and chain-of-thought leakage detection. A response that narrates
//! its reasoning is rejected before anything reaches storage.

/// Pull the JSON object out of a raw model response, tolerating markdown
/// code fences and prose around the object.
pub fn extract_json(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty response".into());
    }

    let start = trimmed.find('{').ok_or("no JSON object in response")?;
    let end = trimmed.rfind('}').ok_or("no JSON object in response")?;
    if end <= start {
        return Err("no JSON object in response".into());
    }
    Ok(trimmed[start..=end].to_string())
}

/// Tell-tale chain-of-thought markers. Returns the matched marker so the
/// rejection reason names it.
pub fn find_cot_marker(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();

    const PHRASES: &[(&str, &str)] = &[
        ("reasoning:", "reasoning heading"),
        ("step 1:", "numbered step list"),
        ("step 2:", "numbered step list"),
        ("chain of thought", "chain-of-thought mention"),
        ("let's think", "think-aloud phrase"),
        ("let us think", "think-aloud phrase"),
        ("thinking:", "thinking heading"),
        ("my reasoning", "reasoning narration"),
    ];
    for (needle, label) in PHRASES {
        if lowered.contains(needle) {
            return Some(label);
        }
    }

    // Numbered step lists: two consecutive lines starting "1." / "2.".
    let mut saw_first = false;
    for line in lowered.lines() {
        let line = line.trim_start();
        if line.starts_with("1.") {
            saw_first = true;
        } else if saw_first && line.starts_with("2.") {
            return Some("numbered step list");
        } else if !line.is_empty() {
            saw_first = false;
        }
    }
    None
}

/// Rough sentence count: terminator runs followed by whitespace or end.
pub fn sentence_count(text: &str) -> usize {
    let mut count = 0;
    let mut in_sentence = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' | '!' | '?' => {
                if in_sentence {
                    // Decimal points ("7.5") do not end a sentence.
                    let next = chars.peek();
                    if c == '.' && next.is_some_and(|n| n.is_ascii_digit()) {
                        continue;
                    }
                    count += 1;
                    in_sentence = false;
                }
            }
            c if c.is_whitespace() => {}
            _ => in_sentence = true,
        }
    }
    if in_sentence {
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_json() {
        let raw = r#"{"cv_match_rate": 0.8, "cv_feedback": "Good."}"#;
        assert_eq!(extract_json(raw).unwrap(), raw);
    }

    #[test]
    fn extracts_fenced_json() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(raw).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn extracts_json_surrounded_by_prose() {
        let raw = "Here is the result:\n{\"a\": 1}\nHope that helps!";
        assert_eq!(extract_json(raw).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn rejects_empty_and_json_free_responses() {
        assert!(extract_json("").is_err());
        assert!(extract_json("   ").is_err());
        assert!(extract_json("no json here").is_err());
    }

    #[test]
    fn detects_reasoning_heading() {
        assert!(find_cot_marker("Reasoning: the CV mentions Go").is_some());
        assert!(find_cot_marker("reasoning:\nfirst, ...").is_some());
    }

    #[test]
    fn detects_step_lists() {
        assert!(find_cot_marker("Step 1: read the CV").is_some());
        assert!(find_cot_marker("1. Look at skills\n2. Compare to role").is_some());
    }

    #[test]
    fn detects_think_aloud() {
        assert!(find_cot_marker("Let's think about this carefully").is_some());
    }

    #[test]
    fn clean_text_passes() {
        assert!(find_cot_marker("The candidate has 5 years of Go experience.").is_none());
        // A single enumerated line is not a step list.
        assert!(find_cot_marker("1. strong backend skills").is_none());
    }

    #[test]
    fn sentence_counting() {
        assert_eq!(sentence_count("One sentence."), 1);
        assert_eq!(sentence_count("First. Second! Third?"), 3);
        assert_eq!(sentence_count("Trailing fragment without period"), 1);
        assert_eq!(sentence_count(""), 0);
        // Decimal points do not split sentences.
        assert_eq!(sentence_count("Scored 7.5 out of 10. Strong work."), 2);
    }
}
