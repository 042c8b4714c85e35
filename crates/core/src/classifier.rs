//! Keyword classification: first matching rule wins.

use crate::rules::{normalize, RuleSet};
use storage::models::{Verdict, UNCLASSIFIED};

/// Returns the name of the first rule whose include terms all appear in
/// `text` and whose exclude terms do not, or [`UNCLASSIFIED`].
///
/// Rules are tried in declaration order. Overlapping rules rely on that order,
/// so a later, more specific rule never overrides an earlier match.
pub fn classify<'r>(text: &str, rules: &'r RuleSet) -> &'r str {
    if text.trim().is_empty() {
        return UNCLASSIFIED;
    }
    let text = normalize(text);
    rules
        .iter()
        .find(|rule| rule.matches(&text))
        .map(|rule| rule.name())
        .unwrap_or(UNCLASSIFIED)
}

pub fn verdict(text: &str, rules: &RuleSet) -> Verdict {
    match classify(text, rules) {
        UNCLASSIFIED => Verdict::Unclassified,
        name => Verdict::Categorized(name.to_string()),
    }
}
