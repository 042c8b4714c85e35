use crate::config::CategoryConfig;
use std::collections::HashSet;
use storage::models::{ERROR_CATEGORY, UNCLASSIFIED};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("category name must not be empty")]
    EmptyName,
    #[error("duplicate category name {0:?}")]
    DuplicateName(String),
    #[error("category name {0:?} is reserved")]
    ReservedName(String),
    #[error("category name {0:?} cannot be used as a folder name")]
    InvalidName(String),
}

/// Lower-cases text the same way rule terms are lower-cased.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRule {
    name: String,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl CategoryRule {
    pub fn new<I, E>(name: impl Into<String>, include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            name: name.into(),
            include: normalize_terms(include),
            exclude: normalize_terms(exclude),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    /// `text` must already be normalized. Exclusions are checked first since
    /// they reject most candidates early.
    pub fn matches(&self, text: &str) -> bool {
        if self.exclude.iter().any(|t| text.contains(t.as_str())) {
            return false;
        }
        self.include.iter().all(|t| text.contains(t.as_str()))
    }
}

fn normalize_terms<T>(terms: T) -> Vec<String>
where
    T: IntoIterator,
    T::Item: AsRef<str>,
{
    let mut seen = HashSet::new();
    terms
        .into_iter()
        .filter(|t| !t.as_ref().trim().is_empty())
        .map(|t| normalize(t.as_ref()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Category rules in evaluation order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CategoryRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<CategoryRule>) -> Result<Self, RuleError> {
        let mut names = HashSet::new();
        for rule in &rules {
            validate_name(rule.name())?;
            if !names.insert(rule.name().to_string()) {
                return Err(RuleError::DuplicateName(rule.name().to_string()));
            }
        }
        Ok(Self { rules })
    }

    pub fn from_config(categories: &[CategoryConfig]) -> Result<Self, RuleError> {
        Self::new(
            categories
                .iter()
                .map(|c| CategoryRule::new(c.name.clone(), &c.include, &c.exclude))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &CategoryRule> {
        self.rules.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn validate_name(name: &str) -> Result<(), RuleError> {
    if name.trim().is_empty() {
        return Err(RuleError::EmptyName);
    }
    if name == UNCLASSIFIED || name == ERROR_CATEGORY {
        return Err(RuleError::ReservedName(name.to_string()));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(RuleError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_are_lowercased_and_deduplicated() {
        let rule = CategoryRule::new("Plan", ["In-Network", "in-network", " ", "Plan 計劃"], ["DRAFT"]);
        assert_eq!(rule.include(), ["in-network", "plan 計劃"]);
        assert_eq!(rule.exclude(), ["draft"]);
    }

    #[test]
    fn empty_include_matches_anything_not_excluded() {
        let rule = CategoryRule::new("Others", Vec::<String>::new(), ["secret"]);
        assert!(rule.matches("anything at all"));
        assert!(!rule.matches("top secret memo"));
    }

    #[test]
    fn rejects_reserved_duplicate_and_path_names() {
        let rule = |n: &str| CategoryRule::new(n, ["x"], Vec::<String>::new());
        assert_eq!(
            RuleSet::new(vec![rule("A"), rule("A")]).unwrap_err(),
            RuleError::DuplicateName("A".into())
        );
        assert_eq!(
            RuleSet::new(vec![rule(UNCLASSIFIED)]).unwrap_err(),
            RuleError::ReservedName(UNCLASSIFIED.into())
        );
        assert_eq!(
            RuleSet::new(vec![rule("a/b")]).unwrap_err(),
            RuleError::InvalidName("a/b".into())
        );
        assert_eq!(RuleSet::new(vec![rule("  ")]).unwrap_err(), RuleError::EmptyName);
    }
}
