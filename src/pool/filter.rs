//! Declarative pool filters and their evaluation
//!
//! Filter evaluation is a pure function from a pool definition and a
//! ticket's search fields to a boolean. A ticket matches a pool only when
//! every filter matches; there is no partial or fuzzy matching.

use crate::error::{MatchmakingError, Result};
use crate::types::SearchFields;
use serde::{Deserialize, Serialize};

/// Inclusive range filter over a numeric search argument
///
/// A ticket without the referenced argument never matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericRangeFilter {
    pub field: String,
    pub min: f64,
    pub max: f64,
}

impl NumericRangeFilter {
    pub fn new(field: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            field: field.into(),
            min,
            max,
        }
    }

    fn matches(&self, fields: &SearchFields) -> bool {
        match fields.numeric_args.get(&self.field) {
            Some(value) => *value >= self.min && *value <= self.max,
            None => false,
        }
    }
}

/// Exact-equality filter over a string search argument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringEqualsFilter {
    pub field: String,
    pub value: String,
}

impl StringEqualsFilter {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    fn matches(&self, fields: &SearchFields) -> bool {
        fields.string_args.get(&self.field) == Some(&self.value)
    }
}

/// A named filter over ticket attributes within a match profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    /// Tags that must all be present on a matching ticket
    #[serde(default)]
    pub tag_filters: Vec<String>,
    #[serde(default)]
    pub numeric_range_filters: Vec<NumericRangeFilter>,
    #[serde(default)]
    pub string_filters: Vec<StringEqualsFilter>,
}

impl Pool {
    /// Create a pool with no filters (matches every ticket)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag_filters: Vec::new(),
            numeric_range_filters: Vec::new(),
            string_filters: Vec::new(),
        }
    }

    /// Add a required tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag_filters.push(tag.into());
        self
    }

    /// Add an inclusive numeric range filter
    pub fn with_numeric_range(mut self, field: impl Into<String>, min: f64, max: f64) -> Self {
        self.numeric_range_filters
            .push(NumericRangeFilter::new(field, min, max));
        self
    }

    /// Add a string equality filter
    pub fn with_string_equals(
        mut self,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.string_filters.push(StringEqualsFilter::new(field, value));
        self
    }

    /// Check whether a ticket's search fields satisfy every filter in this pool
    pub fn matches(&self, fields: &SearchFields) -> bool {
        self.tag_filters.iter().all(|tag| fields.tags.contains(tag))
            && self
                .numeric_range_filters
                .iter()
                .all(|filter| filter.matches(fields))
            && self
                .string_filters
                .iter()
                .all(|filter| filter.matches(fields))
    }

    /// Validate that this pool definition is satisfiable by the ticket schema
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MatchmakingError::InvalidProfile {
                reason: "Pool name cannot be empty".to_string(),
            }
            .into());
        }

        for filter in &self.numeric_range_filters {
            if filter.field.trim().is_empty() {
                return Err(MatchmakingError::InvalidProfile {
                    reason: format!("Pool '{}' has a numeric filter with no field", self.name),
                }
                .into());
            }
            if filter.min > filter.max {
                return Err(MatchmakingError::InvalidProfile {
                    reason: format!(
                        "Pool '{}' filter on '{}' has min {} greater than max {}",
                        self.name, filter.field, filter.min, filter.max
                    ),
                }
                .into());
            }
        }

        for filter in &self.string_filters {
            if filter.field.trim().is_empty() {
                return Err(MatchmakingError::InvalidProfile {
                    reason: format!("Pool '{}' has a string filter with no field", self.name),
                }
                .into());
            }
        }

        if self.tag_filters.iter().any(|tag| tag.trim().is_empty()) {
            return Err(MatchmakingError::InvalidProfile {
                reason: format!("Pool '{}' has an empty tag filter", self.name),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SearchFields;
    use proptest::prelude::*;

    fn fields_with_numeric(field: &str, value: f64) -> SearchFields {
        let mut fields = SearchFields::default();
        fields.numeric_args.insert(field.to_string(), value);
        fields
    }

    #[test]
    fn test_empty_pool_matches_everything() {
        let pool = Pool::new("everyone");
        assert!(pool.matches(&SearchFields::default()));
        assert!(pool.matches(&SearchFields::with_tags(["duel"])));
    }

    #[test]
    fn test_tag_filters_require_all_tags() {
        let pool = Pool::new("ranked-duel").with_tag("duel").with_tag("ranked");

        assert!(pool.matches(&SearchFields::with_tags(["duel", "ranked", "eu"])));
        assert!(!pool.matches(&SearchFields::with_tags(["duel"])));
        assert!(!pool.matches(&SearchFields::default()));
    }

    #[test]
    fn test_numeric_range_bounds_are_inclusive() {
        let pool = Pool::new("mid-skill").with_numeric_range("skill", 10.0, 20.0);

        assert!(pool.matches(&fields_with_numeric("skill", 10.0)));
        assert!(pool.matches(&fields_with_numeric("skill", 15.0)));
        assert!(pool.matches(&fields_with_numeric("skill", 20.0)));
        assert!(!pool.matches(&fields_with_numeric("skill", 9.99)));
        assert!(!pool.matches(&fields_with_numeric("skill", 20.01)));
    }

    #[test]
    fn test_missing_numeric_arg_never_matches() {
        let pool = Pool::new("mid-skill").with_numeric_range("skill", 0.0, 100.0);
        assert!(!pool.matches(&SearchFields::default()));
        assert!(!pool.matches(&fields_with_numeric("latency", 50.0)));
    }

    #[test]
    fn test_string_filter_is_exact_equality() {
        let pool = Pool::new("eu-only").with_string_equals("region", "eu");

        let mut fields = SearchFields::default();
        fields
            .string_args
            .insert("region".to_string(), "eu".to_string());
        assert!(pool.matches(&fields));

        fields
            .string_args
            .insert("region".to_string(), "eu-west".to_string());
        assert!(!pool.matches(&fields));
    }

    #[test]
    fn test_all_filter_kinds_combine_conjunctively() {
        let pool = Pool::new("combined")
            .with_tag("duel")
            .with_numeric_range("skill", 0.0, 50.0)
            .with_string_equals("region", "eu");

        let mut fields = SearchFields::with_tags(["duel"]);
        fields.numeric_args.insert("skill".to_string(), 25.0);
        fields
            .string_args
            .insert("region".to_string(), "eu".to_string());
        assert!(pool.matches(&fields));

        // Breaking any single filter breaks the match
        fields.numeric_args.insert("skill".to_string(), 75.0);
        assert!(!pool.matches(&fields));
    }

    #[test]
    fn test_pool_validation() {
        assert!(Pool::new("ok").validate().is_ok());
        assert!(Pool::new("").validate().is_err());
        assert!(Pool::new("bad-range")
            .with_numeric_range("skill", 10.0, 5.0)
            .validate()
            .is_err());
        assert!(Pool::new("bad-field")
            .with_numeric_range("", 0.0, 1.0)
            .validate()
            .is_err());
        assert!(Pool::new("bad-tag").with_tag("").validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_numeric_filter_matches_iff_within_bounds(
            value in -1000.0f64..1000.0,
            min in -1000.0f64..1000.0,
            width in 0.0f64..500.0,
        ) {
            let max = min + width;
            let pool = Pool::new("range").with_numeric_range("x", min, max);
            let fields = fields_with_numeric("x", value);
            prop_assert_eq!(pool.matches(&fields), value >= min && value <= max);
        }

        #[test]
        fn prop_ticket_with_superset_of_tags_matches(
            required in proptest::collection::vec("[a-z]{1,8}", 0..5),
            extra in proptest::collection::vec("[a-z]{1,8}", 0..5),
        ) {
            let mut pool = Pool::new("tags");
            for tag in &required {
                pool = pool.with_tag(tag.clone());
            }
            let fields = SearchFields::with_tags(required.iter().chain(extra.iter()).cloned());
            prop_assert!(pool.matches(&fields));
        }
    }
}
