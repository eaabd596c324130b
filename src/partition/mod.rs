//! Deterministic planning of the crawl space into work units.
//!
//! Two strategies: contiguous identifier ranges, and filtered search
//! predicates for catalogs that cap results per query. Re-planning with the
//! same inputs reproduces identical boundaries, so a crash during planning
//! cannot introduce gaps or overlaps.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::warn;

use crate::error::MagpieError;

/// A bounded, independently processable slice of the crawl space.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum UnitSpec {
    IdRange { lo: u64, hi: u64 },
    Query { predicate: String },
}

impl UnitSpec {
    /// Search string sent to the remote API for this unit.
    pub fn to_query(&self) -> String {
        match self {
            UnitSpec::IdRange { lo, hi } => format!("id:{lo}..{hi}"),
            UnitSpec::Query { predicate } => predicate.clone(),
        }
    }
}

impl fmt::Display for UnitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

/// A star-count search predicate, optionally narrowed by language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPredicate {
    pub star_lo: u64,
    /// Upper bound inclusive; `None` is open-ended (`stars:>=lo`).
    pub star_hi: Option<u64>,
    pub language: Option<String>,
}

impl QueryPredicate {
    pub fn stars(lo: u64, hi: u64) -> Self {
        Self {
            star_lo: lo,
            star_hi: Some(hi),
            language: None,
        }
    }

    pub fn stars_at_least(lo: u64) -> Self {
        Self {
            star_lo: lo,
            star_hi: None,
            language: None,
        }
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    /// Splits into strictly narrower predicates, or `None` when already
    /// minimal. Star ranges split at the midpoint; a single-star bucket
    /// without a language narrows per language.
    fn split(&self, languages: &[String]) -> Option<Vec<QueryPredicate>> {
        match self.star_hi {
            Some(hi) if hi > self.star_lo => {
                let mid = self.star_lo + (hi - self.star_lo) / 2;
                Some(vec![
                    QueryPredicate {
                        star_lo: self.star_lo,
                        star_hi: Some(mid),
                        language: self.language.clone(),
                    },
                    QueryPredicate {
                        star_lo: mid + 1,
                        star_hi: Some(hi),
                        language: self.language.clone(),
                    },
                ])
            }
            // Open-ended ranges close at twice the lower bound.
            None => Some(vec![
                QueryPredicate {
                    star_lo: self.star_lo,
                    star_hi: Some(self.star_lo.saturating_mul(2)),
                    language: self.language.clone(),
                },
                QueryPredicate {
                    star_lo: self.star_lo.saturating_mul(2) + 1,
                    star_hi: None,
                    language: self.language.clone(),
                },
            ]),
            Some(_) if self.language.is_none() && !languages.is_empty() => Some(
                languages
                    .iter()
                    .map(|lang| QueryPredicate {
                        star_lo: self.star_lo,
                        star_hi: self.star_hi,
                        language: Some(lang.clone()),
                    })
                    .collect(),
            ),
            Some(_) => None,
        }
    }
}

impl fmt::Display for QueryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.star_hi {
            Some(hi) => write!(f, "stars:{}..{}", self.star_lo, hi)?,
            None => write!(f, "stars:>={}", self.star_lo)?,
        }
        if let Some(language) = &self.language {
            write!(f, " language:{language}")?;
        }
        Ok(())
    }
}

/// Estimates the true result count of a predicate, typically with a
/// count-only remote query. Injected so planning is testable offline.
#[async_trait::async_trait]
pub trait ResultEstimator: Send + Sync {
    async fn estimate(&self, predicate: &QueryPredicate) -> Result<u64, MagpieError>;
}

/// Partitions `[lo, hi]` (inclusive) into contiguous units of at most
/// `unit_size` identifiers: disjoint, covering, in ascending order.
pub fn plan_id_ranges(lo: u64, hi: u64, unit_size: u64) -> Result<Vec<UnitSpec>, MagpieError> {
    if lo > hi {
        return Err(MagpieError::UnexpectedError(format!(
            "invalid id range [{lo}, {hi}]"
        )));
    }
    if unit_size == 0 {
        return Err(MagpieError::UnexpectedError(
            "unit_size must be at least 1".to_string(),
        ));
    }

    let mut units = Vec::new();
    let mut cursor = lo;
    while cursor <= hi {
        let end = cursor.saturating_add(unit_size - 1).min(hi);
        units.push(UnitSpec::IdRange { lo: cursor, hi: end });
        if end == u64::MAX {
            break;
        }
        cursor = end + 1;
    }
    Ok(units)
}

/// Expands seed predicates into units whose estimated result counts fit
/// under the remote API's per-query cap, recursively splitting any that do
/// not. A minimal predicate that still exceeds the cap is emitted with a
/// warning; the records beyond the cap are unreachable through this API.
pub async fn plan_queries(
    seeds: Vec<QueryPredicate>,
    estimator: &dyn ResultEstimator,
    cap: u64,
    languages: &[String],
) -> Result<Vec<UnitSpec>, MagpieError> {
    let mut units = Vec::new();
    let mut work: VecDeque<QueryPredicate> = seeds.into();

    while let Some(predicate) = work.pop_front() {
        let estimate = estimator.estimate(&predicate).await?;
        if estimate <= cap {
            units.push(UnitSpec::Query {
                predicate: predicate.to_string(),
            });
            continue;
        }

        match predicate.split(languages) {
            Some(parts) => {
                for part in parts.into_iter().rev() {
                    work.push_front(part);
                }
            }
            None => {
                warn!(
                    predicate = %predicate,
                    estimate,
                    cap,
                    "Minimal predicate still exceeds the result cap; emitting truncated unit"
                );
                units.push(UnitSpec::Query {
                    predicate: predicate.to_string(),
                });
            }
        }
    }

    Ok(units)
}

/// Seed predicates covering the catalog by descending popularity, after the
/// usual shape of capped-search harvesting: coarse buckets for rare
/// high-star records, language-narrowed buckets for the long tail.
pub fn default_seeds(languages: &[String]) -> Vec<QueryPredicate> {
    let mut seeds = vec![QueryPredicate::stars_at_least(10_000)];
    for (lo, hi) in [
        (5000, 9999),
        (2500, 4999),
        (1000, 2499),
        (500, 999),
        (250, 499),
        (100, 249),
        (50, 99),
        (25, 49),
    ] {
        seeds.push(QueryPredicate::stars(lo, hi));
    }

    for language in languages {
        for (lo, hi) in [(10, 24), (5, 9), (2, 4), (1, 1)] {
            seeds.push(QueryPredicate::stars(lo, hi).with_language(language));
        }
    }
    seeds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_ids_with_unit_size_five_yield_two_exact_units() {
        let units = plan_id_ranges(1, 10, 5).unwrap();
        assert_eq!(
            units,
            vec![
                UnitSpec::IdRange { lo: 1, hi: 5 },
                UnitSpec::IdRange { lo: 6, hi: 10 },
            ]
        );
    }

    #[test]
    fn trailing_partial_unit_covers_the_remainder() {
        let units = plan_id_ranges(1, 10, 4).unwrap();
        assert_eq!(
            units,
            vec![
                UnitSpec::IdRange { lo: 1, hi: 4 },
                UnitSpec::IdRange { lo: 5, hi: 8 },
                UnitSpec::IdRange { lo: 9, hi: 10 },
            ]
        );
    }

    #[test]
    fn range_units_have_no_gaps_or_overlaps() {
        let units = plan_id_ranges(7, 1000, 13).unwrap();
        let mut expected_lo = 7;
        for unit in &units {
            let UnitSpec::IdRange { lo, hi } = unit else {
                panic!("range planning must emit ranges");
            };
            assert_eq!(*lo, expected_lo);
            assert!(hi >= lo);
            expected_lo = hi + 1;
        }
        assert_eq!(expected_lo, 1001);
    }

    #[test]
    fn replanning_is_deterministic() {
        assert_eq!(
            plan_id_ranges(1, 999_983, 1000).unwrap(),
            plan_id_ranges(1, 999_983, 1000).unwrap()
        );
    }

    /// Width-proportional fake: wide star ranges look big, language
    /// narrowing divides by the configured factor.
    struct WidthEstimator {
        per_star: u64,
        language_factor: u64,
    }

    #[async_trait::async_trait]
    impl ResultEstimator for WidthEstimator {
        async fn estimate(&self, predicate: &QueryPredicate) -> Result<u64, MagpieError> {
            let width = match predicate.star_hi {
                Some(hi) => hi - predicate.star_lo + 1,
                None => 100,
            };
            let mut estimate = width * self.per_star;
            if predicate.language.is_some() {
                estimate /= self.language_factor;
            }
            Ok(estimate)
        }
    }

    #[tokio::test]
    async fn oversized_predicates_are_split_under_the_cap() {
        let estimator = WidthEstimator {
            per_star: 100,
            language_factor: 10,
        };
        let seeds = vec![QueryPredicate::stars(1, 64)];
        let languages = vec!["rust".to_string()];

        let units = plan_queries(seeds, &estimator, 1000, &languages)
            .await
            .unwrap();
        assert!(units.len() > 1, "a 6400-record bucket must split");

        for unit in &units {
            let UnitSpec::Query { predicate } = unit else {
                panic!("query planning must emit queries");
            };
            assert!(predicate.starts_with("stars:"), "got {predicate}");
        }
    }

    #[tokio::test]
    async fn single_star_bucket_narrows_by_language() {
        let estimator = WidthEstimator {
            per_star: 5000,
            language_factor: 10,
        };
        let seeds = vec![QueryPredicate::stars(1, 1)];
        let languages = vec!["rust".to_string(), "go".to_string()];

        let units = plan_queries(seeds, &estimator, 1000, &languages)
            .await
            .unwrap();
        assert_eq!(
            units,
            vec![
                UnitSpec::Query {
                    predicate: "stars:1..1 language:rust".to_string()
                },
                UnitSpec::Query {
                    predicate: "stars:1..1 language:go".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn query_planning_is_deterministic() {
        let estimator = WidthEstimator {
            per_star: 333,
            language_factor: 7,
        };
        let languages = vec!["rust".to_string(), "go".to_string()];

        let first = plan_queries(
            default_seeds(&languages),
            &estimator,
            1000,
            &languages,
        )
        .await
        .unwrap();
        let second = plan_queries(
            default_seeds(&languages),
            &estimator,
            1000,
            &languages,
        )
        .await
        .unwrap();
        assert_eq!(first, second);
    }
}
