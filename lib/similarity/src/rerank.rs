//! Weighted combiner
//!
//! Ranks candidate items against a target across every dimension of a
//! definition. For each pair the score is
//!
//! ```text
//! sum(weight_d * score_d) / sum(weight_d)     over applicable dimensions d
//! ```
//!
//! A dimension is applicable to a pair only when both sides hold a present,
//! non-null value the comparator accepts. Inapplicable dimensions leave both
//! the numerator and the denominator untouched.

use crate::distance::numeric;
use crate::registry::{ComparatorRegistry, DimensionContext};
use crate::schema::{DimensionSpec, SimilarityError};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use vaultlens_core::FieldValue;

/// An item to compare: its id and one value per dimension, in dimension order
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityItem {
    pub id: String,
    pub values: Vec<FieldValue>,
}

impl SimilarityItem {
    pub fn new(id: impl Into<String>, values: Vec<FieldValue>) -> Self {
        Self {
            id: id.into(),
            values,
        }
    }
}

/// A scored neighbor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub id: String,
    pub score: f64,
    /// Unweighted score per dimension; `None` where the dimension did not apply
    #[serde(skip)]
    pub dimension_scores: Vec<Option<f64>>,
}

/// Score `item` against every entry of `others` and sort by descending score.
///
/// Entries sharing the target's id are skipped. Ties keep input order.
pub fn compute_weighted_similarity(
    item: &SimilarityItem,
    others: &[SimilarityItem],
    dimensions: &[DimensionSpec],
    registry: &ComparatorRegistry,
) -> Result<Vec<RankedItem>, SimilarityError> {
    check_arity(item, dimensions.len())?;
    for other in others {
        check_arity(other, dimensions.len())?;
    }
    for dimension in dimensions {
        if !registry.contains(dimension.method.as_str()) {
            return Err(SimilarityError::UnknownMethod(dimension.method.to_string()));
        }
    }

    let contexts: Vec<DimensionContext> = (0..dimensions.len())
        .map(|d| DimensionContext {
            range: dimensions[d]
                .range
                .or_else(|| observed_range(item, others, d)),
        })
        .collect();

    let mut ranked = Vec::with_capacity(others.len());
    for other in others.iter().filter(|o| o.id != item.id) {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut dimension_scores = Vec::with_capacity(dimensions.len());

        for (d, dimension) in dimensions.iter().enumerate() {
            let score = match (item.values[d].as_present(), other.values[d].as_present()) {
                (Some(a), Some(b)) => {
                    registry.compare(dimension.method.as_str(), a, b, &contexts[d])?
                }
                _ => None,
            };
            if let Some(score) = score {
                weighted += score * dimension.weight;
                total_weight += dimension.weight;
            }
            dimension_scores.push(score);
        }

        let score = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };
        ranked.push(RankedItem {
            id: other.id.clone(),
            score,
            dimension_scores,
        });
    }

    ranked.sort_by(|a, b| OrderedFloat(b.score).cmp(&OrderedFloat(a.score)));
    Ok(ranked)
}

fn check_arity(item: &SimilarityItem, expected: usize) -> Result<(), SimilarityError> {
    if item.values.len() != expected {
        return Err(SimilarityError::DimensionMismatch {
            id: item.id.clone(),
            expected,
            actual: item.values.len(),
        });
    }
    Ok(())
}

/// max - min of the numeric values of dimension `d` across the target and
/// the candidates; `None` without at least one numeric value
fn observed_range(item: &SimilarityItem, others: &[SimilarityItem], d: usize) -> Option<f64> {
    let mut bounds: Option<(f64, f64)> = None;
    for value in std::iter::once(item).chain(others).filter_map(|i| i.values[d].as_present()) {
        if let Some(x) = numeric(value) {
            bounds = Some(match bounds {
                Some((lo, hi)) => (lo.min(x), hi.max(x)),
                None => (x, x),
            });
        }
    }
    bounds.map(|(lo, hi)| hi - lo)
}
