use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{Domain, DomainAssessments, Rating};

/// Rating tally for a single domain of a single session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DomainScore {
    /// Weighted score in percent, one decimal.
    pub score: f64,
    pub good: u32,
    pub average: u32,
    pub no_improvement: u32,
    pub total: u32,
}

impl DomainScore {
    pub fn is_rated(&self) -> bool {
        self.total > 0
    }
}

/// Weighted score over the given ratings: good=3, average=2, no_improvement=1,
/// normalised against an all-good session.
pub fn domain_score<I>(ratings: I) -> DomainScore
where
    I: IntoIterator<Item = Rating>,
{
    let mut tally = DomainScore::default();
    for rating in ratings {
        match rating {
            Rating::Good => tally.good += 1,
            Rating::Average => tally.average += 1,
            Rating::NoImprovement => tally.no_improvement += 1,
        }
        tally.total += 1;
    }

    if tally.total == 0 {
        return tally;
    }

    let weighted = tally.good * Rating::Good.weight()
        + tally.average * Rating::Average.weight()
        + tally.no_improvement * Rating::NoImprovement.weight();
    let max = tally.total * Rating::Good.weight();
    tally.score = round_one(f64::from(weighted) / f64::from(max) * 100.0);
    tally
}

/// Session view scores keyed by [`Domain::short_key`]. Unrated domains are
/// left out.
pub fn session_domain_scores(assessments: &DomainAssessments) -> BTreeMap<&'static str, u32> {
    Domain::ALL
        .iter()
        .filter_map(|&domain| {
            let ratings = assessments.ratings(domain);
            if ratings.is_empty() {
                return None;
            }
            let sum: u32 = ratings.iter().map(|rating| rating.percentage()).sum();
            let mean = f64::from(sum) / ratings.len() as f64;
            Some((domain.short_key(), mean.round() as u32))
        })
        .collect()
}

/// Mean of `values` rounded to one decimal, `0.0` when empty.
pub fn mean_one(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    round_one(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn round_one(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
