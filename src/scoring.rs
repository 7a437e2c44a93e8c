use std::collections::HashMap;

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{CriteriaScores, RatingRecord, TechnicianScore};

#[derive(Default)]
struct Accumulator {
    name: String,
    weighted_sum: f64,
    weight_total: f64,
    rating_sum: f64,
    count: usize,
    detailed: usize,
    criteria_sum: CriteriaScores,
}

/// Ranks technicians by recency-weighted average rating, best first.
pub fn score_ratings(ratings: &[RatingRecord], since_days: i64) -> Vec<TechnicianScore> {
    let today = Utc::now().date_naive();
    let cutoff = cutoff_date(since_days);
    let mut scores: HashMap<Uuid, Accumulator> = HashMap::new();

    for rating in ratings.iter() {
        if rating.rated_on < cutoff {
            continue;
        }

        let days_ago = (today - rating.rated_on).num_days();
        let weight = recency_weight(days_ago);
        let entry = scores.entry(rating.technician_id).or_insert_with(|| Accumulator {
            name: rating.technician_name.clone(),
            ..Accumulator::default()
        });

        entry.weighted_sum += rating.rating * weight;
        entry.weight_total += weight;
        entry.rating_sum += rating.rating;
        entry.count += 1;

        if let Some(criteria) = rating.criteria {
            entry.detailed += 1;
            entry.criteria_sum.punctuality += criteria.punctuality;
            entry.criteria_sum.quality += criteria.quality;
            entry.criteria_sum.behavior += criteria.behavior;
            entry.criteria_sum.cleanliness += criteria.cleanliness;
            entry.criteria_sum.communication += criteria.communication;
        }
    }

    let mut values: Vec<TechnicianScore> = scores
        .into_iter()
        .map(|(technician_id, acc)| {
            let criteria = (acc.detailed > 0).then(|| {
                let n = acc.detailed as f64;
                CriteriaScores {
                    punctuality: acc.criteria_sum.punctuality / n,
                    quality: acc.criteria_sum.quality / n,
                    behavior: acc.criteria_sum.behavior / n,
                    cleanliness: acc.criteria_sum.cleanliness / n,
                    communication: acc.criteria_sum.communication / n,
                }
            });

            TechnicianScore {
                technician_id,
                technician_name: acc.name,
                score: acc.weighted_sum / acc.weight_total,
                average_rating: acc.rating_sum / acc.count as f64,
                evaluation_count: acc.count,
                detailed_count: acc.detailed,
                criteria,
            }
        })
        .collect();

    values.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.evaluation_count.cmp(&a.evaluation_count))
            .then_with(|| a.technician_name.cmp(&b.technician_name))
    });
    values
}

pub fn recency_weight(days_ago: i64) -> f64 {
    match days_ago {
        i64::MIN..=7 => 1.0,
        8..=30 => 0.7,
        31..=60 => 0.4,
        _ => 0.2,
    }
}

pub fn cutoff_date(since_days: i64) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(since_days.max(1))
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationTotals {
    pub technicians_rated: usize,
    pub evaluations: usize,
    pub average_rating: f64,
}

pub fn totals(ratings: &[RatingRecord], since_days: i64) -> EvaluationTotals {
    let cutoff = cutoff_date(since_days);
    let in_window: Vec<&RatingRecord> = ratings.iter().filter(|r| r.rated_on >= cutoff).collect();
    let mut technicians: Vec<Uuid> = in_window.iter().map(|r| r.technician_id).collect();
    technicians.sort();
    technicians.dedup();

    let average_rating = if in_window.is_empty() {
        0.0
    } else {
        in_window.iter().map(|r| r.rating).sum::<f64>() / in_window.len() as f64
    };

    EvaluationTotals {
        technicians_rated: technicians.len(),
        evaluations: in_window.len(),
        average_rating,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(technician_id: Uuid, days_ago: i64, value: f64) -> RatingRecord {
        RatingRecord {
            technician_id,
            technician_name: "Sami Nasser".to_string(),
            rated_on: Utc::now().date_naive() - Duration::days(days_ago),
            rating: value,
            criteria: None,
        }
    }

    #[test]
    fn weights_follow_expected_tiers() {
        assert_eq!(recency_weight(2), 1.0);
        assert_eq!(recency_weight(15), 0.7);
        assert_eq!(recency_weight(40), 0.4);
        assert_eq!(recency_weight(90), 0.2);
    }

    #[test]
    fn recent_ratings_dominate_the_score() {
        let technician = Uuid::new_v4();
        let ratings = vec![rating(technician, 3, 5.0), rating(technician, 12, 2.0)];

        let scores = score_ratings(&ratings, 30);
        assert_eq!(scores.len(), 1);
        let score = &scores[0];
        let expected = (5.0 * 1.0 + 2.0 * 0.7) / (1.0 + 0.7);
        assert!((score.score - expected).abs() < 0.001);
        assert!((score.average_rating - 3.5).abs() < 0.001);
        assert_eq!(score.evaluation_count, 2);
        assert!(score.criteria.is_none());
    }

    #[test]
    fn ignores_ratings_outside_window() {
        let technician = Uuid::new_v4();
        let ratings = vec![rating(technician, 2, 4.0), rating(technician, 90, 1.0)];
        let scores = score_ratings(&ratings, 30);
        assert_eq!(scores[0].evaluation_count, 1);
        assert!((scores[0].score - 4.0).abs() < 0.001);
    }

    #[test]
    fn ranks_best_first_and_averages_criteria() {
        let strong = Uuid::new_v4();
        let weak = Uuid::new_v4();
        let mut detailed = rating(strong, 1, 4.0);
        detailed.criteria = Some(CriteriaScores {
            punctuality: 5.0,
            quality: 4.0,
            behavior: 4.0,
            cleanliness: 3.0,
            communication: 4.0,
        });
        let ratings = vec![detailed, rating(strong, 5, 5.0), rating(weak, 1, 2.0)];

        let scores = score_ratings(&ratings, 30);
        assert_eq!(scores[0].technician_id, strong);
        assert_eq!(scores[0].detailed_count, 1);
        let criteria = scores[0].criteria.unwrap();
        assert!((criteria.punctuality - 5.0).abs() < 0.001);
        assert_eq!(scores[1].technician_id, weak);
    }

    #[test]
    fn cutoff_date_respects_since_days() {
        let cutoff = cutoff_date(14);
        let expected = Utc::now().date_naive() - Duration::days(14);
        assert_eq!(cutoff, expected);
        assert_eq!(cutoff_date(0), Utc::now().date_naive() - Duration::days(1));
    }

    #[test]
    fn totals_cover_window_only() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ratings = vec![rating(a, 1, 4.0), rating(b, 2, 2.0), rating(b, 200, 1.0)];
        let totals = totals(&ratings, 30);
        assert_eq!(totals.technicians_rated, 2);
        assert_eq!(totals.evaluations, 2);
        assert!((totals.average_rating - 3.0).abs() < 0.001);
        assert_eq!(super::totals(&[], 30).average_rating, 0.0);
    }
}
