//! Default attribute-based match scoring.
//!
//! The scoring function is a pluggable strategy behind [`MatchScorer`];
//! this implementation compares normalized address, price, room counts,
//! size, and title token overlap. Weights are redistributed over the
//! attributes both payloads actually carry, so sparse listings are scored
//! on what is comparable rather than penalized for missing fields.

use crate::models::ListingPayload;
use crate::traits::MatchScorer;

const WEIGHT_ADDRESS: f64 = 0.40;
const WEIGHT_PRICE: f64 = 0.20;
const WEIGHT_ROOMS: f64 = 0.15;
const WEIGHT_SIZE: f64 = 0.15;
const WEIGHT_TITLE: f64 = 0.10;

/// Weighted attribute comparison scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeScorer;

impl MatchScorer for AttributeScorer {
    fn score(&self, a: &ListingPayload, b: &ListingPayload) -> f64 {
        let mut total_weight = 0.0;
        let mut acc = 0.0;

        if let Some(sim) = address_similarity(a, b) {
            acc += sim * WEIGHT_ADDRESS;
            total_weight += WEIGHT_ADDRESS;
        }
        if let (Some(pa), Some(pb)) = (a.price, b.price) {
            acc += numeric_similarity(pa, pb) * WEIGHT_PRICE;
            total_weight += WEIGHT_PRICE;
        }
        if let Some(sim) = rooms_similarity(a, b) {
            acc += sim * WEIGHT_ROOMS;
            total_weight += WEIGHT_ROOMS;
        }
        if let (Some(sa), Some(sb)) = (a.size_sqm, b.size_sqm) {
            acc += numeric_similarity(sa, sb) * WEIGHT_SIZE;
            total_weight += WEIGHT_SIZE;
        }
        if let (Some(ta), Some(tb)) = (&a.title, &b.title) {
            acc += token_jaccard(ta, tb) * WEIGHT_TITLE;
            total_weight += WEIGHT_TITLE;
        }

        if total_weight == 0.0 {
            return 0.0;
        }
        (acc / total_weight).clamp(0.0, 1.0)
    }
}

/// Street + city comparison; `None` when neither side has address data.
fn address_similarity(a: &ListingPayload, b: &ListingPayload) -> Option<f64> {
    match (
        (&a.street, &a.city, &a.postal_code),
        (&b.street, &b.city, &b.postal_code),
    ) {
        ((None, None, None), _) | (_, (None, None, None)) => None,
        _ => {
            let mut parts = 0.0;
            let mut acc = 0.0;
            if let (Some(sa), Some(sb)) = (&a.street, &b.street) {
                acc += token_jaccard(sa, sb);
                parts += 1.0;
            }
            if let (Some(ca), Some(cb)) = (&a.city, &b.city) {
                acc += if normalize(ca) == normalize(cb) { 1.0 } else { 0.0 };
                parts += 1.0;
            }
            if let (Some(pa), Some(pb)) = (&a.postal_code, &b.postal_code) {
                acc += if normalize(pa) == normalize(pb) { 1.0 } else { 0.0 };
                parts += 1.0;
            }
            if parts == 0.0 {
                // Both sides have some address data but no common field.
                Some(0.0)
            } else {
                Some(acc / parts)
            }
        }
    }
}

fn rooms_similarity(a: &ListingPayload, b: &ListingPayload) -> Option<f64> {
    let mut parts = 0.0;
    let mut acc = 0.0;
    if let (Some(ba), Some(bb)) = (a.bedrooms, b.bedrooms) {
        acc += if ba == bb { 1.0 } else { 0.0 };
        parts += 1.0;
    }
    if let (Some(ba), Some(bb)) = (a.bathrooms, b.bathrooms) {
        acc += if ba == bb { 1.0 } else { 0.0 };
        parts += 1.0;
    }
    if parts == 0.0 {
        None
    } else {
        Some(acc / parts)
    }
}

/// 1.0 for identical values, falling off linearly with relative difference.
fn numeric_similarity(a: f64, b: f64) -> f64 {
    let max = a.abs().max(b.abs());
    if max == 0.0 {
        return 1.0;
    }
    (1.0 - (a - b).abs() / max).max(0.0)
}

/// Jaccard similarity over normalized word tokens.
fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta: std::collections::HashSet<String> =
        normalize(a).split_whitespace().map(str::to_string).collect();
    let tb: std::collections::HashSet<String> =
        normalize(b).split_whitespace().map(str::to_string).collect();
    if ta.is_empty() && tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

/// Lowercase, strip punctuation, collapse whitespace.
fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_alphanumeric() {
            for lc in c.to_lowercase() {
                out.push(lc);
            }
        } else if c.is_whitespace() || c.is_ascii_punctuation() {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
