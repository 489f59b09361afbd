// src/prioritize.rs
//! Delivery ordering: priority buckets, then source diversification so the
//! channel does not show long runs from one outlet.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use crate::classify::{is_urgent, tag_in, ECONOMIC_TAGS, OFFICIAL_TAGS, SPORTS_TAGS};
use crate::sources::SourceRegistry;
use crate::store::Article;

/// Tested in declaration order; the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Urgent,
    Local,
    Official,
    Economic,
    Sports,
    Other,
}

pub fn bucket_for(article: &Article, registry: &SourceRegistry, home_country: &str) -> Bucket {
    if is_urgent(&article.title.to_lowercase()) {
        Bucket::Urgent
    } else if registry.is_local(&article.source, home_country) {
        Bucket::Local
    } else if tag_in(&article.category, OFFICIAL_TAGS) {
        Bucket::Official
    } else if tag_in(&article.category, ECONOMIC_TAGS) {
        Bucket::Economic
    } else if tag_in(&article.category, SPORTS_TAGS) {
        Bucket::Sports
    } else {
        Bucket::Other
    }
}

/// Round-robin across sources, sources with the fewest items first (ties keep
/// first-seen order). A repair pass then moves any slot still touching a
/// same-source neighbour into the nearest gap between two other sources; when
/// one source outnumbers all the others together some runs are unavoidable
/// and stay. Each source's items keep their input order.
pub fn diversify<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    if items.len() < 2 {
        return items;
    }

    let mut order: Vec<K> = Vec::new();
    let mut groups: HashMap<K, VecDeque<T>> = HashMap::new();
    for it in items {
        let k = key(&it);
        if !groups.contains_key(&k) {
            order.push(k.clone());
        }
        groups.entry(k).or_default().push_back(it);
    }
    let size = |k: &K| groups.get(k).map_or(0, VecDeque::len);
    order.sort_by_key(|k| size(k));

    let rounds = order.iter().map(|k| size(k)).max().unwrap_or(0);
    let mut slots: Vec<K> = Vec::new();
    for round in 0..rounds {
        slots.extend(order.iter().filter(|k| size(k) > round).cloned());
    }
    separate_runs(&mut slots);

    slots
        .iter()
        .filter_map(|k| groups.get_mut(k).and_then(VecDeque::pop_front))
        .collect()
}

fn separate_runs<K: Eq>(slots: &mut Vec<K>) {
    let mut i = 1;
    while i < slots.len() {
        if slots[i] != slots[i - 1] {
            i += 1;
            continue;
        }
        let moved = slots.remove(i);
        // gap g sits between slots[g-1] and slots[g]
        let free = |g: usize| {
            (g == 0 || slots[g - 1] != moved) && (g == slots.len() || slots[g] != moved)
        };
        let target = (0..=slots.len())
            .filter(|&g| free(g))
            .min_by_key(|&g| (g.abs_diff(i), g < i));
        match target {
            Some(g) => {
                slots.insert(g, moved);
                i = g.min(i).max(1);
            }
            None => {
                slots.insert(i, moved);
                i += 1;
            }
        }
    }
}

/// Ordered delivery for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryPlan {
    /// Urgent headlines from home-country sources, sent first on their own cadence.
    pub urgent_local: Vec<Article>,
    /// Everything else in priority order.
    pub rest: Vec<Article>,
}

impl DeliveryPlan {
    pub fn len(&self) -> usize {
        self.urgent_local.len() + self.rest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Article> {
        self.urgent_local.iter().chain(self.rest.iter())
    }
}

/// Urgent (as found), then diversified local, then official, economic,
/// other and sports merged and diversified together. Urgent articles from
/// local sources are split out to the head of the queue.
pub fn prioritize(articles: Vec<Article>, registry: &SourceRegistry, home_country: &str) -> DeliveryPlan {
    let mut buckets: HashMap<Bucket, Vec<Article>> = HashMap::new();
    for a in articles {
        let b = bucket_for(&a, registry, home_country);
        buckets.entry(b).or_default().push(a);
    }
    let mut take = |b: Bucket| buckets.remove(&b).unwrap_or_default();

    let urgent = take(Bucket::Urgent);
    let local = diversify(take(Bucket::Local), |a| a.source.clone());
    let mut remaining = take(Bucket::Official);
    remaining.extend(take(Bucket::Economic));
    remaining.extend(take(Bucket::Other));
    remaining.extend(take(Bucket::Sports));
    let remaining = diversify(remaining, |a| a.source.clone());

    tracing::info!(
        urgent = urgent.len(),
        local = local.len(),
        remaining = remaining.len(),
        "delivery order built"
    );

    let (urgent_local, urgent_other): (Vec<Article>, Vec<Article>) = urgent
        .into_iter()
        .partition(|a| registry.is_local(&a.source, home_country));

    let mut rest = urgent_other;
    rest.extend(local);
    rest.extend(remaining);
    DeliveryPlan { urgent_local, rest }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runs_ok(seq: &[char]) -> bool {
        seq.windows(2).all(|w| w[0] != w[1])
    }

    fn expand(counts: &[usize]) -> Vec<(char, usize)> {
        // grouped input: every source's items arrive together
        let mut v = Vec::new();
        for (s, &n) in counts.iter().enumerate() {
            for i in 0..n {
                v.push(((b'A' + s as u8) as char, i));
            }
        }
        v
    }

    #[test]
    fn fewest_first_round_robin() {
        let out = diversify(expand(&[2, 1, 2]), |x| x.0);
        let srcs: Vec<char> = out.iter().map(|x| x.0).collect();
        assert_eq!(srcs, vec!['B', 'A', 'C', 'A', 'C']);
    }

    #[test]
    fn per_source_order_is_kept() {
        for counts in [[3, 3, 0], [3, 1, 2], [5, 1, 1]] {
            let out = diversify(expand(&counts), |x| x.0);
            let a: Vec<usize> = out.iter().filter(|x| x.0 == 'A').map(|x| x.1).collect();
            assert_eq!(a, (0..counts[0]).collect::<Vec<_>>());
        }
    }

    #[test]
    fn no_adjacent_sources_unless_one_dominates() {
        for a in 0..=5 {
            for b in 0..=5 {
                for c in 0..=5 {
                    let counts = [a, b, c];
                    let total: usize = counts.iter().sum();
                    let max = *counts.iter().max().unwrap();
                    let out = diversify(expand(&counts), |x| x.0);
                    assert_eq!(out.len(), total);
                    let srcs: Vec<char> = out.iter().map(|x| x.0).collect();
                    if max <= total - max {
                        assert!(runs_ok(&srcs), "{counts:?} -> {srcs:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn single_source_stays_in_order() {
        let out = diversify(expand(&[4]), |x| x.0);
        assert_eq!(out.iter().map(|x| x.1).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(diversify(Vec::<(char, usize)>::new(), |x| x.0).is_empty());
    }
}
