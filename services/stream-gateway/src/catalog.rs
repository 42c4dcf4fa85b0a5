//! Known pairs and the public categories each one carries.

use std::collections::{BTreeSet, HashMap};

use types::category::Category;
use types::pair::Pair;

/// Pair metadata used to validate subscriptions and expand pair wildcards.
///
/// A pair without a configured category list carries every public category.
#[derive(Debug, Clone, Default)]
pub struct PairCatalog {
    pairs: HashMap<Pair, Vec<Category>>,
    restrict: bool,
}

impl PairCatalog {
    /// Catalog that admits any well-formed pair.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn new(pairs: HashMap<Pair, Vec<Category>>, restrict: bool) -> Self {
        let pairs = pairs
            .into_iter()
            .map(|(pair, categories)| {
                let set: BTreeSet<Category> =
                    categories.into_iter().filter(Category::is_public).collect();
                (pair, set.into_iter().collect())
            })
            .collect();
        Self { pairs, restrict }
    }

    pub fn admits(&self, pair: &Pair) -> bool {
        !self.restrict || self.pairs.contains_key(pair)
    }

    /// Public categories of `pair`, in canonical order.
    pub fn categories(&self, pair: &Pair) -> Vec<Category> {
        match self.pairs.get(pair) {
            Some(categories) if !categories.is_empty() => categories.clone(),
            _ => Category::PUBLIC.to_vec(),
        }
    }
}
