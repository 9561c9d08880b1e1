//! Token distribution over the conditions of one net instance

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::identifier::{ConditionId, Identifier};
use crate::CoreError;

/// Multiset of tokens per condition, each token tagged with the identifier
/// of the thread of control that produced it
///
/// Empty bags are never stored, so two markings holding the same tokens
/// always compare and serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marking {
    places: BTreeMap<ConditionId, BTreeMap<Identifier, u32>>,
}

impl Marking {
    /// Empty marking
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `n` tokens for `identifier` on `condition`
    pub fn add(&mut self, condition: &ConditionId, identifier: &Identifier, n: u32) {
        if n == 0 {
            return;
        }
        *self
            .places
            .entry(condition.clone())
            .or_default()
            .entry(identifier.clone())
            .or_insert(0) += n;
    }

    /// Remove one token for `identifier` from `condition`
    pub fn remove_one(
        &mut self,
        condition: &ConditionId,
        identifier: &Identifier,
    ) -> Result<(), CoreError> {
        let bag = self.places.get_mut(condition).ok_or_else(|| {
            CoreError::StructuralError(format!("No token on condition {}", condition))
        })?;
        let count = bag.get_mut(identifier).ok_or_else(|| {
            CoreError::StructuralError(format!(
                "No token for {} on condition {}",
                identifier, condition
            ))
        })?;
        *count -= 1;
        if *count == 0 {
            bag.remove(identifier);
        }
        if bag.is_empty() {
            self.places.remove(condition);
        }
        Ok(())
    }

    /// Remove every token from `condition`, returning how many were removed
    pub fn clear(&mut self, condition: &ConditionId) -> u32 {
        self.places
            .remove(condition)
            .map(|bag| bag.values().sum())
            .unwrap_or(0)
    }

    /// Total tokens on `condition`
    pub fn count(&self, condition: &ConditionId) -> u32 {
        self.places
            .get(condition)
            .map(|bag| bag.values().sum())
            .unwrap_or(0)
    }

    /// Tokens on `condition` produced by `identifier`
    pub fn count_for(&self, condition: &ConditionId, identifier: &Identifier) -> u32 {
        self.places
            .get(condition)
            .and_then(|bag| bag.get(identifier))
            .copied()
            .unwrap_or(0)
    }

    /// Whether `condition` holds at least one token
    pub fn is_marked(&self, condition: &ConditionId) -> bool {
        self.places.contains_key(condition)
    }

    /// Identifiers with a token on `condition`, in order
    pub fn identifiers<'a>(
        &'a self,
        condition: &ConditionId,
    ) -> impl Iterator<Item = &'a Identifier> + 'a {
        self.places
            .get(condition)
            .into_iter()
            .flat_map(|bag| bag.keys())
    }

    /// Conditions holding tokens, in order
    pub fn marked_conditions(&self) -> impl Iterator<Item = &ConditionId> {
        self.places.keys()
    }

    /// Total tokens in the marking
    pub fn total(&self) -> u32 {
        self.places.values().flat_map(|bag| bag.values()).sum()
    }

    /// Whether no condition holds a token
    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (ConditionId, Identifier, Identifier) {
        (
            ConditionId::from("c"),
            Identifier("case".to_string()),
            Identifier("case.1".to_string()),
        )
    }

    #[test]
    fn test_add_and_count() {
        let (c, a, b) = ids();
        let mut marking = Marking::new();
        marking.add(&c, &a, 2);
        marking.add(&c, &b, 1);

        assert_eq!(marking.count(&c), 3);
        assert_eq!(marking.count_for(&c, &a), 2);
        assert_eq!(marking.identifiers(&c).count(), 2);
        assert_eq!(marking.total(), 3);
    }

    #[test]
    fn test_remove_drops_empty_bags() {
        let (c, a, _) = ids();
        let mut marking = Marking::new();
        marking.add(&c, &a, 1);
        marking.remove_one(&c, &a).unwrap();

        assert!(marking.is_empty());
        assert_eq!(marking, Marking::new());
    }

    #[test]
    fn test_remove_missing_token_is_structural() {
        let (c, a, _) = ids();
        let mut marking = Marking::new();
        assert!(matches!(
            marking.remove_one(&c, &a),
            Err(CoreError::StructuralError(_))
        ));
    }

    #[test]
    fn test_clear_reports_removed_tokens() {
        let (c, a, b) = ids();
        let mut marking = Marking::new();
        marking.add(&c, &a, 1);
        marking.add(&c, &b, 2);

        assert_eq!(marking.clear(&c), 3);
        assert!(!marking.is_marked(&c));
    }

    #[test]
    fn test_adding_zero_tokens_is_noop() {
        let (c, a, _) = ids();
        let mut marking = Marking::new();
        marking.add(&c, &a, 0);
        assert!(marking.is_empty());
    }
}
