//! Cross-version relation diffing
//!
//! Three policies compare a package's relation map before and after an
//! update. They trade recall for precision in the order broad, new-local,
//! single-local.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::relations::{Relation, RelationMap, RelationSet};
use super::trust_domain::{CALLER, generalize_local, generalize_new, is_local};
use crate::error::DiffError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffPolicy {
    /// Every relation absent before the update.
    Broad,
    /// Relations not explained by a local domain that already existed.
    NewLocal,
    /// All local domains collapsed to one before diffing.
    #[default]
    SingleLocal,
}

impl DiffPolicy {
    pub const ALL: [DiffPolicy; 3] = [
        DiffPolicy::Broad,
        DiffPolicy::NewLocal,
        DiffPolicy::SingleLocal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiffPolicy::Broad => "broad",
            DiffPolicy::NewLocal => "new-local",
            DiffPolicy::SingleLocal => "single-local",
        }
    }
}

impl fmt::Display for DiffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown diff policy '{0}' (expected broad, new-local or single-local)")]
pub struct ParsePolicyError(String);

impl FromStr for DiffPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "broad" => Ok(DiffPolicy::Broad),
            "new-local" | "newlocal" => Ok(DiffPolicy::NewLocal),
            "single-local" | "singlelocal" => Ok(DiffPolicy::SingleLocal),
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}

/// Relations present after the update that the policy considers new.
pub fn diff(
    before: &RelationMap,
    after: &RelationMap,
    policy: DiffPolicy,
) -> Result<RelationSet, DiffError> {
    if before.schema_version() != after.schema_version() {
        return Err(DiffError::SchemaMismatch {
            before: before.schema_version(),
            after: after.schema_version(),
        });
    }
    let before = before.relation_set();
    let after = after.relation_set();
    Ok(match policy {
        DiffPolicy::Broad => broad(&before, &after),
        DiffPolicy::NewLocal => new_local(&before, &after),
        DiffPolicy::SingleLocal => single_local(&before, &after),
    })
}

pub fn broad(before: &RelationSet, after: &RelationSet) -> RelationSet {
    after.difference(before).cloned().collect()
}

pub fn new_local(before: &RelationSet, after: &RelationSet) -> RelationSet {
    let mut old_locals: BTreeSet<&str> = BTreeSet::new();
    let mut old_local_rels: RelationSet = BTreeSet::new();
    for rel in before {
        for td in [rel.source.as_str(), rel.target.as_str()] {
            if is_local(td) {
                old_locals.insert(td);
                old_local_rels.insert(rel.generalize_locals());
            }
        }
    }

    let to_old_locals = |td: &str| -> String {
        if old_locals.contains(td) {
            generalize_local(td).to_string()
        } else {
            td.to_string()
        }
    };

    let mut result = BTreeSet::new();
    for rel in after {
        if before.contains(rel) {
            continue;
        }
        let explained = Relation::new(to_old_locals(&rel.source), to_old_locals(&rel.target));
        if old_local_rels.contains(&explained) {
            continue;
        }
        let generalized = Relation::new(generalize_new(&rel.source), generalize_new(&rel.target));
        if !before.contains(&generalized) {
            result.insert(generalized);
        }
    }
    result
}

pub fn single_local(before: &RelationSet, after: &RelationSet) -> RelationSet {
    let before: RelationSet = before.iter().map(Relation::generalize_locals).collect();
    let after: RelationSet = after.iter().map(Relation::generalize_locals).collect();
    apply_rel_filters(broad(&before, &after))
}

/// Drops relations between a local domain and another local domain or the
/// caller, in either direction.
pub fn apply_rel_filters(rels: RelationSet) -> RelationSet {
    rels.into_iter()
        .filter(|rel| {
            let (a, b) = (rel.source.as_str(), rel.target.as_str());
            let local_pair = |x: &str, y: &str| is_local(x) && (is_local(y) || y == CALLER);
            !local_pair(a, b) && !local_pair(b, a)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, &str)]) -> RelationSet {
        pairs.iter().map(|(a, b)| Relation::new(*a, *b)).collect()
    }

    #[test]
    fn broad_is_plain_difference() {
        let before = set(&[(":caller", "net")]);
        let after = set(&[(":caller", "net"), (":local:x", "fs")]);

        assert_eq!(broad(&before, &after), set(&[(":local:x", "fs")]));
    }

    #[test]
    fn new_local_ignores_relations_of_existing_locals() {
        let before = set(&[(":local:a", "net")]);
        let after = set(&[(":local:a", "net"), (":local:a", "fs")]);

        assert_eq!(new_local(&before, &after), set(&[(":local:new", "fs")]));
    }

    #[test]
    fn new_local_explains_renamed_literals_through_old_relations() {
        let before = set(&[(":local:a", "net"), (":local:b", "fs")]);
        let after = set(&[(":local:b", "net")]);

        assert!(new_local(&before, &after).is_empty());
    }

    #[test]
    fn new_local_flags_new_literals() {
        let before = set(&[(":local:a", "net")]);
        let after = set(&[(":local:z", "net"), ("lib", ":caller")]);

        assert_eq!(
            new_local(&before, &after),
            set(&[(":local:new", "net"), ("lib", ":caller")])
        );
    }

    #[test]
    fn single_local_collapses_literal_churn() {
        let before = set(&[(":local:old", "net")]);
        let after = set(&[(":local:new-value", "net"), (":local:x", ":caller")]);

        assert!(single_local(&before, &after).is_empty());
        assert!(!broad(&before, &after).is_empty());
    }

    #[test]
    fn diff_rejects_schema_mismatch() {
        let before = RelationMap::new();
        let json = r#"{"schema_version": 99, "entries": []}"#;
        let after = RelationMap::from_json(json).unwrap();

        let err = diff(&before, &after, DiffPolicy::Broad).unwrap_err();

        assert_eq!(
            err,
            DiffError::SchemaMismatch {
                before: 1,
                after: 99
            }
        );
    }

    #[test]
    fn policies_parse_and_display() {
        for policy in DiffPolicy::ALL {
            assert_eq!(policy.to_string().parse::<DiffPolicy>(), Ok(policy));
        }
        assert_eq!("single_local".parse::<DiffPolicy>(), Ok(DiffPolicy::SingleLocal));
        assert!("strict".parse::<DiffPolicy>().is_err());
        assert_eq!(DiffPolicy::default(), DiffPolicy::SingleLocal);
        assert_eq!(
            serde_json::to_string(&DiffPolicy::NewLocal).unwrap(),
            "\"new-local\""
        );
    }
}
