//! Size-letter to group resolution.
//!
//! Groups partition the size letters: every letter belongs to at most one group.
//! Letters are normalized (trimmed, uppercased) on both the configuration side
//! and the lookup side, so `"i"`, `" I "` and `"I"` resolve identically.

use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use thiserror::Error;

/// Problems found while building a registry from configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("size letter {letter} is listed in both group {first} and group {second}")]
    OverlappingGroups {
        letter: String,
        first: String,
        second: String,
    },

    #[error("group names must not be empty")]
    EmptyGroupName,

    #[error("group {0} contains an empty size letter")]
    EmptyLetter(String),

    #[error("Shopify store and access token must be configured")]
    MissingCredentials,

    #[error("size option must be 1, 2 or 3 (got {0})")]
    InvalidSizeOption(u8),
}

/// A named set of size letters sharing one physical stock pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub members: IndexSet<String>,
}

impl Group {
    pub fn contains(&self, letter: &str) -> bool {
        self.members.contains(&normalize_letter(letter))
    }
}

/// Immutable letter -> group lookup built from one configuration snapshot
#[derive(Debug, Clone, Default)]
pub struct GroupRegistry {
    groups: Vec<Group>,
    by_letter: HashMap<String, usize>,
}

/// Uppercase and trim a size letter for comparison.
pub fn normalize_letter(letter: &str) -> String {
    letter.trim().to_uppercase()
}

impl GroupRegistry {
    /// Build a registry, rejecting overlapping groups.
    pub fn from_groups(groups: &IndexMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let mut registry = GroupRegistry::default();

        for (name, letters) in groups {
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyGroupName);
            }

            let index = registry.groups.len();
            let mut members = IndexSet::new();

            for letter in letters {
                let letter = normalize_letter(letter);
                if letter.is_empty() {
                    return Err(ConfigError::EmptyLetter(name.to_string()));
                }
                if let Some(&other) = registry.by_letter.get(&letter) {
                    // Repeated inside the same group
                    if other == index {
                        continue;
                    }
                    return Err(ConfigError::OverlappingGroups {
                        letter,
                        first: registry.groups[other].name.clone(),
                        second: name.to_string(),
                    });
                }
                registry.by_letter.insert(letter.clone(), index);
                members.insert(letter);
            }

            registry.groups.push(Group {
                name: name.to_string(),
                members,
            });
        }

        Ok(registry)
    }

    /// Find the group managing a size letter.
    ///
    /// `None` means the letter is not under group management; callers treat it
    /// as "nothing to do", not as a failure.
    pub fn resolve(&self, size_letter: &str) -> Option<&Group> {
        self.by_letter
            .get(&normalize_letter(size_letter))
            .map(|&index| &self.groups[index])
    }

    /// Look up a group by name.
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// All groups in declaration order.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::default_groups;

    fn registry() -> GroupRegistry {
        GroupRegistry::from_groups(&default_groups()).unwrap()
    }

    #[test]
    fn test_resolve_known_letter() {
        let registry = registry();
        let group = registry.resolve("J").unwrap();

        assert_eq!(group.name, "XS");
        assert_eq!(
            group.members.iter().collect::<Vec<_>>(),
            vec!["I", "J", "K"]
        );
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = registry();
        assert_eq!(registry.resolve("p").unwrap().name, "M");
        assert_eq!(registry.resolve(" t ").unwrap().name, "L");
    }

    #[test]
    fn test_unmapped_letter_is_none() {
        let registry = registry();
        assert!(registry.resolve("Z").is_none());
        assert!(registry.resolve("").is_none());
    }

    #[test]
    fn test_overlapping_groups_rejected() {
        let mut groups = IndexMap::new();
        groups.insert("A".to_string(), vec!["I".to_string(), "J".to_string()]);
        groups.insert("B".to_string(), vec!["j".to_string()]);

        let err = GroupRegistry::from_groups(&groups).unwrap_err();
        assert_eq!(
            err,
            ConfigError::OverlappingGroups {
                letter: "J".to_string(),
                first: "A".to_string(),
                second: "B".to_string(),
            }
        );
    }

    #[test]
    fn test_empty_names_rejected() {
        let mut groups = IndexMap::new();
        groups.insert("  ".to_string(), vec!["I".to_string()]);
        assert_eq!(
            GroupRegistry::from_groups(&groups).unwrap_err(),
            ConfigError::EmptyGroupName
        );

        let mut groups = IndexMap::new();
        groups.insert("XS".to_string(), vec![" ".to_string()]);
        assert!(matches!(
            GroupRegistry::from_groups(&groups),
            Err(ConfigError::EmptyLetter(_))
        ));
    }

    #[test]
    fn test_group_lookup_and_order() {
        let registry = registry();
        assert!(registry.group("S").unwrap().contains("n"));
        assert!(registry.group("XL").is_none());

        let names: Vec<&str> = registry.groups().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["XS", "S", "M", "L"]);
    }

    #[test]
    fn test_deterministic_resolution() {
        let a = registry();
        let b = registry();
        for letter in ["I", "L", "O", "S", "U"] {
            assert_eq!(a.resolve(letter), b.resolve(letter));
        }
    }
}
