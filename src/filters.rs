//! Webhook event filters
//!
//! Every remote event type the bot can relay is a named flag with a fixed bit
//! position. A webhook's enabled set is stored as one arbitrary-precision
//! integer so the registry can grow past 64 entries.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Canonical flag registry. Bit `i` is `FLAG_NAMES[i]`.
///
/// Append-only: reordering or removing an entry silently corrupts every
/// persisted bitfield.
pub const FLAG_NAMES: &[&str] = &[
    "ADD_MEMBER_TO_BOARD",
    "REMOVE_MEMBER_FROM_BOARD",
    "MAKE_ADMIN_OF_BOARD",
    "MAKE_NORMAL_MEMBER_OF_BOARD",
    "UPDATE_BOARD_NAME",
    "UPDATE_BOARD_DESC",
    "UPDATE_BOARD_PREFS",
    "UPDATE_BOARD_CLOSED",
    "CREATE_LABEL",
    "DELETE_LABEL",
    "UPDATE_LABEL_NAME",
    "UPDATE_LABEL_COLOR",
    "DELETE_CARD",
    "CREATE_CARD",
    "VOTE_ON_CARD",
    "ADD_ATTACHMENT_TO_CARD",
    "DELETE_ATTACHMENT_FROM_CARD",
    "ADD_LABEL_TO_CARD",
    "REMOVE_LABEL_FROM_CARD",
    "ADD_MEMBER_TO_CARD",
    "REMOVE_MEMBER_FROM_CARD",
    "MOVE_CARD_FROM_BOARD",
    "MOVE_CARD_TO_BOARD",
    "COPY_CARD",
    "UPDATE_CARD_NAME",
    "UPDATE_CARD_DESC",
    "UPDATE_CARD_LIST",
    "UPDATE_CARD_POS",
    "UPDATE_CARD_CLOSED",
    "UPDATE_CARD_DUE",
    "COMMENT_CARD",
    "UPDATE_COMMENT",
    "DELETE_COMMENT",
    "ADD_CHECKLIST_TO_CARD",
    "REMOVE_CHECKLIST_FROM_CARD",
    "COPY_CHECKLIST",
    "UPDATE_CHECKLIST_NAME",
    "UPDATE_CHECKLIST_POS",
    "UPDATE_CHECK_ITEM_STATE_ON_CARD",
    "CREATE_CHECK_ITEM",
    "DELETE_CHECK_ITEM",
    "CONVERT_TO_CARD_FROM_CHECK_ITEM",
    "UPDATE_CHECK_ITEM_NAME",
    "UPDATE_CHECK_ITEM_POS",
    "CREATE_LIST",
    "MOVE_LIST_FROM_BOARD",
    "MOVE_LIST_TO_BOARD",
    "UPDATE_LIST_NAME",
    "UPDATE_LIST_POS",
    "UPDATE_LIST_CLOSED",
    "CREATE_CUSTOM_FIELD",
    "DELETE_CUSTOM_FIELD",
    "UPDATE_CUSTOM_FIELD_ITEM",
    "UPDATE_CUSTOM_FIELD_NAME",
];

/// Groups shown as batch toggles in the filter editor. UI only, no bits.
pub const FILTER_GROUPS: &[(&str, &[&str])] = &[
    (
        "board",
        &[
            "ADD_MEMBER_TO_BOARD",
            "REMOVE_MEMBER_FROM_BOARD",
            "MAKE_ADMIN_OF_BOARD",
            "MAKE_NORMAL_MEMBER_OF_BOARD",
        ],
    ),
    (
        "boardUpdate",
        &[
            "UPDATE_BOARD_NAME",
            "UPDATE_BOARD_DESC",
            "UPDATE_BOARD_PREFS",
            "UPDATE_BOARD_CLOSED",
        ],
    ),
    ("label", &["CREATE_LABEL", "DELETE_LABEL"]),
    ("labelUpdate", &["UPDATE_LABEL_NAME", "UPDATE_LABEL_COLOR"]),
    (
        "card",
        &[
            "DELETE_CARD",
            "CREATE_CARD",
            "VOTE_ON_CARD",
            "ADD_ATTACHMENT_TO_CARD",
            "DELETE_ATTACHMENT_FROM_CARD",
            "ADD_LABEL_TO_CARD",
            "REMOVE_LABEL_FROM_CARD",
            "ADD_MEMBER_TO_CARD",
            "REMOVE_MEMBER_FROM_CARD",
            "MOVE_CARD_FROM_BOARD",
            "MOVE_CARD_TO_BOARD",
            "COPY_CARD",
        ],
    ),
    (
        "cardUpdate",
        &[
            "UPDATE_CARD_NAME",
            "UPDATE_CARD_DESC",
            "UPDATE_CARD_LIST",
            "UPDATE_CARD_POS",
            "UPDATE_CARD_CLOSED",
            "UPDATE_CARD_DUE",
        ],
    ),
    ("comment", &["COMMENT_CARD", "UPDATE_COMMENT", "DELETE_COMMENT"]),
    (
        "checklist",
        &[
            "ADD_CHECKLIST_TO_CARD",
            "REMOVE_CHECKLIST_FROM_CARD",
            "COPY_CHECKLIST",
        ],
    ),
    (
        "checklistUpdate",
        &["UPDATE_CHECKLIST_NAME", "UPDATE_CHECKLIST_POS"],
    ),
    (
        "checkItem",
        &[
            "UPDATE_CHECK_ITEM_STATE_ON_CARD",
            "CREATE_CHECK_ITEM",
            "DELETE_CHECK_ITEM",
            "CONVERT_TO_CARD_FROM_CHECK_ITEM",
        ],
    ),
    (
        "checkItemUpdate",
        &["UPDATE_CHECK_ITEM_NAME", "UPDATE_CHECK_ITEM_POS"],
    ),
    (
        "list",
        &["CREATE_LIST", "MOVE_LIST_FROM_BOARD", "MOVE_LIST_TO_BOARD"],
    ),
    (
        "listUpdate",
        &["UPDATE_LIST_NAME", "UPDATE_LIST_POS", "UPDATE_LIST_CLOSED"],
    ),
    (
        "customField",
        &[
            "CREATE_CUSTOM_FIELD",
            "DELETE_CUSTOM_FIELD",
            "UPDATE_CUSTOM_FIELD_ITEM",
        ],
    ),
    ("customFieldUpdate", &["UPDATE_CUSTOM_FIELD_NAME"]),
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown webhook filter flag `{0}`")]
    UnknownFlag(String),
    #[error("invalid filter bitfield `{0}`")]
    InvalidBitfield(String),
}

/// A single registered event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Flag(u16);

impl Flag {
    pub fn parse(name: &str) -> Result<Self, FilterError> {
        FLAG_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| Flag(i as u16))
            .ok_or_else(|| FilterError::UnknownFlag(name.to_string()))
    }

    pub fn name(self) -> &'static str {
        FLAG_NAMES[self.0 as usize]
    }

    pub fn bit(self) -> u64 {
        u64::from(self.0)
    }

    pub fn all() -> impl Iterator<Item = Flag> {
        (0..FLAG_NAMES.len()).map(|i| Flag(i as u16))
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Members of a filter group, or `None` for an unknown group key.
pub fn group_members(group: &str) -> Option<&'static [&'static str]> {
    FILTER_GROUPS
        .iter()
        .find(|(key, _)| *key == group)
        .map(|(_, members)| *members)
}

/// An immutable set of enabled flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WebhookFilters {
    bits: BigUint,
}

impl WebhookFilters {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every registered flag enabled.
    pub fn all() -> Self {
        Self::from_flags(Flag::all())
    }

    pub fn from_bits(bits: BigUint) -> Self {
        Self { bits }
    }

    pub fn from_flags<I: IntoIterator<Item = Flag>>(flags: I) -> Self {
        let mut bits = BigUint::zero();
        for flag in flags {
            bits.set_bit(flag.bit(), true);
        }
        Self { bits }
    }

    pub fn from_names<I, S>(names: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let flags = names
            .into_iter()
            .map(|n| Flag::parse(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_flags(flags))
    }

    pub fn has(&self, flag: Flag) -> bool {
        self.bits.bit(flag.bit())
    }

    pub fn has_named(&self, name: &str) -> Result<bool, FilterError> {
        Ok(self.has(Flag::parse(name)?))
    }

    /// True iff every named flag is set.
    pub fn has_all<S: AsRef<str>>(&self, names: &[S]) -> Result<bool, FilterError> {
        let mut all = true;
        for name in names {
            // Resolve every name so a typo fails even after a miss.
            all &= self.has_named(name.as_ref())?;
        }
        Ok(all)
    }

    pub fn with<I: IntoIterator<Item = Flag>>(&self, flags: I) -> Self {
        self.union(&Self::from_flags(flags))
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            bits: &self.bits | &other.bits,
        }
    }

    /// Registered flags that are set, in registry order.
    pub fn flags(&self) -> Vec<Flag> {
        Flag::all().filter(|f| self.has(*f)).collect()
    }

    pub fn bitfield(&self) -> &BigUint {
        &self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_zero()
    }

    /// Base-10 representation used for persistence.
    pub fn serialize(&self) -> String {
        self.bits.to_str_radix(10)
    }
}

impl FromStr for WebhookFilters {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }
        if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FilterError::InvalidBitfield(s.to_string()));
        }
        BigUint::parse_bytes(trimmed.as_bytes(), 10)
            .map(Self::from_bits)
            .ok_or_else(|| FilterError::InvalidBitfield(s.to_string()))
    }
}

impl fmt::Display for WebhookFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl From<u64> for WebhookFilters {
    fn from(value: u64) -> Self {
        Self::from_bits(BigUint::from(value))
    }
}

/// `2^bit`, handy for seeds in tests and migrations.
pub fn single_bit(bit: u64) -> BigUint {
    BigUint::one() << bit
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registry_names_are_unique() {
        let unique: HashSet<_> = FLAG_NAMES.iter().collect();
        assert_eq!(unique.len(), FLAG_NAMES.len());
    }

    #[test]
    fn every_group_member_is_registered() {
        for (group, members) in FILTER_GROUPS {
            for name in *members {
                assert!(Flag::parse(name).is_ok(), "{} in {}", name, group);
            }
        }
        let grouped: usize = FILTER_GROUPS.iter().map(|(_, m)| m.len()).sum();
        assert_eq!(grouped, FLAG_NAMES.len());
    }

    #[test]
    fn test_round_trip_every_subset_shape() {
        let all: Vec<Flag> = Flag::all().collect();
        // Singletons, prefixes, alternating picks and the full set.
        let mut subsets: Vec<Vec<Flag>> = all.iter().map(|f| vec![*f]).collect();
        for n in 0..=all.len() {
            subsets.push(all[..n].to_vec());
        }
        subsets.push(all.iter().copied().step_by(2).collect());
        subsets.push(all.iter().copied().skip(1).step_by(3).collect());

        for subset in subsets {
            let filters = WebhookFilters::from_flags(subset.clone());
            let restored: WebhookFilters = filters.serialize().parse().unwrap();
            assert_eq!(restored, filters);
            assert_eq!(restored.flags(), subset);
        }
    }

    #[test]
    fn test_bits_beyond_native_width_survive() {
        let wide = single_bit(130) | single_bit(65) | single_bit(3);
        let filters = WebhookFilters::from_bits(wide.clone());
        let restored: WebhookFilters = filters.to_string().parse().unwrap();
        assert_eq!(restored.bitfield(), &wide);
        assert_eq!(filters.serialize(), wide.to_str_radix(10));
    }

    #[test]
    fn test_unknown_flag_is_an_error() {
        assert_eq!(
            Flag::parse("CREATE_CARDS"),
            Err(FilterError::UnknownFlag("CREATE_CARDS".to_string()))
        );
        assert!(WebhookFilters::from_names(["CREATE_CARD", "NOPE"]).is_err());
        let filters = WebhookFilters::all();
        assert!(filters.has_named("NOPE").is_err());
        assert!(filters.has_all(&["CREATE_CARD", "NOPE"]).is_err());
    }

    #[test]
    fn test_has_all_requires_every_bit() {
        let filters = WebhookFilters::from_names(["CREATE_LABEL"]).unwrap();
        assert!(filters.has_all(&["CREATE_LABEL"]).unwrap());
        assert!(!filters.has_all(&["CREATE_LABEL", "DELETE_LABEL"]).unwrap());
        assert!(filters.has_all::<&str>(&[]).unwrap());

        let label = group_members("label").unwrap();
        let both = filters.with([Flag::parse("DELETE_LABEL").unwrap()]);
        assert!(both.has_all(label).unwrap());
        // `with` never mutates the original.
        assert!(!filters.has_named("DELETE_LABEL").unwrap());
    }

    #[test]
    fn test_union_and_parse_errors() {
        let a = WebhookFilters::from_names(["CREATE_CARD"]).unwrap();
        let b = WebhookFilters::from_names(["DELETE_CARD"]).unwrap();
        let u = a.union(&b);
        assert!(u.has_named("CREATE_CARD").unwrap());
        assert!(u.has_named("DELETE_CARD").unwrap());
        assert_eq!(u.flags().len(), 2);

        assert!("".parse::<WebhookFilters>().unwrap().is_empty());
        assert_eq!(
            "12abc".parse::<WebhookFilters>(),
            Err(FilterError::InvalidBitfield("12abc".to_string()))
        );
        for bad in ["12_3", "+5", "1 2"] {
            assert_eq!(
                bad.parse::<WebhookFilters>(),
                Err(FilterError::InvalidBitfield(bad.to_string()))
            );
        }
        assert_eq!(" 5 ".parse::<WebhookFilters>().unwrap(), WebhookFilters::from(5u64));
        assert_eq!(WebhookFilters::from(5u64).flags().len(), 2);
    }
}
