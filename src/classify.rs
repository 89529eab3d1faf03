//! Label → disposal category classification.
//!
//! The detector emits free-form labels (COCO-style class names); this module
//! maps each label to one of the fixed disposal categories using a
//! deterministic rule table. Person-like labels are classified `Ignored` and
//! never counted.

use serde::{Deserialize, Serialize};

/// Coarse disposal class assigned to a detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Recyclable,
    Compost,
    Trash,
    /// People and other detections that must never be counted.
    Ignored,
}

/// Person-like terms. Checked first; substring match.
const PERSON_TERMS: &[&str] = &["person", "people", "human", "man", "woman", "child"];

/// Exact label → category table.
const EXACT_TABLE: &[(&str, Category)] = &[
    ("bottle", Category::Recyclable),
    ("cup", Category::Recyclable),
    ("can", Category::Recyclable),
    ("book", Category::Recyclable),
    ("banana", Category::Compost),
    ("apple", Category::Compost),
    ("orange", Category::Compost),
    ("sandwich", Category::Compost),
    ("chair", Category::Trash),
    ("tv", Category::Trash),
    ("remote", Category::Trash),
    ("cell_phone", Category::Trash),
    ("laptop", Category::Trash),
    ("handbag", Category::Trash),
    ("backpack", Category::Trash),
];

/// Substring keyword sets, consulted after the exact table.
const RECYCLABLE_KEYWORDS: &[&str] = &["bottle", "cup", "can", "glass"];
const COMPOST_KEYWORDS: &[&str] = &["banana", "apple", "orange", "sandwich", "hotdog"];

/// Classify a raw detection label.
///
/// Pure and deterministic: the same label always yields the same category.
/// Matching is case-insensitive and ignores surrounding whitespace.
/// Resolution order, first match wins:
///
/// 1. person-like terms → `Ignored`
/// 2. exact table lookup
/// 3. recyclable keyword substring
/// 4. compost keyword substring
/// 5. default `Trash`
pub fn classify(label: &str) -> Category {
    let label = label.trim().to_lowercase();

    if PERSON_TERMS.iter().any(|term| label.contains(term)) {
        return Category::Ignored;
    }

    if let Some((_, category)) = EXACT_TABLE.iter().find(|(name, _)| *name == label) {
        return *category;
    }

    if RECYCLABLE_KEYWORDS.iter().any(|kw| label.contains(kw)) {
        return Category::Recyclable;
    }

    if COMPOST_KEYWORDS.iter().any(|kw| label.contains(kw)) {
        return Category::Compost;
    }

    Category::Trash
}
