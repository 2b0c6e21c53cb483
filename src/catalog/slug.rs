//! Deterministic identifiers for catalog organizations and datasets.
//!
//! CKAN names must be lowercase ASCII (`a-z`, `0-9`, `-`, `_`), so portal
//! names written in Cyrillic are transliterated before slugging.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum length of an organization name in CKAN.
pub const MAX_ORGANIZATION_SLUG: usize = 100;

/// Maximum length used for dataset ids.
pub const MAX_DATASET_ID: usize = 80;

static NUMERIC_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)[_\-]").unwrap());

/// Latin spelling for a lowercase Cyrillic letter (Russian and Kazakh).
fn cyrillic_to_latin(c: char) -> Option<&'static str> {
    let latin = match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' | 'ё' | 'э' => "e",
        'ж' => "zh",
        'з' => "z",
        'и' | 'й' => "i",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "kh",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "shch",
        'ъ' | 'ь' => "",
        'ы' => "y",
        'ю' => "iu",
        'я' => "ia",
        // Kazakh
        'ә' => "a",
        'ғ' => "g",
        'қ' => "q",
        'ң' => "n",
        'ө' => "o",
        'ұ' | 'ү' => "u",
        'һ' => "h",
        'і' => "i",
        _ => return None,
    };
    Some(latin)
}

/// Transliterate Cyrillic text to Latin, preserving letter case.
///
/// Characters outside the Cyrillic table are kept unchanged.
pub fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let lower = c.to_lowercase().next().unwrap_or(c);
        match cyrillic_to_latin(lower) {
            Some(latin) if lower != c => {
                let mut chars = latin.chars();
                if let Some(first) = chars.next() {
                    out.extend(first.to_uppercase());
                    out.push_str(chars.as_str());
                }
            }
            Some(latin) => out.push_str(latin),
            None => out.push(c),
        }
    }
    out
}

/// Lowercase ASCII slug: transliterated, runs of anything outside
/// `[a-z0-9]` collapsed to a single `-`, trimmed, truncated to `max_len`.
pub fn slugify(text: &str, max_len: usize) -> String {
    let ascii = transliterate(text).to_lowercase();
    let mut slug = String::with_capacity(ascii.len());
    let mut pending_dash = false;
    for c in ascii.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    truncate_slug(&slug, max_len)
}

fn truncate_slug(slug: &str, max_len: usize) -> String {
    let truncated: String = slug.chars().take(max_len).collect();
    truncated.trim_matches('-').to_string()
}

/// Four-digit bucket derived from a stable hash.
fn hash_bucket(input: &str) -> u64 {
    let digest = blake3::hash(input.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes) % 10_000
}

/// Organization slug for a display name.
pub fn organization_slug(name: &str) -> String {
    let slug = slugify(name.trim(), MAX_ORGANIZATION_SLUG);
    if slug.len() >= 2 {
        slug
    } else {
        format!("org-{:04}", hash_bucket(name.trim()))
    }
}

/// A dataset id together with how it was derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetId {
    pub id: String,
    /// True when the id came from the hash fallback. Hashed ids are
    /// deterministic but two distinct stems can share one.
    pub hashed: bool,
}

/// Longest agency slug used verbatim as a dataset id prefix.
const MAX_AGENCY_PREFIX: usize = 24;

/// Prefix scoping dataset ids to an agency.
///
/// The whole slugified agency id, so two agencies never share a prefix.
/// Ids longer than [`MAX_AGENCY_PREFIX`] become `a` plus eight hex digits
/// of their blake3 digest, leaving room for the stem within 80 characters.
pub fn agency_prefix(agency_id: &str) -> String {
    let prefix = slugify(agency_id, MAX_DATASET_ID);
    if prefix.is_empty() {
        "ds".to_string()
    } else if prefix.len() > MAX_AGENCY_PREFIX {
        let digest = blake3::hash(agency_id.trim().as_bytes()).to_hex();
        format!("a{}", &digest.as_str()[..8])
    } else {
        prefix
    }
}

/// Deterministic dataset id from the agency and the record's file stem.
///
/// Shape: `<agency prefix>-<numeric prefix-><slug>`, at most 80 characters.
/// Falls back to `<agency prefix>-ds-NNNN` when the stem slugs to fewer
/// than two characters.
pub fn dataset_id(agency_id: &str, file_stem: &str) -> DatasetId {
    let prefix = agency_prefix(agency_id);
    let clean = slugify(file_stem, MAX_DATASET_ID);

    if clean.len() < 2 {
        let bucket = hash_bucket(&format!("{}/{}", agency_id, file_stem));
        return DatasetId {
            id: format!("{}-ds-{:04}", prefix, bucket),
            hashed: true,
        };
    }

    let numeric = NUMERIC_PREFIX
        .captures(file_stem.trim())
        .and_then(|c| c.get(1))
        .map(|m| format!("{}-", m.as_str()))
        .unwrap_or_default();

    DatasetId {
        id: truncate_slug(&format!("{}-{}{}", prefix, numeric, clean), MAX_DATASET_ID),
        hashed: false,
    }
}
