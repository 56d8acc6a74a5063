//! Identifier normalizer.
//!
//! Pure functions that turn human-entered values into the canonical forms used
//! for deduplication and derived attributes. Nothing here performs I/O or reads
//! randomness, so the same input always yields the same output on every
//! process and release.

use std::collections::BTreeMap;

use cairn_core::{Attributes, EntityType, StandardId, attribute_text};
use uuid::Uuid;

use crate::pipeline::ValidationFailure;

/// Namespace for version 5 UUIDs embedded in standard identifiers.
const STANDARD_ID_NAMESPACE: Uuid = Uuid::from_u128(0x00ab_edb4_aa42_466c_9c01_fed2_3315_a9b7);

/// Trim, collapse whitespace runs to one space, and lower-case.
#[must_use]
pub fn normalize_value(raw: &str) -> String {
    normalize_name(raw).to_lowercase()
}

/// Trim and collapse whitespace runs to one space, preserving case.
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Display colour derived from a string, rendered as `#rrggbb`.
///
/// A 32-bit wrapping hash over UTF-16 code units; the three low bytes, least
/// significant first, become the colour channels. Stable across processes and
/// releases but non-cryptographic and collision-prone: it only distinguishes
/// entries visually and must not be used for identity or security.
#[must_use]
pub fn string_to_colour(input: &str) -> String {
    let hash = input.encode_utf16().fold(0_i32, |hash, unit| {
        i32::from(unit).wrapping_add(hash.wrapping_shl(5).wrapping_sub(hash))
    });
    let [red, green, blue, _] = hash.to_le_bytes();
    format!("#{red:02x}{green:02x}{blue:02x}")
}

/// Standard identifier for an entity: `<type-slug>--<uuid v5>` over the
/// canonical JSON object of its normalized identity fields.
///
/// # Errors
///
/// Returns a [`ValidationFailure`] when an identity field is missing, empty,
/// or not a scalar.
pub fn standard_id(
    entity_type: EntityType,
    attributes: &Attributes,
) -> Result<StandardId, ValidationFailure> {
    let mut identity = BTreeMap::new();
    for field in entity_type.identity_fields() {
        let value = attributes
            .get(*field)
            .and_then(attribute_text)
            .map(|text| normalize_value(&text))
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ValidationFailure::new(*field, "missing_identity_field"))?;
        identity.insert(*field, value);
    }
    let canonical = serde_json::to_string(&identity)
        .map_err(|_| ValidationFailure::new(entity_type.as_str(), "unserializable_identity"))?;
    let uuid = Uuid::new_v5(&STANDARD_ID_NAMESPACE, canonical.as_bytes());
    Ok(StandardId::new(format!("{}--{uuid}", entity_type.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_are_trimmed_collapsed_and_folded() {
        assert_eq!(normalize_value("  Phishing \t Kit\n"), "phishing kit");
        assert_eq!(normalize_value("phishing "), normalize_value("Phishing"));
        assert_eq!(normalize_name("  Initial   Access "), "Initial Access");
        assert_eq!(normalize_value("ÉTÉ"), "été");
        assert_eq!(normalize_value("   "), "");
    }

    #[test]
    fn colours_are_stable() {
        assert_eq!(string_to_colour("ransomware"), "#8fd671");
        assert_eq!(string_to_colour("phishing"), "#9cfabd");
        assert_eq!(string_to_colour("a"), "#610000");
        assert_eq!(string_to_colour(""), "#000000");
        assert_eq!(string_to_colour("été"), "#9e7903");
        // Astral characters hash as surrogate pairs.
        assert_eq!(string_to_colour("🦀"), "#020d1b");
    }

    #[test]
    fn standard_ids_are_pinned() {
        let mut label = Attributes::new();
        label.insert("value".into(), json!(" Ransomware "));
        assert_eq!(
            standard_id(EntityType::Label, &label).map(|id| id.to_string()),
            Ok("label--a71fc88e-ea57-532b-ac94-506e2232a4eb".to_string())
        );

        let mut phase = Attributes::new();
        phase.insert("phase_name".into(), json!("Persistence"));
        phase.insert("kill_chain_name".into(), json!("MITRE-ATTACK"));
        phase.insert("x_order".into(), json!(3));
        assert_eq!(
            standard_id(EntityType::KillChainPhase, &phase).map(|id| id.to_string()),
            Ok("kill-chain-phase--56330302-292c-5ad4-bece-bacaa99c16e0".to_string())
        );
    }

    #[test]
    fn standard_ids_require_identity_fields() {
        let mut attributes = Attributes::new();
        attributes.insert("value".into(), json!("  "));
        let failure = standard_id(EntityType::Label, &attributes).expect_err("blank identity");
        assert_eq!(failure.field, "value");
        assert_eq!(failure.reason, "missing_identity_field");

        let failure =
            standard_id(EntityType::KillChainPhase, &Attributes::new()).expect_err("missing");
        assert_eq!(failure.field, "kill_chain_name");
    }
}
