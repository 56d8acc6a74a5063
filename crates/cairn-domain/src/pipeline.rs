//! Ordered attribute transformation steps applied before every write.

use cairn_core::{Attributes, EntityType};
use serde_json::Value;

use crate::normalize::{normalize_name, normalize_value, string_to_colour};

/// Attribute that failed a pipeline step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Attribute name.
    pub field: String,
    /// Machine-readable reason.
    pub reason: &'static str,
}

impl ValidationFailure {
    /// Failure for `field` with the given reason.
    #[must_use]
    pub fn new(field: impl Into<String>, reason: &'static str) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }
}

/// A single pure transformation or check over an attribute map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeStep {
    /// Trim and collapse whitespace in a string attribute, optionally lower-casing it.
    Normalize {
        /// Attribute to rewrite.
        field: &'static str,
        /// Whether to lower-case the value.
        fold_case: bool,
    },
    /// Fill `target` with the colour derived from `source` when it is absent or blank.
    DeriveColor {
        /// Attribute hashed into the colour.
        source: &'static str,
        /// Attribute receiving the colour.
        target: &'static str,
    },
    /// Reject missing or blank values.
    Require {
        /// Attribute that must be present.
        field: &'static str,
    },
    /// Accept only `#rrggbb` colours, stored lower-case.
    ValidateColor {
        /// Attribute holding the colour.
        field: &'static str,
    },
    /// Fill a numeric attribute with `value` when absent.
    DefaultNumber {
        /// Attribute to default.
        field: &'static str,
        /// Value used when the attribute is missing.
        value: i64,
    },
}

impl AttributeStep {
    fn apply(&self, attributes: &mut Attributes) -> Result<(), ValidationFailure> {
        match *self {
            Self::Normalize { field, fold_case } => match attributes.get_mut(field) {
                None | Some(Value::Null) => Ok(()),
                Some(Value::String(text)) => {
                    *text = if fold_case {
                        normalize_value(text)
                    } else {
                        normalize_name(text)
                    };
                    Ok(())
                }
                Some(_) => Err(ValidationFailure::new(field, "expected_string")),
            },
            Self::DeriveColor { source, target } => {
                let blank = match attributes.get(target) {
                    None | Some(Value::Null) => true,
                    Some(Value::String(text)) => text.trim().is_empty(),
                    Some(_) => false,
                };
                if blank && let Some(seed) = attributes.get(source).and_then(Value::as_str) {
                    let colour = string_to_colour(seed);
                    attributes.insert(target.to_string(), Value::String(colour));
                }
                Ok(())
            }
            Self::Require { field } => match attributes.get(field) {
                Some(Value::String(text)) if !text.is_empty() => Ok(()),
                Some(Value::String(_)) | None | Some(Value::Null) => {
                    Err(ValidationFailure::new(field, "required"))
                }
                Some(_) => Err(ValidationFailure::new(field, "expected_string")),
            },
            Self::ValidateColor { field } => match attributes.get_mut(field) {
                None => Ok(()),
                Some(Value::String(text)) if is_hex_colour(text.trim()) => {
                    *text = text.trim().to_ascii_lowercase();
                    Ok(())
                }
                Some(_) => Err(ValidationFailure::new(field, "invalid_color")),
            },
            Self::DefaultNumber { field, value } => match attributes.get(field) {
                None | Some(Value::Null) => {
                    attributes.insert(field.to_string(), Value::from(value));
                    Ok(())
                }
                Some(Value::Number(_)) => Ok(()),
                Some(_) => Err(ValidationFailure::new(field, "expected_number")),
            },
        }
    }
}

fn is_hex_colour(text: &str) -> bool {
    text.strip_prefix('#')
        .is_some_and(|digits| digits.len() == 6 && digits.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Per-type ordered sequence of [`AttributeStep`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePipeline {
    entity_type: EntityType,
    steps: Vec<AttributeStep>,
}

impl AttributePipeline {
    /// Pipeline owned by `entity_type`.
    #[must_use]
    pub fn for_type(entity_type: EntityType) -> Self {
        let steps = match entity_type {
            EntityType::Label => vec![
                AttributeStep::Normalize {
                    field: "value",
                    fold_case: true,
                },
                AttributeStep::DeriveColor {
                    source: "value",
                    target: "color",
                },
                AttributeStep::Require { field: "value" },
                AttributeStep::ValidateColor { field: "color" },
            ],
            EntityType::KillChainPhase => vec![
                AttributeStep::Normalize {
                    field: "kill_chain_name",
                    fold_case: false,
                },
                AttributeStep::Normalize {
                    field: "phase_name",
                    fold_case: false,
                },
                AttributeStep::Require {
                    field: "kill_chain_name",
                },
                AttributeStep::Require {
                    field: "phase_name",
                },
                AttributeStep::DefaultNumber {
                    field: "x_order",
                    value: 0,
                },
            ],
        };
        Self { entity_type, steps }
    }

    /// Entity type the pipeline belongs to.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Steps in application order.
    #[must_use]
    pub fn steps(&self) -> &[AttributeStep] {
        &self.steps
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationFailure`] of the first failing step; the map may
    /// be partially rewritten and must be discarded.
    pub fn apply(&self, attributes: &mut Attributes) -> Result<(), ValidationFailure> {
        self.steps.iter().try_for_each(|step| step.apply(attributes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attributes(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => Attributes::new(),
        }
    }

    #[test]
    fn label_pipeline_normalizes_and_derives_colour() {
        let pipeline = AttributePipeline::for_type(EntityType::Label);
        let mut label = attributes(json!({ "value": "  Ransomware " }));
        pipeline.apply(&mut label).expect("valid label");
        assert_eq!(label.get("value"), Some(&json!("ransomware")));
        assert_eq!(label.get("color"), Some(&json!("#8fd671")));

        let mut blank_colour = attributes(json!({ "value": "phishing", "color": " " }));
        pipeline.apply(&mut blank_colour).expect("blank colour derived");
        assert_eq!(blank_colour.get("color"), Some(&json!("#9cfabd")));
    }

    #[test]
    fn label_pipeline_keeps_and_checks_explicit_colour() {
        let pipeline = AttributePipeline::for_type(EntityType::Label);
        let mut label = attributes(json!({ "value": "apt", "color": "#ABCDEF" }));
        pipeline.apply(&mut label).expect("valid colour");
        assert_eq!(label.get("color"), Some(&json!("#abcdef")));

        let mut bad = attributes(json!({ "value": "apt", "color": "red" }));
        assert_eq!(
            pipeline.apply(&mut bad),
            Err(ValidationFailure::new("color", "invalid_color"))
        );
    }

    #[test]
    fn label_pipeline_requires_value() {
        let pipeline = AttributePipeline::for_type(EntityType::Label);
        let mut missing = Attributes::new();
        assert_eq!(
            pipeline.apply(&mut missing),
            Err(ValidationFailure::new("value", "required"))
        );

        let mut blank = attributes(json!({ "value": "   " }));
        assert_eq!(
            pipeline.apply(&mut blank),
            Err(ValidationFailure::new("value", "required"))
        );

        let mut number = attributes(json!({ "value": 7 }));
        assert_eq!(
            pipeline.apply(&mut number),
            Err(ValidationFailure::new("value", "expected_string"))
        );
    }

    #[test]
    fn kill_chain_phase_pipeline_defaults_order() {
        let pipeline = AttributePipeline::for_type(EntityType::KillChainPhase);
        assert_eq!(pipeline.entity_type(), EntityType::KillChainPhase);

        let mut phase = attributes(json!({
            "kill_chain_name": " mitre-attack ",
            "phase_name": "Initial   Access",
        }));
        pipeline.apply(&mut phase).expect("valid phase");
        assert_eq!(phase.get("kill_chain_name"), Some(&json!("mitre-attack")));
        assert_eq!(phase.get("phase_name"), Some(&json!("Initial Access")));
        assert_eq!(phase.get("x_order"), Some(&json!(0)));

        let mut bad_order = attributes(json!({
            "kill_chain_name": "lockheed",
            "phase_name": "recon",
            "x_order": "first",
        }));
        assert_eq!(
            pipeline.apply(&mut bad_order),
            Err(ValidationFailure::new("x_order", "expected_number"))
        );
    }
}
