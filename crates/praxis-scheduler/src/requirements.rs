//! Asset requirement analysis.
//!
//! Turns a protocol definition plus user parameters into the resolved
//! list of assets a run needs exclusive use of. Pure derivation, no side
//! effects or discovery; by this point every requirement names a concrete,
//! reservable resource.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use praxis_core::{JsonMap, ProtocolDefinition};

/// Asset type assigned to a synthesized deck requirement.
const DECK_ASSET_TYPE: &str = "deck";

/// A named, typed demand for a resource, immutable for the lifetime of
/// one scheduling attempt apart from the reservation stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRequirement {
    pub name: String,
    pub asset_type: String,
    #[serde(default)]
    pub constraints: JsonMap,
    #[serde(default)]
    pub optional: bool,
    /// Reservation identifier, recorded once the asset is held.
    #[serde(default)]
    pub reservation: Option<String>,
}

impl AssetRequirement {
    pub fn new(name: impl Into<String>, asset_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            asset_type: asset_type.into(),
            constraints: JsonMap::new(),
            optional: false,
            reservation: None,
        }
    }

    /// Deterministic reservation key for this requirement.
    pub fn asset_key(&self) -> String {
        format!("asset:{}", self.name)
    }
}

/// Derive the requirement list for one scheduling attempt.
///
/// One requirement per declared asset; if the protocol requires a
/// pre-configured deck and names a deck parameter, one extra deck
/// requirement is synthesized from that parameter's value (falling back
/// to the parameter name when the caller did not supply it).
pub fn analyze_protocol_requirements(
    definition: &ProtocolDefinition,
    params: &JsonMap,
) -> Vec<AssetRequirement> {
    let mut requirements: Vec<AssetRequirement> = definition
        .assets
        .iter()
        .map(|decl| AssetRequirement {
            name: decl.name.clone(),
            asset_type: decl.asset_type.clone(),
            constraints: decl.constraints.clone(),
            optional: decl.optional,
            reservation: None,
        })
        .collect();

    if definition.requires_deck {
        if let Some(param) = &definition.deck_param {
            let deck_name = match params.get(param) {
                Some(Value::String(name)) => name.clone(),
                _ => param.clone(),
            };
            requirements.push(AssetRequirement::new(deck_name, DECK_ASSET_TYPE));
        }
    }

    requirements
}

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_core::AssetDeclaration;
    use serde_json::json;

    fn definition_with_assets() -> ProtocolDefinition {
        let mut def = ProtocolDefinition::new("serial_dilution");
        def.assets.push(AssetDeclaration::new("ot2_1", "liquid_handler"));
        def.assets.push(AssetDeclaration::new("plate_96", "plate"));
        def
    }

    #[test]
    fn empty_protocol_needs_nothing() {
        let def = ProtocolDefinition::new("noop");
        let requirements = analyze_protocol_requirements(&def, &JsonMap::new());
        assert!(requirements.is_empty());
    }

    #[test]
    fn one_requirement_per_declared_asset() {
        let requirements =
            analyze_protocol_requirements(&definition_with_assets(), &JsonMap::new());
        assert_eq!(requirements.len(), 2);
        assert_eq!(requirements[0].name, "ot2_1");
        assert_eq!(requirements[0].asset_type, "liquid_handler");
        assert!(requirements.iter().all(|r| r.reservation.is_none()));
    }

    #[test]
    fn deck_requirement_synthesized_from_param_value() {
        let mut def = definition_with_assets();
        def.requires_deck = true;
        def.deck_param = Some("deck".to_string());

        let mut params = JsonMap::new();
        params.insert("deck".to_string(), json!("deck_main"));

        let requirements = analyze_protocol_requirements(&def, &params);
        assert_eq!(requirements.len(), 3);
        let deck = requirements.last().unwrap();
        assert_eq!(deck.name, "deck_main");
        assert_eq!(deck.asset_type, "deck");
    }

    #[test]
    fn deck_param_missing_falls_back_to_param_name() {
        let mut def = ProtocolDefinition::new("deck_only");
        def.requires_deck = true;
        def.deck_param = Some("deck".to_string());

        let requirements = analyze_protocol_requirements(&def, &JsonMap::new());
        assert_eq!(requirements.len(), 1);
        assert_eq!(requirements[0].name, "deck");
    }

    #[test]
    fn no_deck_requirement_without_declaration() {
        let mut def = definition_with_assets();
        def.requires_deck = true; // but no deck_param named
        let requirements = analyze_protocol_requirements(&def, &JsonMap::new());
        assert_eq!(requirements.len(), 2);
    }

    #[test]
    fn asset_key_is_deterministic() {
        let req = AssetRequirement::new("ot2_1", "liquid_handler");
        assert_eq!(req.asset_key(), "asset:ot2_1");
    }
}
