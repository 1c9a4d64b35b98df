//! Static tariff program catalog
//!
//! The only place program identity, sequencing and duty-math shape are
//! hard-wired. Numeric rates never live here; they come from the rate store.

use crate::models::{
    BaseEffect, BaseOn, CalculationType, CheckType, ConditionHandler, CountryScope,
    DisclaimBehavior, DutyRule, TariffProgram,
};
use lazy_static::lazy_static;

pub const SECTION_301: &str = "section_301";
pub const IEEPA_FENTANYL: &str = "ieepa_fentanyl";
pub const SECTION_232_COPPER: &str = "section_232_copper";
pub const SECTION_232_STEEL: &str = "section_232_steel";
pub const SECTION_232_ALUMINUM: &str = "section_232_aluminum";
pub const IEEPA_RECIPROCAL: &str = "ieepa_reciprocal";

/// Pseudo-program holding MFN base rates, used only for formula evaluation.
pub const MFN: &str = "mfn";

/// The Section 232 program family, in calculation order.
pub const SECTION_232_FAMILY: &[&str] = &[
    SECTION_232_COPPER,
    SECTION_232_STEEL,
    SECTION_232_ALUMINUM,
];

/// Material id handled by each 232 program.
pub fn material_for_program(program_id: &str) -> Option<&'static str> {
    match program_id {
        SECTION_232_COPPER => Some("copper"),
        SECTION_232_STEEL => Some("steel"),
        SECTION_232_ALUMINUM => Some("aluminum"),
        _ => None,
    }
}

pub fn program_for_material(material: &str) -> Option<&'static str> {
    match material {
        "copper" => Some(SECTION_232_COPPER),
        "steel" => Some(SECTION_232_STEEL),
        "aluminum" => Some(SECTION_232_ALUMINUM),
        _ => None,
    }
}

lazy_static! {
    static ref PROGRAMS: Vec<TariffProgram> = vec![
        TariffProgram {
            id: SECTION_301,
            display_name: "Section 301",
            country_scope: CountryScope::Countries(&["china"]),
            check_type: CheckType::HtsLookup,
            condition_handler: ConditionHandler::None,
            dependency_on: None,
            filing_sequence: 10,
            calculation_sequence: 10,
            disclaim_behavior: DisclaimBehavior::None,
        },
        TariffProgram {
            id: IEEPA_FENTANYL,
            display_name: "IEEPA Fentanyl",
            country_scope: CountryScope::Countries(&["china", "hong kong"]),
            check_type: CheckType::Always,
            condition_handler: ConditionHandler::None,
            dependency_on: None,
            filing_sequence: 20,
            calculation_sequence: 20,
            disclaim_behavior: DisclaimBehavior::None,
        },
        TariffProgram {
            id: SECTION_232_COPPER,
            display_name: "Section 232 Copper",
            country_scope: CountryScope::All,
            check_type: CheckType::HtsLookup,
            condition_handler: ConditionHandler::MaterialComposition,
            dependency_on: None,
            filing_sequence: 30,
            calculation_sequence: 30,
            disclaim_behavior: DisclaimBehavior::Required,
        },
        TariffProgram {
            id: SECTION_232_STEEL,
            display_name: "Section 232 Steel",
            country_scope: CountryScope::All,
            check_type: CheckType::HtsLookup,
            condition_handler: ConditionHandler::MaterialComposition,
            dependency_on: None,
            filing_sequence: 40,
            calculation_sequence: 40,
            disclaim_behavior: DisclaimBehavior::Required,
        },
        TariffProgram {
            id: SECTION_232_ALUMINUM,
            display_name: "Section 232 Aluminum",
            country_scope: CountryScope::All,
            check_type: CheckType::HtsLookup,
            condition_handler: ConditionHandler::MaterialComposition,
            dependency_on: None,
            filing_sequence: 50,
            calculation_sequence: 50,
            disclaim_behavior: DisclaimBehavior::Required,
        },
        TariffProgram {
            id: IEEPA_RECIPROCAL,
            display_name: "IEEPA Reciprocal",
            country_scope: CountryScope::All,
            check_type: CheckType::Always,
            condition_handler: ConditionHandler::Dependency,
            dependency_on: Some("section_232"),
            filing_sequence: 60,
            calculation_sequence: 60,
            disclaim_behavior: DisclaimBehavior::Omit,
        },
    ];
    static ref DUTY_RULES: Vec<DutyRule> = vec![
        DutyRule {
            program_id: SECTION_301,
            calculation_type: CalculationType::Additive,
            base_on: BaseOn::ProductValue,
            content_key: None,
            fallback_base_on: None,
            base_effect: None,
        },
        DutyRule {
            program_id: IEEPA_FENTANYL,
            calculation_type: CalculationType::Additive,
            base_on: BaseOn::ProductValue,
            content_key: None,
            fallback_base_on: None,
            base_effect: None,
        },
        DutyRule {
            program_id: SECTION_232_COPPER,
            calculation_type: CalculationType::Additive,
            base_on: BaseOn::ContentValue,
            content_key: Some("copper"),
            fallback_base_on: Some(BaseOn::ProductValue),
            base_effect: Some(BaseEffect::SubtractFromRemaining),
        },
        DutyRule {
            program_id: SECTION_232_STEEL,
            calculation_type: CalculationType::Additive,
            base_on: BaseOn::ContentValue,
            content_key: Some("steel"),
            fallback_base_on: Some(BaseOn::ProductValue),
            base_effect: Some(BaseEffect::SubtractFromRemaining),
        },
        DutyRule {
            program_id: SECTION_232_ALUMINUM,
            calculation_type: CalculationType::Additive,
            base_on: BaseOn::ContentValue,
            content_key: Some("aluminum"),
            fallback_base_on: Some(BaseOn::ProductValue),
            base_effect: Some(BaseEffect::SubtractFromRemaining),
        },
        DutyRule {
            program_id: IEEPA_RECIPROCAL,
            calculation_type: CalculationType::Additive,
            base_on: BaseOn::RemainingValue,
            content_key: None,
            fallback_base_on: None,
            base_effect: None,
        },
    ];
}

pub fn programs() -> &'static [TariffProgram] {
    &PROGRAMS
}

pub fn program(id: &str) -> Option<&'static TariffProgram> {
    PROGRAMS.iter().find(|p| p.id == id)
}

pub fn duty_rule(program_id: &str) -> Option<&'static DutyRule> {
    DUTY_RULES.iter().find(|r| r.program_id == program_id)
}

/// Lowercased, trimmed country name used for scope matching and group lookup.
pub fn normalize_country(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn scope_matches(scope: &CountryScope, country: &str, group: Option<&str>) -> bool {
    match scope {
        CountryScope::All => true,
        CountryScope::Countries(list) => list.contains(&country),
        CountryScope::Group(g) => group == Some(*g),
    }
}

/// Programs in scope for a country, sorted by filing sequence.
pub fn programs_for_country(country: &str, group: Option<&str>) -> Vec<&'static TariffProgram> {
    let mut hits: Vec<&TariffProgram> = PROGRAMS
        .iter()
        .filter(|p| scope_matches(&p.country_scope, country, group))
        .collect();
    hits.sort_by_key(|p| p.filing_sequence);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_program_has_a_duty_rule() {
        for p in programs() {
            assert!(duty_rule(p.id).is_some(), "missing duty rule for {}", p.id);
        }
    }

    #[test]
    fn test_filing_sequence_is_a_total_order() {
        // No ties within any country scope; the global list is itself tie-free.
        let mut seen = HashSet::new();
        for p in programs() {
            assert!(
                seen.insert(p.filing_sequence),
                "filing sequence tie at {}",
                p.filing_sequence
            );
        }
    }

    #[test]
    fn test_232_precedes_reciprocal_in_calculation_order() {
        let reciprocal = program(IEEPA_RECIPROCAL).unwrap();
        for id in SECTION_232_FAMILY {
            let p = program(id).unwrap();
            assert!(p.calculation_sequence < reciprocal.calculation_sequence);
        }
    }

    #[test]
    fn test_scope_matching() {
        let s301 = program(SECTION_301).unwrap();
        assert!(scope_matches(&s301.country_scope, "china", None));
        assert!(!scope_matches(&s301.country_scope, "germany", Some("eu")));

        let recip = program(IEEPA_RECIPROCAL).unwrap();
        assert!(scope_matches(&recip.country_scope, "germany", Some("eu")));
    }

    #[test]
    fn test_china_program_selection_ordering() {
        let hits = programs_for_country("china", Some("cn"));
        let ids: Vec<&str> = hits.iter().map(|p| p.id).collect();
        assert_eq!(
            ids,
            vec![
                SECTION_301,
                IEEPA_FENTANYL,
                SECTION_232_COPPER,
                SECTION_232_STEEL,
                SECTION_232_ALUMINUM,
                IEEPA_RECIPROCAL,
            ]
        );
    }
}
