//! Chapter-99 special program code resolver
//!
//! The one place code-to-program knowledge is hard-wired. Numeric duty rates
//! still come from the rate store; `default_rate` here is only a hint used
//! when a document announces a code without stating a rate.

use crate::catalog;
use crate::models::hts_chapter;
use lazy_static::lazy_static;

/// What a Chapter-99 code means.
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter99Info {
    pub code: &'static str,
    pub program_id: &'static str,
    /// List, variant or claim/disclaim label within the program.
    pub subprogram: &'static str,
    /// Material sector for 232 codes (`steel_primary`, `copper_derivative`, ...).
    pub sector: Option<&'static str>,
    pub default_rate: Option<f64>,
}

lazy_static! {
    static ref CODE_TABLE: Vec<Chapter99Info> = vec![
        // Section 301 lists
        info("9903.88.01", catalog::SECTION_301, "list_1", None, Some(0.25)),
        info("9903.88.02", catalog::SECTION_301, "list_2", None, Some(0.25)),
        info("9903.88.03", catalog::SECTION_301, "list_3", None, Some(0.25)),
        info("9903.88.04", catalog::SECTION_301, "list_4a", None, Some(0.075)),
        info("9903.88.15", catalog::SECTION_301, "list_4a", None, Some(0.075)),
        // Section 301 exclusions
        info("9903.88.69", catalog::SECTION_301, "exclusion", None, Some(0.0)),
        info("9903.88.70", catalog::SECTION_301, "exclusion", None, Some(0.0)),
        // IEEPA Fentanyl
        info("9903.01.24", catalog::IEEPA_FENTANYL, "standard", None, Some(0.10)),
        // IEEPA Reciprocal variants
        info("9903.01.25", catalog::IEEPA_RECIPROCAL, "standard", None, Some(0.10)),
        info("9903.01.32", catalog::IEEPA_RECIPROCAL, "annex_ii_exempt", None, Some(0.0)),
        info("9903.01.33", catalog::IEEPA_RECIPROCAL, "standard", None, Some(0.10)),
        info("9903.01.34", catalog::IEEPA_RECIPROCAL, "us_content_exempt", None, Some(0.0)),
        info("9903.01.35", catalog::IEEPA_RECIPROCAL, "section_232_exempt", None, Some(0.0)),
        // Section 232 copper (same claim/disclaim pair for semis and derivatives)
        info("9903.78.01", catalog::SECTION_232_COPPER, "claim", Some("copper_primary"), Some(0.50)),
        info("9903.78.02", catalog::SECTION_232_COPPER, "disclaim", Some("copper_primary"), Some(0.0)),
        // Section 232 steel
        info("9903.81.87", catalog::SECTION_232_STEEL, "claim", Some("steel_primary"), Some(0.50)),
        info("9903.81.88", catalog::SECTION_232_STEEL, "disclaim", Some("steel_primary"), Some(0.0)),
        info("9903.80.01", catalog::SECTION_232_STEEL, "claim", Some("steel_derivative"), Some(0.50)),
        info("9903.80.02", catalog::SECTION_232_STEEL, "disclaim", Some("steel_derivative"), Some(0.0)),
        // Section 232 aluminum
        info("9903.85.02", catalog::SECTION_232_ALUMINUM, "claim", Some("aluminum_primary"), Some(0.25)),
        info("9903.85.03", catalog::SECTION_232_ALUMINUM, "disclaim", Some("aluminum_primary"), Some(0.0)),
        info("9903.85.08", catalog::SECTION_232_ALUMINUM, "claim", Some("aluminum_derivative"), Some(0.25)),
        info("9903.85.09", catalog::SECTION_232_ALUMINUM, "disclaim", Some("aluminum_derivative"), Some(0.0)),
    ];
}

fn info(
    code: &'static str,
    program_id: &'static str,
    subprogram: &'static str,
    sector: Option<&'static str>,
    default_rate: Option<f64>,
) -> Chapter99Info {
    Chapter99Info {
        code,
        program_id,
        subprogram,
        sector,
        default_rate,
    }
}

/// Resolve an exact Chapter-99 code.
pub fn resolve(code: &str) -> Option<&'static Chapter99Info> {
    CODE_TABLE.iter().find(|i| i.code == code)
}

/// Scan a narrative context for the first Chapter-99 code and resolve it.
/// Returns None when no exact, known code is extractable from the text.
pub fn resolve_in_text(text: &str) -> Option<&'static Chapter99Info> {
    extract_code(text).and_then(|c| resolve(&c))
}

/// Pull the first `99xx.xx.xx` token out of free text. Hand-rolled scan;
/// the shape is fixed so no pattern engine is needed.
pub fn extract_code(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 10 <= bytes.len() {
        if bytes[i] == b'9'
            && bytes[i + 1] == b'9'
            && bytes[i + 2].is_ascii_digit()
            && bytes[i + 3].is_ascii_digit()
            && bytes[i + 4] == b'.'
            && bytes[i + 5].is_ascii_digit()
            && bytes[i + 6].is_ascii_digit()
            && bytes[i + 7] == b'.'
            && bytes[i + 8].is_ascii_digit()
            && bytes[i + 9].is_ascii_digit()
        {
            // Reject when embedded in a longer digit run (e.g. part of an
            // HTS-10 code or a larger number).
            let left_ok = i == 0 || !bytes[i - 1].is_ascii_digit();
            let right_ok = i + 10 >= bytes.len() || !bytes[i + 10].is_ascii_digit();
            if left_ok && right_ok {
                return Some(text[i..i + 10].to_string());
            }
        }
        i += 1;
    }
    None
}

/// Claim/disclaim code pair for a 232 material, narrowed by HTS chapter.
/// Primary chapters (72-73 steel, 74 copper, 76 aluminum) take the primary
/// pair; every other chapter takes the derivative pair.
pub fn material_code_pair(material: &str, hts: &str) -> Option<(&'static str, &'static str)> {
    let chapter = hts_chapter(hts)?;
    let sector = match (material, chapter) {
        ("steel", 72) | ("steel", 73) => "steel_primary",
        ("steel", _) => "steel_derivative",
        ("aluminum", 76) => "aluminum_primary",
        ("aluminum", _) => "aluminum_derivative",
        ("copper", _) => "copper_primary",
        _ => return None,
    };

    let claim = CODE_TABLE
        .iter()
        .find(|i| i.sector == Some(sector) && i.subprogram == "claim")?;
    let disclaim = CODE_TABLE
        .iter()
        .find(|i| i.sector == Some(sector) && i.subprogram == "disclaim")?;
    Some((claim.code, disclaim.code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_exact_code() {
        let i = resolve("9903.88.03").unwrap();
        assert_eq!(i.program_id, catalog::SECTION_301);
        assert_eq!(i.subprogram, "list_3");

        assert!(resolve("9903.99.99").is_none());
    }

    #[test]
    fn test_resolve_in_narrative_context() {
        let text = "Additional duties under heading 9903.88.03 apply to products of China.";
        let i = resolve_in_text(text).unwrap();
        assert_eq!(i.code, "9903.88.03");

        assert!(resolve_in_text("no code in this sentence").is_none());
        // Extractable shape but unknown code resolves to nothing.
        assert!(resolve_in_text("see heading 9903.42.42 for details").is_none());
    }

    #[test]
    fn test_extract_code_ignores_embedded_digit_runs() {
        assert_eq!(extract_code("rate at 9903.01.24 now"), Some("9903.01.24".into()));
        // Part of a longer digit run on the right.
        assert!(extract_code("9903.01.245").is_none());
    }

    #[test]
    fn test_material_pair_narrows_by_chapter() {
        // Chapter 85 cable: derivative codes.
        assert_eq!(
            material_code_pair("steel", "85444290"),
            Some(("9903.80.01", "9903.80.02"))
        );
        assert_eq!(
            material_code_pair("aluminum", "85444290"),
            Some(("9903.85.08", "9903.85.09"))
        );
        // Chapter 72 flat-rolled steel: primary codes.
        assert_eq!(
            material_code_pair("steel", "72081000"),
            Some(("9903.81.87", "9903.81.88"))
        );
        assert_eq!(
            material_code_pair("copper", "85444290"),
            Some(("9903.78.01", "9903.78.02"))
        );
        assert!(material_code_pair("titanium", "85444290").is_none());
    }
}
