//! Tariff stacking evaluator
//!
//! The request-time hot path. A straight-line pass over the in-scope
//! programs threads a small accumulator through inclusion, exclusion,
//! condition handling and line splitting, then runs the duty math in
//! calculation-sequence order with 232 unstacking. The evaluator is a pure
//! function of the rate store at read time: it performs synchronous reads
//! only and never mutates anything.

use crate::catalog::{self, IEEPA_RECIPROCAL, SECTION_301};
use crate::models::{
    BaseEffect, BreakdownItem, CheckType, ConditionHandler, Decision, EvaluationRequest,
    EvaluationResult, FilingLine, LineAction, MaterialInput, RateRole, RateSubject,
    ReciprocalVariant, SplitPolicy, SplitType, TariffProgram, Unstacking, ValueSource,
    normalize_hts,
};
use crate::store::TariffStore;
use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Caller-fault input problem. The API layer downcasts to this to emit
/// MISSING_INPUT instead of INTERNAL_ERROR.
#[derive(Debug)]
pub struct InputError(pub String);

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for InputError {}

/// Annex-II membership fallback used when the feature flag disables the
/// rate-store check.
const ANNEX_II_STATIC: &[&str] = &["30049092", "84733051", "85423100"];

/// How a pending line's duty base is chosen during the calculation pass.
#[derive(Debug, Clone)]
enum BaseSpec {
    Product,
    Remaining,
    /// Material content; `value` is None when the declared value was
    /// unknown and the fallback penalty applies.
    Content {
        material: String,
        value: Option<f64>,
    },
    /// Disclaim/skip/exclude lines contribute nothing.
    Zero,
}

/// A filing line plus the calculation metadata the duty pass needs.
#[derive(Debug, Clone)]
struct PendingLine {
    program_id: String,
    program_name: String,
    calc_seq: u32,
    action: LineAction,
    chapter99_code: String,
    line_value: f64,
    material: Option<String>,
    material_quantity_kg: Option<f64>,
    split_type: Option<SplitType>,
    duty_rate: f64,
    rate_source: String,
    base: BaseSpec,
}

pub struct Evaluator<'a> {
    store: &'a TariffStore,
    annex_ii_from_db: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(store: &'a TariffStore) -> Self {
        Self {
            store,
            annex_ii_from_db: true,
        }
    }

    pub fn with_annex_ii_from_db(store: &'a TariffStore, annex_ii_from_db: bool) -> Self {
        Self {
            store,
            annex_ii_from_db,
        }
    }

    pub fn evaluate(&self, req: &EvaluationRequest) -> Result<EvaluationResult> {
        if req.country.trim().is_empty() {
            bail!(InputError("country is required".into()));
        }
        if !(req.product_value > 0.0) {
            bail!(InputError("product_value must be positive".into()));
        }

        let import_date = req
            .import_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let product_value = req.product_value;

        let mut decisions: Vec<Decision> = Vec::new();
        let mut flags: Vec<String> = Vec::new();

        // HTS normalization: dots stripped, 8-digit key, no short-code
        // fallback.
        let Some((hts8, full_digits)) = normalize_hts(&req.hts_code) else {
            decisions.push(Decision {
                step: "hts_normalization".into(),
                program_id: String::new(),
                decision: "rejected".into(),
                reason: format!("unrecognized HTS code: {}", req.hts_code),
                source_doc: None,
            });
            flags.push("unknown_hts".into());
            return Ok(empty_result(product_value, decisions, flags));
        };
        let hts10 = if full_digits.len() >= 10 {
            Some(full_digits[..10].to_string())
        } else {
            None
        };

        if let Some(materials) = &req.materials {
            let declared_sum: f64 = materials
                .values()
                .filter_map(|m| m.content_value(product_value))
                .sum();
            if declared_sum > product_value + 1e-9 {
                bail!(InputError(format!(
                    "material content {} exceeds product value {}",
                    declared_sum, product_value
                )));
            }
        }

        let country = catalog::normalize_country(&req.country);
        let group = self.store.group_for_country(&country)?;

        // Step 1: program discovery, filing-sequence order.
        let programs = catalog::programs_for_country(&country, group.as_deref());
        debug!(
            hts8 = %hts8,
            country = %country,
            programs = programs.len(),
            "evaluating stack"
        );

        // Step 2: per-program decision loop.
        let mut lines: Vec<PendingLine> = Vec::new();
        let mut claimed_content: HashMap<String, f64> = HashMap::new();

        for program in &programs {
            match program.condition_handler {
                ConditionHandler::None => self.decide_simple(
                    program,
                    &hts8,
                    hts10.as_deref(),
                    &country,
                    group.as_deref(),
                    import_date,
                    &mut lines,
                    &mut decisions,
                    &mut flags,
                )?,
                ConditionHandler::MaterialComposition => self.decide_material(
                    program,
                    &hts8,
                    hts10.as_deref(),
                    import_date,
                    product_value,
                    req.materials.as_ref(),
                    &mut lines,
                    &mut decisions,
                    &mut flags,
                    &mut claimed_content,
                )?,
                ConditionHandler::Dependency => self.decide_reciprocal(
                    program,
                    &hts8,
                    &country,
                    group.as_deref(),
                    import_date,
                    product_value,
                    &claimed_content,
                    req.materials.as_ref(),
                    &mut lines,
                    &mut decisions,
                    &mut flags,
                )?,
            }
        }

        // Step 4: duty calculation in calculation-sequence order.
        let mut order: Vec<usize> = (0..lines.len()).collect();
        order.sort_by_key(|&i| (lines[i].calc_seq, i));

        let mut remaining_value = product_value;
        let mut total_duty = 0.0;
        let mut processed_materials: HashSet<String> = HashSet::new();
        let mut content_deductions: HashMap<String, f64> = HashMap::new();
        let mut reciprocal_base: Option<f64> = None;
        let mut breakdown: Vec<BreakdownItem> = Vec::new();

        for &i in &order {
            let line = &lines[i];
            let rule = catalog::duty_rule(&line.program_id);

            let (base_value, value_source) = match &line.base {
                BaseSpec::Zero => continue,
                BaseSpec::Product => (product_value, ValueSource::ProductValue),
                BaseSpec::Remaining => {
                    reciprocal_base = Some(remaining_value);
                    (remaining_value, ValueSource::RemainingValue)
                }
                BaseSpec::Content { material, value } => {
                    if processed_materials.contains(material) {
                        // Already taxed in this run: contributes nothing.
                        (0.0, ValueSource::ContentValue)
                    } else {
                        processed_materials.insert(material.clone());
                        match value {
                            Some(content) => {
                                let subtracts = rule
                                    .map(|r| {
                                        matches!(
                                            r.base_effect,
                                            Some(BaseEffect::SubtractFromRemaining)
                                        )
                                    })
                                    .unwrap_or(false);
                                if subtracts {
                                    let deduction = content.min(remaining_value);
                                    remaining_value -= deduction;
                                    content_deductions.insert(material.clone(), deduction);
                                }
                                (*content, ValueSource::ContentValue)
                            }
                            None => {
                                // Penalty: unknown content falls back to the
                                // full product value.
                                (product_value, ValueSource::FallbackToProduct)
                            }
                        }
                    }
                }
            };

            let amount = base_value * line.duty_rate;
            total_duty += amount;
            breakdown.push(BreakdownItem {
                program_id: line.program_id.clone(),
                material: line.material.clone(),
                base_value,
                value_source,
                rate: line.duty_rate,
                rate_source: line.rate_source.clone(),
                amount,
            });
        }

        // Step 5: effective rate from the stacked total, not the sum of
        // program rates.
        let effective_rate = total_duty / product_value;
        let material_content_value: f64 = content_deductions.values().sum();

        let filing_lines = lines
            .into_iter()
            .enumerate()
            .map(|(i, l)| FilingLine {
                sequence: (i + 1) as u32,
                program_id: l.program_id,
                program_name: l.program_name,
                action: l.action,
                chapter99_code: l.chapter99_code,
                base_hts_code: full_digits.clone(),
                line_value: l.line_value,
                line_quantity: None,
                material: l.material,
                material_quantity_kg: l.material_quantity_kg,
                split_type: l.split_type,
                duty_rate: l.duty_rate,
            })
            .collect();

        Ok(EvaluationResult {
            filing_lines,
            breakdown,
            total_duty_amount: total_duty,
            total_duty_percent: effective_rate * 100.0,
            effective_rate,
            unstacking: Unstacking {
                material_content_value,
                content_deductions,
                remaining_value,
                reciprocal_base,
            },
            decisions,
            flags,
        })
    }

    /// Programs with no extra condition: Section 301 and IEEPA Fentanyl.
    #[allow(clippy::too_many_arguments)]
    fn decide_simple(
        &self,
        program: &TariffProgram,
        hts8: &str,
        hts10: Option<&str>,
        country: &str,
        group: Option<&str>,
        import_date: NaiveDate,
        lines: &mut Vec<PendingLine>,
        decisions: &mut Vec<Decision>,
        flags: &mut Vec<String>,
    ) -> Result<()> {
        let subject = match program.check_type {
            CheckType::HtsLookup => RateSubject::for_hts_full(hts8, hts10),
            CheckType::Always => RateSubject {
                country: Some(country.to_string()),
                country_group: group.map(|g| g.to_string()),
                variant: Some("standard".to_string()),
                ..Default::default()
            },
        };

        let Some(row) = self.store.as_of(program.id, &subject, import_date)? else {
            let reason = match program.check_type {
                CheckType::HtsLookup => format!("{} not enumerated for this program", hts8),
                CheckType::Always => format!("no rate row for {} at {}", country, import_date),
            };
            decisions.push(Decision {
                step: "inclusion".into(),
                program_id: program.id.to_string(),
                decision: "skip".into(),
                reason,
                source_doc: None,
            });
            return Ok(());
        };

        // Exclusion wins: the line is still filed, at rate zero, under the
        // exclusion code.
        if row.role == RateRole::Exclude {
            decisions.push(Decision {
                step: "exclusion".into(),
                program_id: program.id.to_string(),
                decision: "exclude".into(),
                reason: format!("exclusion {} in effect", row.chapter99_code),
                source_doc: row.source_document_id.clone(),
            });
            lines.push(PendingLine {
                program_id: program.id.to_string(),
                program_name: program.display_name.to_string(),
                calc_seq: program.calculation_sequence,
                action: LineAction::Exclude,
                chapter99_code: row.chapter99_code,
                line_value: 0.0,
                material: None,
                material_quantity_kg: None,
                split_type: None,
                duty_rate: 0.0,
                rate_source: "exclusion".into(),
                base: BaseSpec::Zero,
            });
            return Ok(());
        }

        let (rate, rate_source) =
            self.resolve_rate(program, &row, hts8, country, group, import_date, flags)?;

        decisions.push(Decision {
            step: "inclusion".into(),
            program_id: program.id.to_string(),
            decision: "apply".into(),
            reason: format!("{} at {}", row.chapter99_code, rate),
            source_doc: row.source_document_id.clone(),
        });
        lines.push(PendingLine {
            program_id: program.id.to_string(),
            program_name: program.display_name.to_string(),
            calc_seq: program.calculation_sequence,
            action: LineAction::Apply,
            chapter99_code: row.chapter99_code,
            line_value: 0.0,
            material: None,
            material_quantity_kg: None,
            split_type: None,
            duty_rate: rate,
            rate_source,
            base: BaseSpec::Product,
        });
        Ok(())
    }

    /// Section 232 material composition: thresholds, claim/disclaim, line
    /// splitting, fallback penalty.
    #[allow(clippy::too_many_arguments)]
    fn decide_material(
        &self,
        program: &TariffProgram,
        hts8: &str,
        hts10: Option<&str>,
        import_date: NaiveDate,
        product_value: f64,
        materials: Option<&HashMap<String, MaterialInput>>,
        lines: &mut Vec<PendingLine>,
        decisions: &mut Vec<Decision>,
        flags: &mut Vec<String>,
        claimed_content: &mut HashMap<String, f64>,
    ) -> Result<()> {
        let Some(material_id) = catalog::material_for_program(program.id) else {
            return Ok(());
        };

        let rows = self.store.materials_for_hts(hts8, hts10, import_date)?;
        let Some(rule) = rows.into_iter().find(|m| m.material == material_id) else {
            decisions.push(Decision {
                step: "inclusion".into(),
                program_id: program.id.to_string(),
                decision: "skip".into(),
                reason: format!("no {} coverage for {}", material_id, hts8),
                source_doc: None,
            });
            return Ok(());
        };

        let declared = materials.and_then(|m| m.get(material_id));
        let content_value = declared.and_then(|m| m.content_value(product_value));
        let mass_kg = declared.and_then(|m| m.mass_kg());

        let Some(content_value) = content_value else {
            // Unknown content with a material program present: penalty
            // fallback to the full product value, never a failure.
            flags.push(format!("fallback_applied_for_{}", material_id));
            decisions.push(Decision {
                step: "condition".into(),
                program_id: program.id.to_string(),
                decision: "claim".into(),
                reason: format!(
                    "{} content undeclared; duty assessed on full product value",
                    material_id
                ),
                source_doc: None,
            });
            lines.push(PendingLine {
                program_id: program.id.to_string(),
                program_name: program.display_name.to_string(),
                calc_seq: program.calculation_sequence,
                action: LineAction::Claim,
                chapter99_code: rule.claim_code.clone(),
                line_value: product_value,
                material: Some(material_id.to_string()),
                material_quantity_kg: mass_kg,
                split_type: None,
                duty_rate: rule.duty_rate,
                rate_source: "hts_specific".into(),
                base: BaseSpec::Content {
                    material: material_id.to_string(),
                    value: None,
                },
            });
            // Undeclared content is not counted toward 232 coverage; the
            // reciprocal exemption requires declared content.
            return Ok(());
        };

        let content_pct = content_value / product_value;

        // Threshold exactly met counts as a claim.
        if content_pct + 1e-12 < rule.min_percent {
            decisions.push(Decision {
                step: "condition".into(),
                program_id: program.id.to_string(),
                decision: "disclaim".into(),
                reason: format!(
                    "{} content {:.1}% below {:.1}% threshold",
                    material_id,
                    content_pct * 100.0,
                    rule.min_percent * 100.0
                ),
                source_doc: None,
            });
            lines.push(PendingLine {
                program_id: program.id.to_string(),
                program_name: program.display_name.to_string(),
                calc_seq: program.calculation_sequence,
                action: LineAction::Disclaim,
                chapter99_code: rule.disclaim_code.clone(),
                line_value: product_value,
                material: Some(material_id.to_string()),
                material_quantity_kg: mass_kg,
                split_type: None,
                duty_rate: 0.0,
                rate_source: "hts_specific".into(),
                base: BaseSpec::Zero,
            });
            return Ok(());
        }

        let split = match rule.split_policy {
            SplitPolicy::Never => false,
            SplitPolicy::IfAnyContent => {
                content_value > 0.0 && content_value < product_value
            }
            SplitPolicy::IfAboveThreshold => {
                content_pct + 1e-12 >= rule.split_threshold_percent
                    && content_value < product_value
            }
        };

        decisions.push(Decision {
            step: "condition".into(),
            program_id: program.id.to_string(),
            decision: "claim".into(),
            reason: format!(
                "{} content {:.1}% meets threshold{}",
                material_id,
                content_pct * 100.0,
                if split { "; line split" } else { "" }
            ),
            source_doc: None,
        });

        if split {
            // Disclaim line for the non-material portion, claim line for the
            // content. Only the claim line carries duty.
            lines.push(PendingLine {
                program_id: program.id.to_string(),
                program_name: program.display_name.to_string(),
                calc_seq: program.calculation_sequence,
                action: LineAction::Disclaim,
                chapter99_code: rule.disclaim_code.clone(),
                line_value: product_value - content_value,
                material: Some(material_id.to_string()),
                material_quantity_kg: None,
                split_type: Some(SplitType::NonMaterialContent),
                duty_rate: 0.0,
                rate_source: "hts_specific".into(),
                base: BaseSpec::Zero,
            });
            lines.push(PendingLine {
                program_id: program.id.to_string(),
                program_name: program.display_name.to_string(),
                calc_seq: program.calculation_sequence,
                action: LineAction::Claim,
                chapter99_code: rule.claim_code.clone(),
                line_value: content_value,
                material: Some(material_id.to_string()),
                material_quantity_kg: mass_kg,
                split_type: Some(SplitType::MaterialContent),
                duty_rate: rule.duty_rate,
                rate_source: "hts_specific".into(),
                base: BaseSpec::Content {
                    material: material_id.to_string(),
                    value: Some(content_value),
                },
            });
        } else {
            lines.push(PendingLine {
                program_id: program.id.to_string(),
                program_name: program.display_name.to_string(),
                calc_seq: program.calculation_sequence,
                action: LineAction::Claim,
                chapter99_code: rule.claim_code.clone(),
                line_value: product_value,
                material: Some(material_id.to_string()),
                material_quantity_kg: mass_kg,
                split_type: None,
                duty_rate: rule.duty_rate,
                rate_source: "hts_specific".into(),
                base: BaseSpec::Content {
                    material: material_id.to_string(),
                    value: Some(content_value),
                },
            });
        }
        claimed_content.insert(material_id.to_string(), content_value);
        Ok(())
    }

    /// IEEPA Reciprocal: select a variant from flags computed earlier in the
    /// run, then resolve its code and rate.
    #[allow(clippy::too_many_arguments)]
    fn decide_reciprocal(
        &self,
        program: &TariffProgram,
        hts8: &str,
        country: &str,
        group: Option<&str>,
        import_date: NaiveDate,
        product_value: f64,
        claimed_content: &HashMap<String, f64>,
        materials: Option<&HashMap<String, MaterialInput>>,
        lines: &mut Vec<PendingLine>,
        decisions: &mut Vec<Decision>,
        flags: &mut Vec<String>,
    ) -> Result<()> {
        let annex_row = if self.annex_ii_from_db {
            self.store.as_of(
                IEEPA_RECIPROCAL,
                &RateSubject {
                    hts8: Some(hts8.to_string()),
                    variant: Some(ReciprocalVariant::AnnexIiExempt.as_str().to_string()),
                    ..Default::default()
                },
                import_date,
            )?
        } else if ANNEX_II_STATIC.contains(&hts8) {
            None // membership known, code resolved below
        } else {
            return self.reciprocal_taxable(
                program,
                hts8,
                country,
                group,
                import_date,
                product_value,
                claimed_content,
                materials,
                lines,
                decisions,
                flags,
            );
        };

        let annex_member = if self.annex_ii_from_db {
            annex_row.is_some()
        } else {
            ANNEX_II_STATIC.contains(&hts8)
        };

        if annex_member {
            let code = annex_row
                .as_ref()
                .map(|r| r.chapter99_code.clone())
                .unwrap_or_else(|| "9903.01.32".to_string());
            decisions.push(Decision {
                step: "variant".into(),
                program_id: program.id.to_string(),
                decision: ReciprocalVariant::AnnexIiExempt.as_str().to_string(),
                reason: format!("{} listed in Annex II", hts8),
                source_doc: annex_row.as_ref().and_then(|r| r.source_document_id.clone()),
            });
            lines.push(PendingLine {
                program_id: program.id.to_string(),
                program_name: program.display_name.to_string(),
                calc_seq: program.calculation_sequence,
                action: LineAction::Apply,
                chapter99_code: code,
                line_value: 0.0,
                material: None,
                material_quantity_kg: None,
                split_type: None,
                duty_rate: 0.0,
                rate_source: "annex_ii_exempt".into(),
                base: BaseSpec::Zero,
            });
            return Ok(());
        }

        self.reciprocal_taxable(
            program,
            hts8,
            country,
            group,
            import_date,
            product_value,
            claimed_content,
            materials,
            lines,
            decisions,
            flags,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn reciprocal_taxable(
        &self,
        program: &TariffProgram,
        hts8: &str,
        country: &str,
        group: Option<&str>,
        import_date: NaiveDate,
        product_value: f64,
        claimed_content: &HashMap<String, f64>,
        materials: Option<&HashMap<String, MaterialInput>>,
        lines: &mut Vec<PendingLine>,
        decisions: &mut Vec<Decision>,
        flags: &mut Vec<String>,
    ) -> Result<()> {
        let claimed_total: f64 = claimed_content.values().sum();

        // Full 232 coverage leaves no residual value to tax.
        let variant = if claimed_total >= product_value - 1e-9 && claimed_total > 0.0 {
            ReciprocalVariant::Section232Exempt
        } else if materials
            .and_then(|m| m.get("us_content"))
            .and_then(|m| m.content_value(product_value))
            .map(|v| v >= 0.20 * product_value)
            .unwrap_or(false)
        {
            ReciprocalVariant::UsContentExempt
        } else {
            ReciprocalVariant::Standard
        };

        if variant != ReciprocalVariant::Standard {
            let subject = RateSubject {
                country: Some(country.to_string()),
                country_group: group.map(|g| g.to_string()),
                variant: Some(variant.as_str().to_string()),
                ..Default::default()
            };
            let row = self.store.as_of(program.id, &subject, import_date)?;
            let code = row
                .as_ref()
                .map(|r| r.chapter99_code.clone())
                .unwrap_or_else(|| {
                    match variant {
                        ReciprocalVariant::Section232Exempt => "9903.01.35",
                        ReciprocalVariant::UsContentExempt => "9903.01.34",
                        _ => "9903.01.25",
                    }
                    .to_string()
                });
            decisions.push(Decision {
                step: "variant".into(),
                program_id: program.id.to_string(),
                decision: variant.as_str().to_string(),
                reason: match variant {
                    ReciprocalVariant::Section232Exempt => {
                        "declared 232 content covers the full product value".to_string()
                    }
                    _ => "declared US content meets the 20% threshold".to_string(),
                },
                source_doc: row.as_ref().and_then(|r| r.source_document_id.clone()),
            });
            lines.push(PendingLine {
                program_id: program.id.to_string(),
                program_name: program.display_name.to_string(),
                calc_seq: program.calculation_sequence,
                action: LineAction::Apply,
                chapter99_code: code,
                line_value: 0.0,
                material: None,
                material_quantity_kg: None,
                split_type: None,
                duty_rate: 0.0,
                rate_source: variant.as_str().to_string(),
                base: BaseSpec::Zero,
            });
            return Ok(());
        }

        let subject = RateSubject {
            country: Some(country.to_string()),
            country_group: group.map(|g| g.to_string()),
            variant: Some(ReciprocalVariant::Standard.as_str().to_string()),
            ..Default::default()
        };
        let Some(row) = self.store.as_of(program.id, &subject, import_date)? else {
            // Unknown origin mapping: the program is skipped, not an error.
            decisions.push(Decision {
                step: "inclusion".into(),
                program_id: program.id.to_string(),
                decision: "skip".into(),
                reason: format!("no reciprocal rate for {} at {}", country, import_date),
                source_doc: None,
            });
            flags.push("reciprocal_origin_unmapped".into());
            return Ok(());
        };

        let (rate, rate_source) =
            self.resolve_rate(program, &row, hts8, country, group, import_date, flags)?;
        decisions.push(Decision {
            step: "variant".into(),
            program_id: program.id.to_string(),
            decision: ReciprocalVariant::Standard.as_str().to_string(),
            reason: format!("{} at {} on remaining value", row.chapter99_code, rate),
            source_doc: row.source_document_id.clone(),
        });
        lines.push(PendingLine {
            program_id: program.id.to_string(),
            program_name: program.display_name.to_string(),
            calc_seq: program.calculation_sequence,
            action: LineAction::Apply,
            chapter99_code: row.chapter99_code,
            line_value: 0.0,
            material: None,
            material_quantity_kg: None,
            split_type: None,
            duty_rate: rate,
            rate_source,
            base: BaseSpec::Remaining,
        });
        Ok(())
    }

    /// Effective rate with country-group resolution and formula evaluation.
    /// Section 301 always uses the HTS-specific rate and ignores group rates.
    #[allow(clippy::too_many_arguments)]
    fn resolve_rate(
        &self,
        program: &TariffProgram,
        row: &crate::models::RateRow,
        hts8: &str,
        country: &str,
        group: Option<&str>,
        import_date: NaiveDate,
        flags: &mut Vec<String>,
    ) -> Result<(f64, String)> {
        if let Some(formula) = &row.formula {
            let (rate, source) = self.eval_formula(formula, hts8, import_date)?;
            return Ok((rate, source));
        }

        let source = if program.id == SECTION_301 {
            "hts_specific".to_string()
        } else if row.subject.country.is_some() {
            format!("country_{}", country)
        } else if let Some(g) = row.subject.country_group.as_deref().or(group) {
            format!("country_group_{}", g)
        } else {
            "global".to_string()
        };

        match row.duty_rate {
            Some(rate) => Ok((rate, source)),
            None => {
                // Announced but pending a numeric rate.
                flags.push(format!("rate_pending_{}", program.id));
                Ok((0.0, source))
            }
        }
    }

    /// Formula shape `N% - MFN`, floored at zero.
    fn eval_formula(
        &self,
        formula: &str,
        hts8: &str,
        import_date: NaiveDate,
    ) -> Result<(f64, String)> {
        let compact: String = formula.split_whitespace().collect();
        let Some(pct_str) = compact
            .strip_suffix("-MFN")
            .and_then(|s| s.strip_suffix('%').or(Some(s)))
            .map(|s| s.trim_end_matches('%'))
        else {
            bail!("unrecognized rate formula: {}", formula);
        };
        let ceiling: f64 = pct_str
            .parse()
            .map_err(|_| anyhow::anyhow!("unrecognized rate formula: {}", formula))?;

        let mfn = self.store.mfn_rate(hts8, import_date)?.unwrap_or(0.0);
        let rate = (ceiling / 100.0 - mfn).max(0.0);
        let label = format!("formula_{}_pct_minus_mfn", pct_str.trim_end_matches(".0"));
        Ok((rate, label))
    }
}

fn empty_result(
    _product_value: f64,
    decisions: Vec<Decision>,
    flags: Vec<String>,
) -> EvaluationResult {
    EvaluationResult {
        filing_lines: Vec::new(),
        breakdown: Vec::new(),
        total_duty_amount: 0.0,
        total_duty_percent: 0.0,
        effective_rate: 0.0,
        unstacking: Unstacking {
            material_content_value: 0.0,
            content_deductions: HashMap::new(),
            remaining_value: 0.0,
            reciprocal_base: None,
        },
        decisions,
        flags,
    }
}
