//! Core data model for tariff programs, rate rows, documents and queue state
//!
//! Everything the evaluator and the ingest pipeline exchange lives here as
//! plain records with closed enums. Dispatch happens by exhaustive `match`,
//! never by open class hierarchies.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

/// How a program decides whether it covers an HTS code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    /// Inclusion decided by a dated lookup against the program's rate table.
    HtsLookup,
    /// Program applies to every HTS within its country scope.
    Always,
}

/// Extra condition evaluated after the inclusion check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionHandler {
    None,
    /// Section 232: per-material content thresholds and claim/disclaim splits.
    MaterialComposition,
    /// Program outcome depends on a predecessor program having run first.
    Dependency,
}

/// Whether a non-claimed material line must still be filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisclaimBehavior {
    Required,
    Omit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationType {
    Additive,
    Compound,
    OnPortion,
}

/// Which value a program's duty rate multiplies against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseOn {
    ProductValue,
    ContentValue,
    RemainingValue,
}

/// Side effect a base selection has on the running remaining value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseEffect {
    SubtractFromRemaining,
}

/// Impose rows add duty inside their window; exclude rows suppress paired
/// impose rows and always win precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateRole {
    Impose,
    Exclude,
}

impl RateRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateRole::Impose => "impose",
            RateRole::Exclude => "exclude",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "impose" => Some(RateRole::Impose),
            "exclude" => Some(RateRole::Exclude),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    Never,
    IfAnyContent,
    IfAboveThreshold,
}

impl SplitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitPolicy::Never => "never",
            SplitPolicy::IfAnyContent => "if_any_content",
            SplitPolicy::IfAboveThreshold => "if_above_threshold",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "never" => Some(SplitPolicy::Never),
            "if_any_content" => Some(SplitPolicy::IfAnyContent),
            "if_above_threshold" => Some(SplitPolicy::IfAboveThreshold),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentBasis {
    Value,
    Mass,
    Percent,
}

impl ContentBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentBasis::Value => "value",
            ContentBasis::Mass => "mass",
            ContentBasis::Percent => "percent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "value" => Some(ContentBasis::Value),
            "mass" => Some(ContentBasis::Mass),
            "percent" => Some(ContentBasis::Percent),
            _ => None,
        }
    }
}

/// IEEPA Reciprocal output variants, selected from flags computed during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReciprocalVariant {
    Standard,
    AnnexIiExempt,
    Section232Exempt,
    UsContentExempt,
}

impl ReciprocalVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReciprocalVariant::Standard => "standard",
            ReciprocalVariant::AnnexIiExempt => "annex_ii_exempt",
            ReciprocalVariant::Section232Exempt => "section_232_exempt",
            ReciprocalVariant::UsContentExempt => "us_content_exempt",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(ReciprocalVariant::Standard),
            "annex_ii_exempt" => Some(ReciprocalVariant::AnnexIiExempt),
            "section_232_exempt" => Some(ReciprocalVariant::Section232Exempt),
            "us_content_exempt" => Some(ReciprocalVariant::UsContentExempt),
            _ => None,
        }
    }
}

/// Action taken on a filing line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineAction {
    Apply,
    Claim,
    Disclaim,
    Exclude,
    Skip,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitType {
    MaterialContent,
    NonMaterialContent,
}

/// Where a breakdown entry's base value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    ProductValue,
    RemainingValue,
    ContentValue,
    FallbackToProduct,
}

/// Source authority tier. Only tier A may back committed rate rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceTier {
    A,
    B,
    C,
}

impl SourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::A => "A",
            SourceTier::B => "B",
            SourceTier::C => "C",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "A" => Some(SourceTier::A),
            "B" => Some(SourceTier::B),
            "C" => Some(SourceTier::C),
            _ => None,
        }
    }
}

/// Ingest job lifecycle. Jobs move strictly forward except for the retry
/// transition back to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Fetching,
    Rendering,
    Chunking,
    Extracting,
    Validating,
    Committing,
    Committed,
    NeedsReview,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Fetching => "fetching",
            JobStatus::Rendering => "rendering",
            JobStatus::Chunking => "chunking",
            JobStatus::Extracting => "extracting",
            JobStatus::Validating => "validating",
            JobStatus::Committing => "committing",
            JobStatus::Committed => "committed",
            JobStatus::NeedsReview => "needs_review",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "fetching" => Some(JobStatus::Fetching),
            "rendering" => Some(JobStatus::Rendering),
            "chunking" => Some(JobStatus::Chunking),
            "extracting" => Some(JobStatus::Extracting),
            "validating" => Some(JobStatus::Validating),
            "committing" => Some(JobStatus::Committing),
            "committed" => Some(JobStatus::Committed),
            "needs_review" => Some(JobStatus::NeedsReview),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// True while a worker owns the job.
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            JobStatus::Fetching
                | JobStatus::Rendering
                | JobStatus::Chunking
                | JobStatus::Extracting
                | JobStatus::Validating
                | JobStatus::Committing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Committed | JobStatus::NeedsReview | JobStatus::Failed
        )
    }
}

/// Candidate change lifecycle. Transitions are monotonic; rejections are
/// retained for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Approved,
    Rejected,
    Committed,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Approved => "approved",
            CandidateStatus::Rejected => "rejected",
            CandidateStatus::Committed => "committed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CandidateStatus::Pending),
            "approved" => Some(CandidateStatus::Approved),
            "rejected" => Some(CandidateStatus::Rejected),
            "committed" => Some(CandidateStatus::Committed),
            _ => None,
        }
    }
}

/// Country scope expression for a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountryScope {
    /// Applies to every origin.
    All,
    /// Applies only to the named countries (normalized lowercase).
    Countries(&'static [&'static str]),
    /// Applies to members of the named country group.
    Group(&'static str),
}

/// Static catalog entry for one tariff program.
#[derive(Debug, Clone)]
pub struct TariffProgram {
    pub id: &'static str,
    pub display_name: &'static str,
    pub country_scope: CountryScope,
    pub check_type: CheckType,
    pub condition_handler: ConditionHandler,
    /// Predecessor program family for `ConditionHandler::Dependency`.
    pub dependency_on: Option<&'static str>,
    /// Order the line appears on the entry filing.
    pub filing_sequence: u32,
    /// Order in the duty math. 232 programs precede IEEPA Reciprocal.
    pub calculation_sequence: u32,
    pub disclaim_behavior: DisclaimBehavior,
}

/// Per-program duty math parameters. The (`base_on`, `base_effect`) pair
/// encodes unstacking: 232 uses content value and subtracts it from the
/// remaining value; IEEPA Reciprocal taxes whatever is left.
#[derive(Debug, Clone)]
pub struct DutyRule {
    pub program_id: &'static str,
    pub calculation_type: CalculationType,
    pub base_on: BaseOn,
    /// Material id when `base_on` is `ContentValue`.
    pub content_key: Option<&'static str>,
    /// Base to use when the content value is unknown (penalty).
    pub fallback_base_on: Option<BaseOn>,
    pub base_effect: Option<BaseEffect>,
}

/// Subject keys identifying what a rate row is about. All optional: HTS-scoped
/// families carry `hts8`, IEEPA rows are keyed by country/variant with no HTS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateSubject {
    pub hts8: Option<String>,
    pub hts10: Option<String>,
    pub country: Option<String>,
    pub country_group: Option<String>,
    pub material: Option<String>,
    pub variant: Option<String>,
}

impl RateSubject {
    pub fn for_hts(hts8: &str) -> Self {
        Self {
            hts8: Some(hts8.to_string()),
            ..Default::default()
        }
    }

    pub fn for_hts_full(hts8: &str, hts10: Option<&str>) -> Self {
        Self {
            hts8: Some(hts8.to_string()),
            hts10: hts10.map(|s| s.to_string()),
            ..Default::default()
        }
    }
}

/// One temporal assertion in the rate store. Windows are start-inclusive,
/// end-exclusive; a NULL end means open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRow {
    pub id: String,
    pub program_id: String,
    pub subject: RateSubject,
    pub chapter99_code: String,
    /// NULL means announced but pending a numeric rate.
    pub duty_rate: Option<f64>,
    /// Formula expression such as `15% - MFN`, evaluated at query time.
    pub formula: Option<String>,
    pub effective_start: NaiveDate,
    pub effective_end: Option<NaiveDate>,
    pub role: RateRole,
    pub source_document_id: Option<String>,
    pub evidence_id: Option<String>,
    pub supersedes_id: Option<String>,
    pub superseded_by_id: Option<String>,
    pub dataset_tag: Option<String>,
    pub is_archived: bool,
}

impl RateRow {
    /// Window membership: start ≤ d < end, open end treated as +∞.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.effective_start <= date && self.effective_end.map_or(true, |end| date < end)
    }
}

/// Advisory Section 301 exclusion candidate. Acceptance is decided by an
/// external verification step; the evaluator only consumes committed
/// `exclude` rate rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionClaim {
    pub id: String,
    pub hts8: String,
    pub description: String,
    pub claim_code: String,
    pub effective_start: NaiveDate,
    pub effective_end: Option<NaiveDate>,
    pub status: String,
}

/// Section 232 material coverage for one HTS line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section232Material {
    pub id: String,
    pub hts8: String,
    pub hts10: Option<String>,
    pub material: String,
    pub claim_code: String,
    pub disclaim_code: String,
    pub duty_rate: f64,
    /// Minimum content share (0..1) for a claim.
    pub min_percent: f64,
    pub split_policy: SplitPolicy,
    pub split_threshold_percent: f64,
    pub content_basis: ContentBasis,
    pub quantity_unit: Option<String>,
    pub effective_start: NaiveDate,
    pub effective_end: Option<NaiveDate>,
}

impl Section232Material {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.effective_start <= date && self.effective_end.map_or(true, |end| date < end)
    }
}

/// A document surfaced by a watcher, not yet fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDocument {
    pub source: String,
    pub external_id: String,
    pub url: String,
    pub title: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub tier: SourceTier,
}

/// Immutable stored official document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficialDocument {
    pub id: String,
    pub source: String,
    pub external_id: String,
    pub tier: SourceTier,
    pub url: String,
    pub title: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub fetched_at: i64,
    pub sha256: String,
    #[serde(skip_serializing)]
    pub raw_bytes: Vec<u8>,
    /// Canonical rendered text with stable line numbers.
    pub canonical_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub seq: i64,
    pub char_start: i64,
    pub char_end: i64,
    pub text: String,
    pub chunk_type: String,
    pub embedding_key: Option<String>,
}

/// Verbatim-quote evidence backing a candidate change. The quote must be an
/// exact substring of the referenced chunk's text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePacket {
    pub id: String,
    pub document_id: String,
    pub chunk_id: String,
    pub quote: String,
    pub quote_sha256: String,
    pub extractor_output: Option<String>,
    pub validator_output: Option<String>,
    pub write_gate_passed: bool,
    pub gate_failures: Vec<String>,
    pub created_at: i64,
}

/// Proposed rate mutation produced by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateChange {
    pub id: String,
    pub program_id: String,
    pub subject: RateSubject,
    pub role: RateRole,
    pub chapter99_code: String,
    pub duty_rate: Option<f64>,
    pub formula: Option<String>,
    pub effective_start: NaiveDate,
    pub effective_end: Option<NaiveDate>,
    pub evidence_id: Option<String>,
    pub source_document_id: Option<String>,
    pub run_id: Option<String>,
    pub dataset_tag: Option<String>,
    pub status: CandidateStatus,
    pub block_reason: Option<String>,
    pub priority: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub id: String,
    pub source: String,
    pub external_id: String,
    pub url: String,
    pub status: JobStatus,
    pub attempts: i64,
    pub claim_token: Option<String>,
    pub last_error: Option<String>,
    pub document_id: Option<String>,
    pub run_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatoryRun {
    pub id: String,
    pub source: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: String,
    pub documents_discovered: i64,
    pub jobs_enqueued: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDocument {
    pub run_id: String,
    pub document_external_id: String,
    pub source: String,
    pub url: String,
    pub discovered_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunChange {
    pub run_id: String,
    pub rate_row_id: String,
    pub candidate_id: Option<String>,
    pub committed_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub entity: String,
    pub entity_id: String,
    pub action: String,
    pub before_json: Option<String>,
    pub after_json: Option<String>,
    pub at: i64,
}

/// Declared material composition for one material.
///
/// A bare number is a declared content value in the same currency as the
/// product value; the detailed form carries any of percent (0..1), value,
/// and mass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaterialInput {
    Amount(f64),
    Detailed {
        #[serde(default)]
        percent: Option<f64>,
        #[serde(default)]
        value: Option<f64>,
        #[serde(default)]
        mass_kg: Option<f64>,
    },
}

impl MaterialInput {
    /// Explicit value preferred; else percent × product value.
    pub fn content_value(&self, product_value: f64) -> Option<f64> {
        match self {
            MaterialInput::Amount(v) => Some(*v),
            MaterialInput::Detailed { percent, value, .. } => match (value, percent) {
                (Some(v), _) => Some(*v),
                (None, Some(p)) => Some(p * product_value),
                (None, None) => None,
            },
        }
    }

    pub fn mass_kg(&self) -> Option<f64> {
        match self {
            MaterialInput::Amount(_) => None,
            MaterialInput::Detailed { mass_kg, .. } => *mass_kg,
        }
    }
}

/// Evaluator call input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub hts_code: String,
    pub country: String,
    pub product_value: f64,
    #[serde(default)]
    pub import_date: Option<NaiveDate>,
    #[serde(default)]
    pub materials: Option<HashMap<String, MaterialInput>>,
    #[serde(default)]
    pub product_description: Option<String>,
}

/// One line on the CBP entry filing: a base HTS paired with a Chapter-99
/// special-program code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingLine {
    pub sequence: u32,
    pub program_id: String,
    pub program_name: String,
    pub action: LineAction,
    pub chapter99_code: String,
    pub base_hts_code: String,
    pub line_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_quantity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_quantity_kg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_type: Option<SplitType>,
    pub duty_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownItem {
    pub program_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    pub base_value: f64,
    pub value_source: ValueSource,
    pub rate: f64,
    pub rate_source: String,
    pub amount: f64,
}

/// Record of the 232 deductions and the residual value IEEPA Reciprocal
/// applied to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unstacking {
    pub material_content_value: f64,
    pub content_deductions: HashMap<String, f64>,
    pub remaining_value: f64,
    pub reciprocal_base: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub step: String,
    pub program_id: String,
    pub decision: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_doc: Option<String>,
}

/// Evaluator call output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub filing_lines: Vec<FilingLine>,
    pub breakdown: Vec<BreakdownItem>,
    pub total_duty_amount: f64,
    pub total_duty_percent: f64,
    pub effective_rate: f64,
    pub unstacking: Unstacking,
    pub decisions: Vec<Decision>,
    pub flags: Vec<String>,
}

/// Strip dots and validate an HTS code. Returns (hts8, full digit string);
/// codes shorter than 8 digits are rejected outright, there is no 6/4/2
/// fallback.
pub fn normalize_hts(raw: &str) -> Option<(String, String)> {
    if raw.is_empty() || raw.chars().any(|c| !c.is_ascii_digit() && c != '.') {
        return None;
    }
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 8 {
        return None;
    }
    Some((digits[..8].to_string(), digits))
}

/// Leading two digits of an HTS code.
pub fn hts_chapter(hts: &str) -> Option<u32> {
    hts.get(..2)?.parse().ok()
}

/// Process-wide configuration, resolved from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub manifest_dir: String,
    pub listen_addr: String,
    pub worker_count: usize,
    pub worker_poll_secs: u64,
    pub stage_timeout_secs: u64,
    pub max_attempts: i64,
    pub federal_register_poll_secs: u64,
    pub cbp_csms_poll_secs: u64,
    pub usitc_poll_secs: u64,
    pub review_sla_hours: i64,
    pub stuck_job_bound_secs: i64,
    /// Annex-II membership check: true = rate-store rows, false = static list.
    pub annex_ii_from_db: bool,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_path: env::var("TARIFF_DB_PATH")
                .unwrap_or_else(|_| "tariffline.db".to_string()),
            manifest_dir: env::var("MANIFEST_DIR").unwrap_or_else(|_| "manifests".to_string()),
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            worker_count: env_parse("PIPELINE_WORKERS", 2),
            worker_poll_secs: env_parse("WORKER_POLL_SECS", 5),
            stage_timeout_secs: env_parse("STAGE_TIMEOUT_SECS", 120),
            max_attempts: env_parse("PIPELINE_MAX_ATTEMPTS", 4),
            federal_register_poll_secs: env_parse("FEDERAL_REGISTER_POLL_SECS", 86_400),
            cbp_csms_poll_secs: env_parse("CBP_CSMS_POLL_SECS", 86_400 * 30),
            usitc_poll_secs: env_parse("USITC_POLL_SECS", 86_400 * 365),
            review_sla_hours: env_parse("REVIEW_SLA_HOURS", 72),
            stuck_job_bound_secs: env_parse("STUCK_JOB_BOUND_SECS", 1_800),
            annex_ii_from_db: env_flag("ANNEX_II_FROM_DB", true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_hts_strips_dots() {
        let (hts8, full) = normalize_hts("8544.42.9090").unwrap();
        assert_eq!(hts8, "85444290");
        assert_eq!(full, "8544429090");
    }

    #[test]
    fn test_normalize_hts_rejects_short_codes() {
        assert!(normalize_hts("854442").is_none());
        assert!(normalize_hts("").is_none());
        assert!(normalize_hts("8544.42").is_none());
    }

    #[test]
    fn test_normalize_hts_rejects_garbage() {
        assert!(normalize_hts("8544-42-9090").is_none());
        assert!(normalize_hts("abcdefgh").is_none());
    }

    #[test]
    fn test_rate_row_window_is_end_exclusive() {
        let row = RateRow {
            id: "r1".into(),
            program_id: "section_301".into(),
            subject: RateSubject::for_hts("85444290"),
            chapter99_code: "9903.88.03".into(),
            duty_rate: Some(0.25),
            formula: None,
            effective_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            effective_end: NaiveDate::from_ymd_opt(2026, 1, 1),
            role: RateRole::Impose,
            source_document_id: Some("d".into()),
            evidence_id: Some("e".into()),
            supersedes_id: None,
            superseded_by_id: None,
            dataset_tag: None,
            is_archived: false,
        };

        assert!(row.covers(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(row.covers(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()));
        assert!(!row.covers(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()));
        assert!(!row.covers(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
    }

    #[test]
    fn test_material_input_prefers_explicit_value() {
        let detailed = MaterialInput::Detailed {
            percent: Some(0.5),
            value: Some(3000.0),
            mass_kg: None,
        };
        assert_eq!(detailed.content_value(10_000.0), Some(3000.0));

        let pct_only = MaterialInput::Detailed {
            percent: Some(0.3),
            value: None,
            mass_kg: None,
        };
        assert_eq!(pct_only.content_value(10_000.0), Some(3000.0));

        let unknown = MaterialInput::Detailed {
            percent: None,
            value: None,
            mass_kg: Some(12.0),
        };
        assert_eq!(unknown.content_value(10_000.0), None);
    }
}
