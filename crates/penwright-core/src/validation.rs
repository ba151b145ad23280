//! Content-quality gate for model output
//!
//! Four levels: `None` accepts anything, `Minimal` checks trimmed length,
//! `Statistical` adds gzip compression, character entropy, bigram variety,
//! word density, finish-reason and script checks, and `Custom` defers to a
//! caller-supplied predicate. The bundled translation validator runs the
//! statistical gate and then bounds the output/input length ratio.
//!
//! All functions here are pure: same text and params, same verdict.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use flate2::Compression;
use flate2::write::GzEncoder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::providers::FinishReason;

pub const DEFAULT_MIN_LENGTH: usize = 300;

/// Raw/gzip size ratio above which text is considered repetitive
pub const MAX_COMPRESSION_RATIO: f64 = 4.0;
/// Shannon entropy floor, bits per character
pub const MIN_ENTROPY_BITS: f64 = 2.5;
pub const MIN_BIGRAM_UNIQUENESS: f64 = 0.02;
pub const MIN_WORD_DENSITY: f64 = 0.05;
pub const MAX_WORD_DENSITY: f64 = 0.40;
/// Texts longer than this must contain at least one word
pub const NO_WORDS_MIN_CHARS: usize = 100;
pub const MIN_CYRILLIC_SHARE: f64 = 0.30;
pub const MIN_LATIN_SHARE: f64 = 0.50;
pub const MIN_TRANSLATION_RATIO: f64 = 0.80;
pub const MAX_TRANSLATION_RATIO: f64 = 1.25;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w+\b").expect("word pattern is valid"));

/// Configured validation level, as it appears in config files and CLI flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    None,
    #[default]
    Minimal,
    #[serde(alias = "v3")]
    Statistical,
}

impl FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "minimal" => Ok(Self::Minimal),
            "statistical" | "v3" => Ok(Self::Statistical),
            other => Err(format!(
                "unknown validation level '{}' (expected none, minimal or statistical)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Minimal => write!(f, "minimal"),
            Self::Statistical => write!(f, "statistical"),
        }
    }
}

/// Caller-supplied predicate for `Validation::Custom`
pub type CustomValidator = Arc<dyn Fn(&str, &ValidationParams) -> ValidationVerdict + Send + Sync>;

/// The gate applied to each response
#[derive(Clone, Default)]
pub enum Validation {
    None,
    #[default]
    Minimal,
    Statistical,
    Custom(CustomValidator),
}

impl std::fmt::Debug for Validation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Minimal => write!(f, "Minimal"),
            Self::Statistical => write!(f, "Statistical"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl From<ValidationLevel> for Validation {
    fn from(level: ValidationLevel) -> Self {
        match level {
            ValidationLevel::None => Self::None,
            ValidationLevel::Minimal => Self::Minimal,
            ValidationLevel::Statistical => Self::Statistical,
        }
    }
}

impl Validation {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str, &ValidationParams) -> ValidationVerdict + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Statistical gate plus the translation length-ratio bound
    pub fn translation() -> Self {
        Self::custom(validate_translation)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minimal => "minimal",
            Self::Statistical => "statistical",
            Self::Custom(_) => "custom",
        }
    }
}

/// Inputs the gate needs besides the text itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationParams {
    pub min_length: usize,
    /// Language name or code; only a handful are checked, others pass
    #[serde(default)]
    pub target_language: Option<String>,
    /// Normalized finish reason; filled in by the orchestrator per response
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    /// Source length in characters, required by the translation validator
    #[serde(default)]
    pub original_length: Option<usize>,
}

impl Default for ValidationParams {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LENGTH,
            target_language: None,
            finish_reason: None,
            original_length: None,
        }
    }
}

impl ValidationParams {
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = Some(language.into());
        self
    }

    pub fn with_finish_reason(mut self, finish_reason: FinishReason) -> Self {
        self.finish_reason = Some(finish_reason);
        self
    }

    pub fn with_original_length(mut self, original_length: usize) -> Self {
        self.original_length = Some(original_length);
        self
    }
}

/// Why a response was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    TooShort { length: usize, min: usize },
    HighCompression { ratio: f64 },
    LowEntropy { bits: f64 },
    RepetitiveBigrams { uniqueness: f64 },
    LowWordDensity { density: f64 },
    HighWordDensity { density: f64 },
    NoWords { length: usize },
    BadFinishReason { finish_reason: FinishReason },
    WrongLanguage { language: String, share: f64, required: f64 },
    TranslationTooShort { ratio: f64 },
    TranslationTooLong { ratio: f64 },
    MissingOriginalLength,
    Custom(String),
}

impl FailureReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::TooShort { .. } => "too_short",
            Self::HighCompression { .. } => "high_compression",
            Self::LowEntropy { .. } => "low_entropy",
            Self::RepetitiveBigrams { .. } => "repetitive_bigrams",
            Self::LowWordDensity { .. } => "low_word_density",
            Self::HighWordDensity { .. } => "high_word_density",
            Self::NoWords { .. } => "no_words",
            Self::BadFinishReason { .. } => "bad_finish_reason",
            Self::WrongLanguage { .. } => "wrong_language",
            Self::TranslationTooShort { .. } => "translation_too_short",
            Self::TranslationTooLong { .. } => "translation_too_long",
            Self::MissingOriginalLength => "missing_original_length",
            Self::Custom(_) => "custom",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort { length, min } => write!(f, "too_short ({} < {} chars)", length, min),
            Self::HighCompression { ratio } => write!(f, "high_compression ({:.2})", ratio),
            Self::LowEntropy { bits } => write!(f, "low_entropy ({:.2} bits)", bits),
            Self::RepetitiveBigrams { uniqueness } => {
                write!(f, "repetitive_bigrams ({:.4})", uniqueness)
            }
            Self::LowWordDensity { density } => write!(f, "low_word_density ({:.3})", density),
            Self::HighWordDensity { density } => write!(f, "high_word_density ({:.3})", density),
            Self::NoWords { length } => write!(f, "no_words ({} chars)", length),
            Self::BadFinishReason { finish_reason } => {
                write!(f, "bad_finish_reason ({})", finish_reason)
            }
            Self::WrongLanguage {
                language,
                share,
                required,
            } => write!(
                f,
                "wrong_language ({}: script share {:.2} < {:.2})",
                language, share, required
            ),
            Self::TranslationTooShort { ratio } => {
                write!(f, "translation_too_short (ratio {:.2})", ratio)
            }
            Self::TranslationTooLong { ratio } => {
                write!(f, "translation_too_long (ratio {:.2})", ratio)
            }
            Self::MissingOriginalLength => write!(f, "missing_original_length"),
            Self::Custom(message) => write!(f, "custom ({})", message),
        }
    }
}

/// Outcome of running the gate
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationVerdict {
    Pass,
    Fail(FailureReason),
}

impl ValidationVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn reason(&self) -> Option<&FailureReason> {
        match self {
            Self::Pass => None,
            Self::Fail(reason) => Some(reason),
        }
    }

    pub fn code(&self) -> Option<&'static str> {
        self.reason().map(FailureReason::code)
    }
}

impl From<Option<FailureReason>> for ValidationVerdict {
    fn from(failure: Option<FailureReason>) -> Self {
        failure.map_or(Self::Pass, Self::Fail)
    }
}

/// Run the configured gate
pub fn validate(text: &str, validation: &Validation, params: &ValidationParams) -> ValidationVerdict {
    let verdict = match validation {
        Validation::None => ValidationVerdict::Pass,
        Validation::Minimal => check_minimal(text, params.min_length),
        Validation::Statistical => check_statistical(text, params),
        Validation::Custom(validator) => validator(text, params),
    };
    if let ValidationVerdict::Fail(reason) = &verdict {
        debug!("Validation ({}) rejected response: {}", validation.name(), reason);
    }
    verdict
}

/// Trimmed character count must reach `min_length`
pub fn check_minimal(text: &str, min_length: usize) -> ValidationVerdict {
    length_failure(text.trim(), min_length).into()
}

fn length_failure(trimmed: &str, min: usize) -> Option<FailureReason> {
    let length = trimmed.chars().count();
    (length < min).then_some(FailureReason::TooShort { length, min })
}

/// Length plus statistical, finish-reason and script checks; first failure wins
pub fn check_statistical(text: &str, params: &ValidationParams) -> ValidationVerdict {
    statistical_failure(text, params).into()
}

fn statistical_failure(text: &str, params: &ValidationParams) -> Option<FailureReason> {
    let content = text.trim();
    if let Some(failure) = length_failure(content, params.min_length) {
        return Some(failure);
    }

    match compression_ratio(content) {
        Some(ratio) if ratio > MAX_COMPRESSION_RATIO => {
            return Some(FailureReason::HighCompression { ratio });
        }
        Some(_) => {}
        None => warn!("Compression check skipped: gzip encoding failed"),
    }

    let bits = shannon_entropy(content);
    if bits < MIN_ENTROPY_BITS {
        return Some(FailureReason::LowEntropy { bits });
    }

    if let Some(uniqueness) = bigram_uniqueness(content)
        && uniqueness < MIN_BIGRAM_UNIQUENESS
    {
        return Some(FailureReason::RepetitiveBigrams { uniqueness });
    }

    let density = word_density(content);
    if density == 0.0 {
        let length = content.chars().count();
        if length > NO_WORDS_MIN_CHARS {
            return Some(FailureReason::NoWords { length });
        }
    } else if density < MIN_WORD_DENSITY {
        return Some(FailureReason::LowWordDensity { density });
    } else if density > MAX_WORD_DENSITY {
        return Some(FailureReason::HighWordDensity { density });
    }

    // an absent code means nothing is known about how generation ended
    if let Some(finish_reason) = params.finish_reason
        && finish_reason.is_known()
        && !finish_reason.is_natural_stop()
    {
        return Some(FailureReason::BadFinishReason { finish_reason });
    }

    params
        .target_language
        .as_deref()
        .and_then(|language| language_failure(content, language))
}

/// Raw byte length over gzip (best compression) length; None for empty input
pub fn compression_ratio(text: &str) -> Option<f64> {
    if text.is_empty() {
        return None;
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(text.as_bytes()).ok()?;
    let compressed = encoder.finish().ok()?;
    Some(text.len() as f64 / compressed.len() as f64)
}

/// Shannon entropy of the character distribution, in bits
pub fn shannon_entropy(text: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Distinct character bigrams over total bigrams; None below two characters
pub fn bigram_uniqueness(text: &str) -> Option<f64> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 2 {
        return None;
    }
    let total = chars.len() - 1;
    let distinct: HashSet<(char, char)> = chars.windows(2).map(|w| (w[0], w[1])).collect();
    Some(distinct.len() as f64 / total as f64)
}

/// Word-token count over character count
fn word_density(text: &str) -> f64 {
    let length = text.chars().count();
    if length == 0 {
        return 0.0;
    }
    WORD_RE.find_iter(text).count() as f64 / length as f64
}

/// Writing systems the script check understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Cyrillic,
    Latin,
}

impl Script {
    fn contains(&self, c: char) -> bool {
        match self {
            Self::Cyrillic => ('\u{0400}'..='\u{04FF}').contains(&c),
            Self::Latin => c.is_ascii_alphabetic(),
        }
    }

    /// Share of characters in this script
    fn share(&self, text: &str) -> f64 {
        let mut total = 0usize;
        let mut matching = 0usize;
        for c in text.chars() {
            total += 1;
            if self.contains(c) {
                matching += 1;
            }
        }
        if total == 0 {
            return 0.0;
        }
        matching as f64 / total as f64
    }
}

const LANGUAGE_SCRIPTS: &[(&[&str], Script, f64)] = &[
    (&["ru", "russian", "русский"], Script::Cyrillic, MIN_CYRILLIC_SHARE),
    (&["en", "english", "английский"], Script::Latin, MIN_LATIN_SHARE),
    (&["es", "spanish", "español", "испанский"], Script::Latin, MIN_LATIN_SHARE),
    (&["de", "german", "deutsch", "немецкий"], Script::Latin, MIN_LATIN_SHARE),
    (&["fr", "french", "français", "французский"], Script::Latin, MIN_LATIN_SHARE),
];

/// Expected script and minimum share for a language name or code
fn language_script(language: &str) -> Option<(Script, f64)> {
    let key = language.trim().to_lowercase();
    LANGUAGE_SCRIPTS
        .iter()
        .find(|(names, _, _)| names.contains(&key.as_str()))
        .map(|(_, script, min)| (*script, *min))
}

/// Languages without a configured script always pass
fn language_failure(content: &str, language: &str) -> Option<FailureReason> {
    let (script, required) = language_script(language)?;
    let share = script.share(content);
    (share < required).then(|| FailureReason::WrongLanguage {
        language: language.to_string(),
        share,
        required,
    })
}

/// Statistical gate, then output/input character ratio within [0.8, 1.25]
pub fn validate_translation(text: &str, params: &ValidationParams) -> ValidationVerdict {
    if let Some(failure) = statistical_failure(text, params) {
        return ValidationVerdict::Fail(failure);
    }
    let Some(original_length) = params.original_length else {
        return ValidationVerdict::Fail(FailureReason::MissingOriginalLength);
    };
    let translated = text.chars().count();
    let ratio = if original_length == 0 {
        0.0
    } else {
        translated as f64 / original_length as f64
    };
    if ratio < MIN_TRANSLATION_RATIO {
        ValidationVerdict::Fail(FailureReason::TranslationTooShort { ratio })
    } else if ratio > MAX_TRANSLATION_RATIO {
        ValidationVerdict::Fail(FailureReason::TranslationTooLong { ratio })
    } else {
        ValidationVerdict::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROSE: &str = "The harbor town woke slowly under a pale winter sky, and the fishermen \
        checked their nets before the tide turned. Along the quay, a baker stacked warm loaves \
        while gulls argued over scraps near the old customs house. Nobody remembered exactly \
        when the lighthouse keeper had stopped climbing the spiral stairs every evening; the \
        lamp now switched itself on with a quiet electric click. Children walked to school in \
        bright yellow coats, counting the boats that had returned overnight. Their tutor, a \
        patient woman from the northern valleys, often began lessons by asking what the sea \
        had brought in. Some mornings it was driftwood, sometimes a lost buoy, once a crate of \
        oranges that nobody ever claimed. By noon the market square filled with voices \
        bargaining over mackerel, cheese, wool and copper pots. Travelers rarely stayed longer \
        than a night, though a few returned every summer to paint the cliffs. In the evenings, \
        musicians gathered at the tavern near the bridge and played songs older than the \
        church. Rain arrived quickly in this part of the coast, drumming on slate roofs and \
        sending cats under the carts. When the storms passed, the air smelled of salt, pine \
        and wet stone, and the harbor lights shimmered on the black water. Visitors who asked \
        about the town's history received a dozen conflicting answers, each told with \
        complete conviction and a generous pour of local cider. Most of those stories were \
        wrong, yet every retelling made them a little better.";

    fn prose(chars: usize) -> String {
        PROSE.chars().take(chars).collect()
    }

    #[test]
    fn test_prose_fixture_is_long_enough() {
        assert!(PROSE.chars().count() >= 1400);
    }

    #[test]
    fn test_none_always_passes() {
        let params = ValidationParams::default();
        assert!(validate("", &Validation::None, &params).is_pass());
        assert!(validate(&"a".repeat(10_000), &Validation::None, &params).is_pass());
    }

    #[test]
    fn test_minimal_counts_trimmed_chars() {
        assert!(check_minimal("   abc   ", 3).is_pass());
        assert_eq!(check_minimal("   abc   ", 4).code(), Some("too_short"));
        assert!(check_minimal("привет", 6).is_pass());
        let params = ValidationParams::default();
        assert!(validate(&prose(400), &Validation::Minimal, &params).is_pass());
        assert!(!validate(&prose(120), &Validation::Minimal, &params).is_pass());
    }

    #[test]
    fn test_statistical_passes_varied_prose() {
        let params = ValidationParams::default();
        assert_eq!(check_statistical(PROSE, &params), ValidationVerdict::Pass);
    }

    #[test]
    fn test_statistical_rejects_single_char_flood() {
        let verdict = check_statistical(&"a".repeat(10_000), &ValidationParams::default());
        assert_eq!(verdict.code(), Some("high_compression"));
    }

    #[test]
    fn test_alternating_pair_has_low_bigram_uniqueness() {
        let text = "ab".repeat(250);
        assert!(bigram_uniqueness(&text).unwrap() < MIN_BIGRAM_UNIQUENESS);
        assert!(!check_statistical(&text, &ValidationParams::default()).is_pass());
        assert!(bigram_uniqueness(&prose(500)).unwrap() >= MIN_BIGRAM_UNIQUENESS);
    }

    #[test]
    fn test_small_alphabet_noise_fails_on_bigrams() {
        // six symbols in pseudo-random order: compresses poorly, entropy just above the floor
        let mut state: u64 = 42;
        let text: String = (0..2400)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ['a', 'b', 'c', 'd', 'e', 'f'][((state >> 33) % 6) as usize]
            })
            .collect();
        assert!(compression_ratio(&text).unwrap() <= MAX_COMPRESSION_RATIO);
        assert!(shannon_entropy(&text) >= MIN_ENTROPY_BITS);
        assert_eq!(
            check_statistical(&text, &ValidationParams::default()).code(),
            Some("repetitive_bigrams")
        );
    }

    #[test]
    fn test_finish_reason_gate() {
        let text = prose(600);
        let truncated =
            ValidationParams::default().with_finish_reason(FinishReason::parse("MAX_TOKENS"));
        assert_eq!(
            check_statistical(&text, &truncated).code(),
            Some("bad_finish_reason")
        );

        let stopped = ValidationParams::default().with_finish_reason(FinishReason::parse("STOP"));
        assert!(check_statistical(&text, &stopped).is_pass());
    }

    #[test]
    fn test_absent_finish_reason_is_not_checked() {
        let text = prose(350);
        let absent = ValidationParams::default().with_finish_reason(FinishReason::from_openai(None));
        assert_eq!(check_statistical(&text, &absent), ValidationVerdict::Pass);
        assert!(validate(&text, &Validation::Statistical, &absent).is_pass());
    }

    #[test]
    fn test_language_gate() {
        let english = ValidationParams::default().with_target_language("en");
        assert!(check_statistical(PROSE, &english).is_pass());

        let russian = ValidationParams::default().with_target_language("ru");
        assert_eq!(check_statistical(PROSE, &russian).code(), Some("wrong_language"));

        let unconfigured = ValidationParams::default().with_target_language("ja");
        assert!(check_statistical(PROSE, &unconfigured).is_pass());
    }

    #[test]
    fn test_language_aliases() {
        let cyrillic = "Утренний туман медленно поднимался над рекой, и рыбаки готовили лодки.";
        assert!(language_failure(cyrillic, "Русский").is_none());
        assert!(language_failure(cyrillic, "russian").is_none());
        assert_eq!(
            language_failure(cyrillic, "english").map(|f| f.code()),
            Some("wrong_language")
        );
        assert!(language_failure("Guten Morgen, wie geht es dir heute?", "Deutsch").is_none());
        assert_eq!(language_script("français").map(|(s, _)| s), Some(Script::Latin));
        assert!(language_script("klingon").is_none());
    }

    #[test]
    fn test_word_density_bounds() {
        assert!(word_density("a b c d e f") > MAX_WORD_DENSITY);
        assert!(word_density(&prose(500)) > MIN_WORD_DENSITY);
        assert_eq!(word_density(""), 0.0);
    }

    #[test]
    fn test_entropy_of_uniform_text() {
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!((shannon_entropy("abcd") - 2.0).abs() < 1e-9);
        assert!(shannon_entropy(PROSE) > MIN_ENTROPY_BITS);
    }

    #[test]
    fn test_compression_ratio_of_prose_is_moderate() {
        let ratio = compression_ratio(PROSE).unwrap();
        assert!(ratio > 1.0 && ratio < MAX_COMPRESSION_RATIO);
        assert!(compression_ratio("").is_none());
    }

    #[test]
    fn test_translation_length_ratio() {
        let params = ValidationParams::default().with_original_length(1000);
        assert_eq!(
            validate_translation(&prose(750), &params).code(),
            Some("translation_too_short")
        );
        assert!(validate_translation(&prose(900), &params).is_pass());
        assert_eq!(
            validate_translation(&prose(1300), &params).code(),
            Some("translation_too_long")
        );
    }

    #[test]
    fn test_translation_requires_original_length() {
        let verdict = validate_translation(&prose(900), &ValidationParams::default());
        assert_eq!(verdict.code(), Some("missing_original_length"));
    }

    #[test]
    fn test_translation_runs_statistical_gate_first() {
        let params = ValidationParams::default().with_original_length(100);
        assert_eq!(
            validate_translation("too short", &params).code(),
            Some("too_short")
        );
    }

    #[test]
    fn test_custom_validator() {
        let validation = Validation::custom(|text, _| {
            if text.contains("TODO") {
                ValidationVerdict::Fail(FailureReason::Custom("placeholder left in".to_string()))
            } else {
                ValidationVerdict::Pass
            }
        });
        let params = ValidationParams::default();
        assert!(validate("all done", &validation, &params).is_pass());
        assert_eq!(validate("TODO: write", &validation, &params).code(), Some("custom"));
        assert_eq!(format!("{:?}", validation), "Custom(..)");
    }

    #[test]
    fn test_validation_level_parsing() {
        assert_eq!("v3".parse::<ValidationLevel>().unwrap(), ValidationLevel::Statistical);
        assert_eq!("None".parse::<ValidationLevel>().unwrap(), ValidationLevel::None);
        assert!("strict".parse::<ValidationLevel>().is_err());
        let level: ValidationLevel = serde_json::from_str("\"v3\"").unwrap();
        assert!(matches!(Validation::from(level), Validation::Statistical));
    }
}
