use std::convert::Infallible;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{
    Deserialize,
    Serialize,
};

/// Canonical short token for a biological sample source.
#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug, PartialOrd, Ord)]
pub enum TissueCode {
    /// Spleen.
    SP,
    /// Bone marrow.
    BM,
    /// Whole blood.
    WB,
    /// Lymph node.
    LN,
    /// Thymus.
    TH,
    /// Liver.
    LI,
    /// Lung.
    LU,
    /// Kidney.
    KD,
    /// Synovial fluid/tissue.
    SV,
    /// Peritoneal cavity.
    PL,
    /// Adipose tissue.
    AD,
    /// Brain.
    BR,
    /// Heart.
    HE,
    /// No vocabulary entry matched.
    Unknown,
}

impl TissueCode {
    /// Every known code in vocabulary order.
    pub const KNOWN: [TissueCode; 13] = [
        TissueCode::SP,
        TissueCode::BM,
        TissueCode::WB,
        TissueCode::LN,
        TissueCode::TH,
        TissueCode::LI,
        TissueCode::LU,
        TissueCode::KD,
        TissueCode::SV,
        TissueCode::PL,
        TissueCode::AD,
        TissueCode::BR,
        TissueCode::HE,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            TissueCode::SP => "SP",
            TissueCode::BM => "BM",
            TissueCode::WB => "WB",
            TissueCode::LN => "LN",
            TissueCode::TH => "TH",
            TissueCode::LI => "LI",
            TissueCode::LU => "LU",
            TissueCode::KD => "KD",
            TissueCode::SV => "SV",
            TissueCode::PL => "PL",
            TissueCode::AD => "AD",
            TissueCode::BR => "BR",
            TissueCode::HE => "HE",
            TissueCode::Unknown => "UNK",
        }
    }

    /// English name used by the standard vocabulary.
    pub const fn default_full_name(&self) -> &'static str {
        match self {
            TissueCode::SP => "Spleen",
            TissueCode::BM => "Bone Marrow",
            TissueCode::WB => "Whole Blood",
            TissueCode::LN => "Lymph Node",
            TissueCode::TH => "Thymus",
            TissueCode::LI => "Liver",
            TissueCode::LU => "Lung",
            TissueCode::KD => "Kidney",
            TissueCode::SV => "Synovial",
            TissueCode::PL => "Peritoneal",
            TissueCode::AD => "Adipose",
            TissueCode::BR => "Brain",
            TissueCode::HE => "Heart",
            TissueCode::Unknown => "Unknown tissue",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, TissueCode::Unknown)
    }
}

impl Display for TissueCode {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TissueCode {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Ok(TissueCode::KNOWN
            .into_iter()
            .find(|code| code.as_str() == upper)
            .unwrap_or(TissueCode::Unknown))
    }
}

impl Serialize for TissueCode {
    fn serialize<S>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer, {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TissueCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>, {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Turns a possibly multi-word name into a pattern that tolerates any
/// run of whitespace or underscores between the words.
fn name_pattern(name: &str) -> String {
    name.split_whitespace()
        .map(regex_lite::escape)
        .join(r"[\s_]*")
}

/// One vocabulary row: a code, its English name and extra spellings.
#[derive(Debug, Clone)]
pub struct TissueEntry {
    code:      TissueCode,
    full_name: String,
    aliases:   Vec<String>,
    patterns:  Vec<Regex>,
    prefix:    Regex,
}

impl TissueEntry {
    pub fn try_new(
        code: TissueCode,
        full_name: &str,
        aliases: &[&str],
    ) -> Result<Self, regex_lite::Error> {
        let names = std::iter::once(full_name)
            .chain(aliases.iter().copied())
            .map(name_pattern)
            .collect_vec();

        let mut patterns = Vec::with_capacity(names.len() + 1);
        patterns.push(Regex::new(&format!(r"(?i)\b{}\b", code.as_str()))?);
        for name in names.iter() {
            patterns.push(Regex::new(&format!(r"(?i)\b{}\b", name))?);
        }
        let prefix = Regex::new(&format!(
            r"(?i)^(?:{})(?:[\s_\-]+|$)",
            names.iter().join("|")
        ))?;

        Ok(Self {
            code,
            full_name: full_name.to_owned(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            patterns,
            prefix,
        })
    }

    pub fn code(&self) -> TissueCode {
        self.code
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Code token first, then the full name, then aliases.
    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }
}

static STANDARD_VOCABULARY: Lazy<Arc<TissueVocabulary>> = Lazy::new(|| {
    let entries = TissueCode::KNOWN
        .into_iter()
        .map(|code| {
            let aliases: &[&str] = match code {
                TissueCode::WB => &["Peripheral Blood"],
                TissueCode::LI => &["liv"],
                _ => &[],
            };
            TissueEntry::try_new(code, code.default_full_name(), aliases)
        })
        .collect::<Result<Vec<_>, _>>()
        .expect("Standard tissue patterns are valid");
    Arc::new(TissueVocabulary::new(entries))
});

/// Immutable lookup between tissue codes, full names and match patterns.
///
/// Built once and shared with the parser through an [`Arc`]. Entry order is
/// the search order used by [`TissueVocabulary::search`].
#[derive(Debug, Clone)]
pub struct TissueVocabulary {
    entries: Vec<TissueEntry>,
}

impl TissueVocabulary {
    pub fn new(entries: Vec<TissueEntry>) -> Self {
        Self { entries }
    }

    /// The thirteen standard codes with their English names.
    pub fn standard() -> Arc<Self> {
        STANDARD_VOCABULARY.clone()
    }

    pub fn entries(&self) -> &[TissueEntry] {
        &self.entries
    }

    pub fn entry(
        &self,
        code: TissueCode,
    ) -> Option<&TissueEntry> {
        self.entries.iter().find(|e| e.code == code)
    }

    pub fn codes(&self) -> impl Iterator<Item = TissueCode> + '_ {
        self.entries.iter().map(|e| e.code)
    }

    /// Ordered case-insensitive alternatives for `code`. Empty for codes
    /// missing from this vocabulary.
    pub fn patterns_for(
        &self,
        code: TissueCode,
    ) -> &[Regex] {
        self.entry(code).map(|e| e.patterns()).unwrap_or(&[])
    }

    pub fn full_name(
        &self,
        code: TissueCode,
    ) -> &str {
        self.entry(code)
            .map(|e| e.full_name())
            .unwrap_or(code.default_full_name())
    }

    /// Exact, case-insensitive match of a code token.
    pub fn match_code(
        &self,
        token: &str,
    ) -> Option<TissueCode> {
        self.codes()
            .find(|code| code.as_str().eq_ignore_ascii_case(token))
    }

    /// Code whose full name or alias starts `text` as a whole word, with the
    /// byte length of the name and its trailing separator.
    pub fn code_for_prefix(
        &self,
        text: &str,
    ) -> Option<(TissueCode, usize)> {
        self.entries
            .iter()
            .find_map(|e| e.prefix.find(text).map(|m| (e.code, m.end())))
    }

    /// First entry with any pattern found anywhere in `text`.
    pub fn search(
        &self,
        text: &str,
    ) -> TissueCode {
        self.entries
            .iter()
            .find(|e| e.patterns.iter().any(|p| p.is_match(text)))
            .map(|e| e.code)
            .unwrap_or(TissueCode::Unknown)
    }

    /// Regex alternation over the codes, longest first.
    pub(crate) fn code_alternation(&self) -> String {
        self.codes()
            .map(|c| c.as_str())
            .sorted_by_key(|s| std::cmp::Reverse(s.len()))
            .join("|")
    }
}
