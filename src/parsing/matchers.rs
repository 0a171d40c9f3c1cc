use std::str::FromStr;

use regex_lite::Regex;

use crate::data_structs::{
    TissueCode,
    TissueVocabulary,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    /// Whole-string `[TISSUE_]?[WELL_]?GROUP.ANIMAL[.fcs]?` match.
    Strict,
    /// Any `GROUP.ANIMAL` substring.
    Loose,
}

/// Unvalidated fields of one matched identifier.
///
/// Group and animal stay as text so that the caller decides how to treat
/// signs and overflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMatch<'a> {
    pub kind:   MatchKind,
    pub tissue: TissueCode,
    pub well:   Option<String>,
    pub group:  &'a str,
    pub animal: &'a str,
}

/// One stage of the identifier fallback chain.
pub trait IdMatcher: Send + Sync {
    fn kind(&self) -> MatchKind;

    fn try_match<'a>(
        &self,
        text: &'a str,
    ) -> Option<RawMatch<'a>>;

    /// Cheap check used to pre-filter rows before full parsing.
    fn is_candidate(
        &self,
        text: &str,
    ) -> bool {
        self.try_match(text).is_some()
    }
}

pub struct StrictMatcher {
    regex: Regex,
}

impl StrictMatcher {
    /// Compiles the anchored pattern with the codes of `vocabulary` as the
    /// tissue alternatives.
    ///
    /// A hyphen right after the tissue code is a separator, so a sign is
    /// only read at the start or after `_`.
    pub fn try_new(vocabulary: &TissueVocabulary) -> Result<Self, regex_lite::Error> {
        let pattern = format!(
            r"(?i)^(?:({})[_-]?)?(?:([A-P]\d{{1,2}})_)?(-?\d+)\.(-?\d+)(?:\.fcs)?$",
            vocabulary.code_alternation()
        );
        Ok(Self {
            regex: Regex::new(&pattern)?,
        })
    }
}

impl IdMatcher for StrictMatcher {
    fn kind(&self) -> MatchKind {
        MatchKind::Strict
    }

    fn try_match<'a>(
        &self,
        text: &'a str,
    ) -> Option<RawMatch<'a>> {
        let captures = self.regex.captures(text)?;
        let tissue = captures
            .get(1)
            .and_then(|m| TissueCode::from_str(m.as_str()).ok())
            .unwrap_or(TissueCode::Unknown);
        Some(RawMatch {
            kind: MatchKind::Strict,
            tissue,
            well: captures.get(2).map(|m| m.as_str().to_uppercase()),
            group: captures.get(3)?.as_str(),
            animal: captures.get(4)?.as_str(),
        })
    }

    fn is_candidate(
        &self,
        text: &str,
    ) -> bool {
        self.regex.is_match(text)
    }
}

pub struct LooseMatcher {
    regex: Regex,
}

impl LooseMatcher {
    pub fn try_new() -> Result<Self, regex_lite::Error> {
        Ok(Self {
            regex: Regex::new(r"(-?\d+)\.(-?\d+)")?,
        })
    }
}

impl IdMatcher for LooseMatcher {
    fn kind(&self) -> MatchKind {
        MatchKind::Loose
    }

    fn try_match<'a>(
        &self,
        text: &'a str,
    ) -> Option<RawMatch<'a>> {
        let captures = self.regex.captures(text)?;
        let group_match = captures.get(1)?;
        let mut group = group_match.as_str();
        // "Sample-1.2": a hyphen glued to a word is a separator.
        if group.starts_with('-')
            && text[..group_match.start()]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric())
        {
            group = &group[1..];
        }
        Some(RawMatch {
            kind: MatchKind::Loose,
            tissue: TissueCode::Unknown,
            well: None,
            group,
            animal: captures.get(2)?.as_str(),
        })
    }

    fn is_candidate(
        &self,
        text: &str,
    ) -> bool {
        self.regex.is_match(text)
    }
}
