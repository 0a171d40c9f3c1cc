use std::borrow::Cow;
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    PoisonError,
};

use cached::{
    Cached,
    SizedCache,
};
use log::debug;

use super::matchers::{
    IdMatcher,
    LooseMatcher,
    RawMatch,
    StrictMatcher,
};
use super::time::TimeParser;
use crate::data_structs::typedef::*;
use crate::data_structs::{
    ParsedSampleId,
    TissueCode,
    TissueVocabulary,
};
use crate::error::ParseError;

/// Cached result of parsing one raw identifier. `Ok(None)` means that no
/// matcher recognised the text.
pub type ParseOutcome = Result<Option<ParsedSampleId>, ParseError>;

pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// Decodes sample identifiers through an ordered chain of matchers.
///
/// Each call to [`SampleIdParser::parse`]:
/// 1. trims the input and splits off a leading time expression;
/// 2. rewrites a leading tissue full name to its code;
/// 3. runs the matchers in order (strict, then loose by default) and keeps
///    the first match;
/// 4. rejects group or animal values below 1.
///
/// Results are memoized per raw string in a cache whose eviction policy is
/// the `C` store. The cache sits behind a mutex so the parser can be shared
/// between threads.
pub struct SampleIdParser<C = SizedCache<String, ParseOutcome>> {
    vocabulary: Arc<TissueVocabulary>,
    matchers:   Vec<Box<dyn IdMatcher>>,
    cache:      Mutex<C>,
}

impl SampleIdParser {
    /// Parser with a bounded LRU cache of `capacity` entries.
    pub fn try_new(
        vocabulary: Arc<TissueVocabulary>,
        capacity: usize,
    ) -> Result<Self, regex_lite::Error> {
        Self::with_cache(vocabulary, SizedCache::with_size(capacity.max(1)))
    }

    /// Standard vocabulary and the default cache size.
    pub fn standard() -> Result<Self, regex_lite::Error> {
        Self::try_new(TissueVocabulary::standard(), DEFAULT_CACHE_SIZE)
    }
}

impl<C> SampleIdParser<C>
where
    C: Cached<String, ParseOutcome> + Send,
{
    pub fn with_cache(
        vocabulary: Arc<TissueVocabulary>,
        cache: C,
    ) -> Result<Self, regex_lite::Error> {
        let matchers: Vec<Box<dyn IdMatcher>> = vec![
            Box::new(StrictMatcher::try_new(&vocabulary)?),
            Box::new(LooseMatcher::try_new()?),
        ];
        Ok(Self {
            vocabulary,
            matchers,
            cache: Mutex::new(cache),
        })
    }

    /// Replaces the matcher chain. Clears the cache, since cached results
    /// came from the old chain.
    pub fn with_matchers(
        self,
        matchers: Vec<Box<dyn IdMatcher>>,
    ) -> Self {
        self.clear_cache();
        Self { matchers, ..self }
    }

    pub fn vocabulary(&self) -> &Arc<TissueVocabulary> {
        &self.vocabulary
    }

    pub fn matchers(&self) -> &[Box<dyn IdMatcher>] {
        &self.matchers
    }

    fn lock_cache(&self) -> MutexGuard<'_, C> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clear_cache(&self) {
        self.lock_cache().cache_clear();
    }

    pub fn cache_len(&self) -> usize {
        self.lock_cache().cache_size()
    }

    /// Parses `raw`, consulting the cache first.
    pub fn parse(
        &self,
        raw: &str,
    ) -> ParseOutcome {
        let key = raw.to_owned();
        if let Some(hit) = self.lock_cache().cache_get(&key) {
            return hit.clone();
        }
        // Parsed outside the lock; a concurrent miss on the same key only
        // repeats the same pure computation.
        let outcome = self.parse_uncached(raw);
        self.lock_cache().cache_set(key, outcome.clone());
        outcome
    }

    /// Whether any matcher accepts the trimmed identifier. Used as a cheap
    /// pre-filter, so it skips time stripping and name rewriting.
    pub fn is_candidate(
        &self,
        raw: &str,
    ) -> bool {
        let trimmed = raw.trim();
        self.matchers.iter().any(|m| m.is_candidate(trimmed))
    }

    fn rewrite_full_name<'a>(
        &self,
        text: &'a str,
    ) -> Cow<'a, str> {
        match self.vocabulary.code_for_prefix(text) {
            Some((code, consumed)) => {
                Cow::Owned(format!("{}_{}", code.as_str(), &text[consumed..]))
            },
            None => Cow::Borrowed(text),
        }
    }

    fn parse_uncached(
        &self,
        raw: &str,
    ) -> ParseOutcome {
        let trimmed = raw.trim();
        let (time, rest) = TimeParser::split_prefix(trimmed);
        let rewritten = self.rewrite_full_name(rest);

        for matcher in self.matchers.iter() {
            if let Some(found) = matcher.try_match(&rewritten) {
                return build_parsed(raw, found, time).map(Some);
            }
        }
        debug!("No pattern matched sample identifier '{}'", raw);
        Ok(None)
    }

    /// Tolerant tissue lookup that never fails.
    ///
    /// Tries, in order: a code as the leading token, a full name at the
    /// start, then every vocabulary pattern anywhere in the text.
    pub fn extract_tissue(
        &self,
        raw: &str,
    ) -> TissueCode {
        let (_, rest) = TimeParser::split_prefix(raw.trim());
        let token = rest
            .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
            .next()
            .unwrap_or_default();
        if let Some(code) = self.vocabulary.match_code(token) {
            return code;
        }
        if let Some((code, _)) = self.vocabulary.code_for_prefix(rest) {
            return code;
        }
        self.vocabulary.search(rest)
    }
}

fn positive_id(
    raw: &str,
    field: &str,
    text: &str,
) -> Result<u32, ParseError> {
    let value = text.parse::<i64>().map_err(|_| {
        ParseError::malformed(raw, format!("{} '{}' is out of range", field, text))
    })?;
    if value <= 0 {
        return Err(ParseError::malformed(
            raw,
            format!("{} must be positive, got {}", field, value),
        ));
    }
    u32::try_from(value).map_err(|_| {
        ParseError::malformed(raw, format!("{} '{}' is out of range", field, text))
    })
}

fn build_parsed(
    raw: &str,
    found: RawMatch,
    time: Option<HoursType>,
) -> Result<ParsedSampleId, ParseError> {
    let group: GroupType = positive_id(raw, "group", found.group)?;
    let animal: AnimalType = positive_id(raw, "animal", found.animal)?;
    ParsedSampleId::try_new(found.well, group, animal, time, found.tissue)
        .ok_or_else(|| ParseError::malformed(raw, "invalid time value"))
}
