// Dictionary-driven segmenter.
//
// Splits text into an ordered list of tokens that concatenate back to the
// input exactly. Dictionary words are preferred over the default tokens, so a
// term written to the dictionary file comes back out as a single token that
// the cache can fingerprint and mask.
//
// Default tokens:
//   - a run of word characters (alphanumeric, excluding CJK ideographs/kana)
//   - a run of whitespace
//   - any other single character (ideographs, kana, punctuation, emoji)
//
// Dictionary words may start and end anywhere except inside a word-character
// run, so "spam" never matches the front of "spammer". Every occurrence of
// every word is found in one Aho-Corasick pass over the text; within CJK text,
// where there are no spaces, a dynamic-programming route over those matches
// picks the segmentation that covers the most characters with dictionary
// words, then uses the fewest tokens, then has the highest total weight.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use anyhow::{Context, Result};
use regex_lite::Regex;
use tracing::warn;

use super::files::DictionaryFormat;

/// Weight given to dictionary lines without a weight column.
pub const DEFAULT_WEIGHT: u64 = 1;

/// `term [weight]` — the term is everything up to an optional trailing integer.
const LINE_PATTERN: &str = r"^(.+?)(?:\s+(\d+))?$";

#[derive(Debug, Clone, Default)]
pub struct DictSegmenter {
    words: HashMap<String, u64>,
    // Built on first use; reset whenever a word is added.
    matcher: OnceLock<Matcher>,
}

#[derive(Debug, Clone)]
struct Matcher {
    automaton: AhoCorasick,
    weights: Vec<u64>,
}

impl Matcher {
    fn build(words: &HashMap<String, u64>) -> Result<Self> {
        let (patterns, weights): (Vec<&str>, Vec<u64>) = words
            .iter()
            .filter(|(word, _)| !word.is_empty())
            .map(|(word, &weight)| (word.as_str(), weight))
            .unzip();
        let automaton = AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .build(&patterns)
            .context("Failed to build dictionary automaton")?;
        Ok(Self { automaton, weights })
    }
}

impl DictSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a segmenter from static dictionary files, read in order.
    /// Lines are `term [weight]`; `#` starts a comment line.
    /// Later files override the weight of words seen earlier.
    pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let pattern = Regex::new(LINE_PATTERN)?;
        let mut segmenter = Self::new();
        for path in paths {
            let path = path.as_ref();
            let file = File::open(path)
                .with_context(|| format!("Failed to open dictionary {}", path.display()))?;
            segmenter
                .load_lines(BufReader::new(file), &path.display().to_string(), &pattern)
                .with_context(|| format!("Failed to load dictionary {}", path.display()))?;
        }
        segmenter.compile()?;
        Ok(segmenter)
    }

    /// Parse static dictionary lines from any reader. `source` names the input in errors.
    pub fn load_reader<R: BufRead>(&mut self, reader: R, source: &str) -> Result<()> {
        let pattern = Regex::new(LINE_PATTERN)?;
        self.load_lines(reader, source, &pattern)?;
        self.compile()
    }

    /// Load the backing dictionary file exactly as it was written in `format`.
    ///
    /// Every line is a term: nothing is a comment, and in `Bare` format a
    /// trailing number is part of the term rather than a weight.
    pub fn load_user_file(&mut self, path: &Path, format: DictionaryFormat) -> Result<()> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open dictionary {}", path.display()))?;
        let source = path.display().to_string();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("{source}:{}: unreadable line", index + 1))?;
            if line.is_empty() {
                continue;
            }
            match format {
                DictionaryFormat::Bare => self.insert(&line, DEFAULT_WEIGHT),
                DictionaryFormat::Weighted(_) => {
                    let (word, weight) = line
                        .rsplit_once(' ')
                        .with_context(|| format!("{source}:{}: missing weight", index + 1))?;
                    let weight = weight.parse::<u64>().with_context(|| {
                        format!("{source}:{}: invalid weight {weight:?}", index + 1)
                    })?;
                    if word.is_empty() {
                        anyhow::bail!("{source}:{}: empty term", index + 1);
                    }
                    self.insert(word, weight);
                }
            }
        }
        self.compile()
    }

    fn load_lines<R: BufRead>(&mut self, reader: R, source: &str, pattern: &Regex) -> Result<()> {
        for (index, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("{source}:{}: unreadable line", index + 1))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let caps = pattern
                .captures(line)
                .with_context(|| format!("{source}:{}: malformed entry", index + 1))?;
            let word = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            if word.is_empty() {
                anyhow::bail!("{source}:{}: empty term", index + 1);
            }
            let weight = match caps.get(2) {
                Some(w) => w.as_str().parse::<u64>().with_context(|| {
                    format!("{source}:{}: invalid weight {:?}", index + 1, w.as_str())
                })?,
                None => DEFAULT_WEIGHT,
            };
            self.insert(word, weight);
        }
        Ok(())
    }

    pub fn insert(&mut self, word: &str, weight: u64) {
        self.words.insert(word.to_string(), weight);
        self.matcher = OnceLock::new();
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains_key(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Build the match automaton now so that a failure surfaces at load time.
    fn compile(&self) -> Result<()> {
        self.matcher().map(|_| ())
    }

    fn matcher(&self) -> Result<&Matcher> {
        if let Some(matcher) = self.matcher.get() {
            return Ok(matcher);
        }
        let built = Matcher::build(&self.words)?;
        Ok(self.matcher.get_or_init(|| built))
    }

    /// Split `text` into tokens. Concatenating the result yields `text`.
    pub fn segment<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if text.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let n = chars.len();

        // matches[i] holds (end, weight) for every dictionary word starting at char i
        let mut matches: Vec<Vec<(usize, u64)>> = vec![Vec::new(); n];
        if !self.words.is_empty() {
            match self.matcher() {
                Ok(matcher) => {
                    let mut char_at = vec![usize::MAX; text.len() + 1];
                    for (index, &offset) in offsets.iter().enumerate() {
                        char_at[offset] = index;
                    }
                    for found in matcher.automaton.find_overlapping_iter(text) {
                        let (i, j) = (char_at[found.start()], char_at[found.end()]);
                        if i == usize::MAX || j == usize::MAX || i >= j {
                            continue;
                        }
                        if is_boundary(&chars, i) && is_boundary(&chars, j) {
                            matches[i].push((j, matcher.weights[found.pattern().as_usize()]));
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Segmenting without dictionary words"),
            }
        }

        // best[i] is the best route for the suffix starting at char i
        let mut best = vec![Route::default(); n + 1];
        for i in (0..n).rev() {
            let fallback_end = default_token_end(&chars, i);
            let mut route = best[fallback_end].step(fallback_end, 0, 0);

            for &(j, weight) in &matches[i] {
                let candidate = best[j].step(j, j - i, weight);
                if candidate.rank() > route.rank() {
                    route = candidate;
                }
            }

            best[i] = route;
        }

        let mut tokens = Vec::new();
        let mut i = 0;
        while i < n {
            let end = best[i].next;
            tokens.push(&text[offsets[i]..offsets[end]]);
            i = end;
        }
        tokens
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Route {
    covered: usize,
    tokens: usize,
    weight: u64,
    next: usize,
}

impl Route {
    /// A route that emits one token ending at `next` and then follows `self`.
    fn step(&self, next: usize, covered: usize, weight: u64) -> Route {
        Route {
            covered: self.covered + covered,
            tokens: self.tokens + 1,
            weight: self.weight.saturating_add(weight),
            next,
        }
    }

    fn rank(&self) -> (usize, Reverse<usize>, u64) {
        (self.covered, Reverse(self.tokens), self.weight)
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF        // hiragana, katakana
        | 0x3400..=0x4DBF      // CJK extension A
        | 0x4E00..=0x9FFF      // CJK unified ideographs
        | 0xF900..=0xFAFF      // compatibility ideographs
        | 0x20000..=0x2FA1F)   // extensions B+
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() && !is_cjk(c)
}

/// A token may start or end at `i` unless that would split a word-character run.
fn is_boundary(chars: &[char], i: usize) -> bool {
    i == 0 || i == chars.len() || !(is_word_char(chars[i - 1]) && is_word_char(chars[i]))
}

fn default_token_end(chars: &[char], start: usize) -> usize {
    let first = chars[start];
    let same_class: fn(char) -> bool = if is_word_char(first) {
        is_word_char
    } else if first.is_whitespace() {
        char::is_whitespace
    } else {
        return start + 1;
    };

    let mut end = start + 1;
    while end < chars.len() && same_class(chars[end]) {
        end += 1;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter(words: &[&str]) -> DictSegmenter {
        let mut s = DictSegmenter::new();
        for w in words {
            s.insert(w, DEFAULT_WEIGHT);
        }
        s
    }

    #[test]
    fn test_empty_input() {
        assert!(segmenter(&["spam"]).segment("").is_empty());
    }

    #[test]
    fn test_default_tokens_without_dictionary() {
        let tokens = DictSegmenter::new().segment("buy  spam, now!");
        assert_eq!(tokens, vec!["buy", "  ", "spam", ",", " ", "now", "!"]);
    }

    #[test]
    fn test_word_runs_are_not_split() {
        let tokens = segmenter(&["spam"]).segment("spammer spam");
        assert_eq!(tokens, vec!["spammer", " ", "spam"]);
    }

    #[test]
    fn test_cjk_dictionary_words() {
        let tokens = segmenter(&["垃圾", "广告"]).segment("这是垃圾广告");
        assert_eq!(tokens, vec!["这", "是", "垃圾", "广告"]);
    }

    #[test]
    fn test_prefers_coverage_then_fewer_tokens() {
        // "垃圾广告" alone covers the same 4 chars as "垃圾"+"广告" in one token
        let tokens = segmenter(&["垃圾", "广告", "垃圾广告"]).segment("垃圾广告");
        assert_eq!(tokens, vec!["垃圾广告"]);
    }

    #[test]
    fn test_weight_breaks_ties() {
        let mut s = DictSegmenter::new();
        s.insert("甲乙", 1);
        s.insert("乙丙", 10);
        s.insert("甲", 1);
        s.insert("丙", 1);
        // Both "甲乙|丙" and "甲|乙丙" cover 3 chars in 2 tokens; "乙丙" is heavier
        assert_eq!(s.segment("甲乙丙"), vec!["甲", "乙丙"]);
    }

    #[test]
    fn test_mixed_scripts() {
        let tokens = segmenter(&["spam"]).segment("买spam吧");
        assert_eq!(tokens, vec!["买", "spam", "吧"]);
    }

    #[test]
    fn test_multi_word_entry() {
        let tokens = segmenter(&["bad word"]).segment("a bad word here");
        assert_eq!(tokens, vec!["a", " ", "bad word", " ", "here"]);
    }

    #[test]
    fn test_tokens_concatenate_to_input() {
        let s = segmenter(&["垃圾", "spam", "x y"]);
        for text in ["", "垃圾spam x y 😀", "  leading", "trailing\n", "ünïcödé spam"] {
            assert_eq!(s.segment(text).concat(), text);
        }
    }

    #[test]
    fn test_load_reader_parses_weights_and_comments() {
        let mut s = DictSegmenter::new();
        let input = "# comment\nspam 100000\n\n垃圾\nbad word 5\ncatch 22\n";
        s.load_reader(input.as_bytes(), "test").unwrap();
        assert_eq!(s.len(), 4);
        assert!(s.contains("spam"));
        assert!(s.contains("垃圾"));
        assert!(s.contains("bad word"));
        // A bare trailing integer reads as a weight
        assert!(s.contains("catch"));
        assert!(!s.contains("catch 22"));
    }

    #[test]
    fn test_load_reader_rejects_bad_weight() {
        let mut s = DictSegmenter::new();
        let err = s
            .load_reader("spam 99999999999999999999999\n".as_bytes(), "dict.txt")
            .unwrap_err();
        assert!(err.to_string().contains("dict.txt:1"));
    }

    #[test]
    fn test_load_reader_rejects_invalid_utf8() {
        let mut s = DictSegmenter::new();
        let bytes: &[u8] = b"spam\n\xff\xfe\n";
        assert!(s.load_reader(bytes, "dict.txt").is_err());
    }

    #[test]
    fn test_long_word_does_not_slow_segmentation() {
        let mut s = segmenter(&["乙乙", "垃圾"]);
        s.insert(&"甲".repeat(1000), DEFAULT_WEIGHT);
        let text = "乙".repeat(20_000);

        let started = std::time::Instant::now();
        let tokens = s.segment(&text);
        assert!(
            started.elapsed() < std::time::Duration::from_secs(2),
            "segmenting took {:?}",
            started.elapsed()
        );
        assert_eq!(tokens.len(), 10_000);
        assert!(tokens.iter().all(|t| *t == "乙乙"));
    }

    #[test]
    fn test_long_word_still_matches() {
        let long = "甲".repeat(1000);
        let mut s = DictSegmenter::new();
        s.insert(&long, DEFAULT_WEIGHT);
        let text = format!("乙{long}乙");
        assert_eq!(s.segment(&text), vec!["乙", long.as_str(), "乙"]);
    }

    #[test]
    fn test_insert_after_segment_is_visible() {
        let mut s = segmenter(&["spam"]);
        assert_eq!(s.segment("spam eggs"), vec!["spam", " ", "eggs"]);
        s.insert("spam eggs", DEFAULT_WEIGHT);
        assert_eq!(s.segment("spam eggs"), vec!["spam eggs"]);
    }

    fn user_file(lines: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("userdict.txt");
        std::fs::write(&path, lines).unwrap();
        (dir, path)
    }

    #[test]
    fn test_user_file_has_no_comments() {
        let (_dir, path) = user_file("#spam 100000\nnow 100000\n");
        let mut s = DictSegmenter::new();
        s.load_user_file(&path, DictionaryFormat::Weighted(100_000)).unwrap();
        assert!(s.contains("#spam"));
        assert_eq!(s.segment("buy #spam now"), vec!["buy", " ", "#spam", " ", "now"]);
    }

    #[test]
    fn test_bare_user_file_keeps_trailing_numbers() {
        let (_dir, path) = user_file("catch 22\n#tag\n");
        let mut s = DictSegmenter::new();
        s.load_user_file(&path, DictionaryFormat::Bare).unwrap();
        assert!(s.contains("catch 22"));
        assert!(s.contains("#tag"));
        assert!(!s.contains("catch"));
    }

    #[test]
    fn test_weighted_user_file_splits_last_column_only() {
        let (_dir, path) = user_file("catch 22 100000\n");
        let mut s = DictSegmenter::new();
        s.load_user_file(&path, DictionaryFormat::Weighted(100_000)).unwrap();
        assert!(s.contains("catch 22"));
    }

    #[test]
    fn test_weighted_user_file_rejects_missing_weight() {
        let (_dir, path) = user_file("spam\n");
        let mut s = DictSegmenter::new();
        let err = s
            .load_user_file(&path, DictionaryFormat::Weighted(100_000))
            .unwrap_err();
        assert!(err.to_string().contains(":1:"));
    }
}
