use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

/// Score for one candidate; higher is closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub score: i64,
}

/// Ranks catalog names against what an operator typed.
pub struct FzfMatcher {
    matcher: SkimMatcherV2,
}

impl FzfMatcher {
    pub fn new() -> Self {
        Self {
            matcher: SkimMatcherV2::default(),
        }
    }

    pub fn fuzzy_match(&self, pattern: &str, text: &str) -> Option<MatchResult> {
        self.matcher
            .fuzzy_match(text, pattern)
            .map(|score| MatchResult { score })
    }

    /// Candidate contains the whole pattern.
    pub fn exact_match(&self, pattern: &str, text: &str) -> Option<MatchResult> {
        text.contains(pattern).then(|| MatchResult {
            score: 1000 + (pattern.len() * 10) as i64,
        })
    }

    pub fn prefix_match(&self, pattern: &str, text: &str) -> Option<MatchResult> {
        text.starts_with(pattern).then(|| MatchResult {
            score: 800 + (pattern.len() * 8) as i64,
        })
    }

    /// Near-miss spelling (at most two edits), for typos that break subsequence matching.
    pub fn typo_match(&self, pattern: &str, text: &str) -> Option<MatchResult> {
        let distance = edit_distance(pattern, text);
        (distance <= 2).then(|| MatchResult {
            score: 600 - (distance as i64) * 100,
        })
    }

    pub fn comprehensive_match(&self, pattern: &str, text: &str) -> Option<MatchResult> {
        if pattern.is_empty() {
            return None;
        }
        self.exact_match(pattern, text)
            .or_else(|| self.prefix_match(pattern, text))
            .or_else(|| self.typo_match(pattern, text))
            .or_else(|| self.fuzzy_match(pattern, text))
    }

    pub fn match_and_sort<T>(&self, pattern: &str, items: Vec<(T, String)>) -> Vec<(T, String, MatchResult)> {
        let mut results: Vec<(T, String, MatchResult)> = items
            .into_iter()
            .filter_map(|(item, text)| {
                self.comprehensive_match(pattern, &text)
                    .map(|m| (item, text, m))
            })
            .collect();

        // Higher score first, then shorter text.
        results.sort_by(|a, b| b.2.score.cmp(&a.2.score).then(a.1.len().cmp(&b.1.len())));
        results
    }
}

impl Default for FzfMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == *cb { 0 } else { 1 };
            current[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(current[j] + 1);
        }
        prev = current;
    }
    prev[b.len()]
}
