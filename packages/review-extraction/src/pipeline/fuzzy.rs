//! Best-substring fuzzy matching of quotes against source text.
//!
//! Scoring uses `similar`'s character diff ratio (2·matches / total chars).
//! Positions are character offsets, never byte offsets.

use similar::TextDiff;

const NEAR_EXACT: f64 = 0.99;

/// Located quote.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyMatch {
    /// Similarity in [0, 1]; 1.0 means the quote occurs verbatim
    pub score: f64,

    /// Exact source text of the best window
    pub text: String,

    pub char_start: usize,
    pub char_end: usize,
}

/// Similarity ratio of two strings in [0, 1].
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    f64::from(TextDiff::from_chars(a, b).ratio())
}

/// Find the source window that best matches `quote`.
///
/// Tries an exact match first, then slides a quote-length window with half
/// overlap and refines the best window's start and length. Returns `None`
/// when the best score is below `threshold` or the quote is blank.
pub fn find_best_match(quote: &str, source: &str, threshold: f64) -> Option<FuzzyMatch> {
    let quote = quote.trim();
    if quote.is_empty() || source.is_empty() {
        return None;
    }

    if let Some(byte_start) = source.find(quote) {
        let char_start = source[..byte_start].chars().count();
        let char_len = quote.chars().count();
        return Some(FuzzyMatch {
            score: 1.0,
            text: quote.to_string(),
            char_start,
            char_end: char_start + char_len,
        });
    }

    let source_chars: Vec<char> = source.chars().collect();
    let lowered: Vec<char> = source_chars.iter().map(|c| lower(*c)).collect();
    let needle: String = quote.chars().map(lower).collect();
    let qlen = needle.chars().count();

    let window_score = |start: usize, len: usize| -> f64 {
        let end = (start + len).min(lowered.len());
        let candidate: String = lowered[start..end].iter().collect();
        ratio(&needle, &candidate)
    };

    let (best_start, best_len, best_score) = if lowered.len() <= qlen {
        (0, lowered.len(), window_score(0, lowered.len()))
    } else {
        let step = (qlen / 2).max(1);
        let last = lowered.len() - qlen;
        let mut starts: Vec<usize> = (0..=last).step_by(step).collect();
        if starts.last() != Some(&last) {
            starts.push(last);
        }

        let (mut start, mut score) = (0, -1.0);
        for s in starts {
            let sc = window_score(s, qlen);
            if sc > score {
                start = s;
                score = sc;
            }
        }
        refine(start, qlen, score, step, lowered.len(), &window_score)
    };

    if best_score < threshold {
        return None;
    }

    let end = (best_start + best_len).min(source_chars.len());
    let text: String = source_chars[best_start..end].iter().collect();
    // Only a verbatim occurrence may score 1.0; case-only differences land just below.
    let score = if text == quote {
        1.0
    } else {
        best_score.min(NEAR_EXACT)
    };
    Some(FuzzyMatch {
        score,
        text,
        char_start: best_start,
        char_end: end,
    })
}

/// Shift the window start within one step, then stretch or shrink it.
fn refine(
    start: usize,
    len: usize,
    score: f64,
    step: usize,
    total: usize,
    window_score: &impl Fn(usize, usize) -> f64,
) -> (usize, usize, f64) {
    let (mut best_start, mut best_len, mut best_score) = (start, len, score);

    let from = start.saturating_sub(step);
    let to = (start + step).min(total.saturating_sub(len));
    for s in from..=to {
        let sc = window_score(s, len);
        if sc > best_score {
            best_start = s;
            best_score = sc;
        }
    }

    let slack = (len / 4).max(1);
    let min_len = len.saturating_sub(slack).max(1);
    let max_len = (len + slack).min(total - best_start);
    let anchor = best_start;
    for l in min_len..=max_len {
        let sc = window_score(anchor, l);
        if sc > best_score {
            best_len = l;
            best_score = sc;
        }
    }

    (best_start, best_len, best_score)
}

/// One-to-one lowercase so positions in the lowered text map back exactly.
fn lower(c: char) -> char {
    let mut lowered = c.to_lowercase();
    match (lowered.next(), lowered.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "Methods. A total of 42 patients were randomised to \
                          physiotherapy or usual care in Oslo, Norway.";

    #[test]
    fn test_exact_match_scores_one() {
        let m = find_best_match("42 patients were randomised", SOURCE, 0.8).unwrap();
        assert_eq!(m.score, 1.0);
        assert_eq!(m.text, "42 patients were randomised");
        assert_eq!(m.char_start, SOURCE.find("42").unwrap());
    }

    #[test]
    fn test_near_match_returns_source_text() {
        let m = find_best_match("42 patients were randomized", SOURCE, 0.8).unwrap();
        assert!(m.score < 1.0 && m.score >= 0.8);
        assert!(m.text.contains("randomis"));
    }

    #[test]
    fn test_absent_quote_is_none() {
        assert!(find_best_match("zzzz qqqq 9999 xxxx", SOURCE, 0.8).is_none());
        assert!(find_best_match("   ", SOURCE, 0.8).is_none());
    }

    #[test]
    fn test_case_difference_is_found_but_not_exact() {
        let m = find_best_match("OSLO, NORWAY", SOURCE, 0.8).unwrap();
        assert!(m.score < 1.0);
        assert_eq!(m.text.to_lowercase(), "oslo, norway");
    }

    #[test]
    fn test_multibyte_positions_are_char_offsets() {
        let source = "Études menées à Zürich: 120 personnes incluses.";
        let m = find_best_match("120 personnes", source, 0.8).unwrap();
        assert_eq!(m.char_start, source.chars().position(|c| c == '1').unwrap());
    }

    #[test]
    fn test_ratio_bounds() {
        assert_eq!(ratio("abc", "abc"), 1.0);
        assert_eq!(ratio("", ""), 1.0);
        assert_eq!(ratio("abc", "xyz"), 0.0);
    }
}
