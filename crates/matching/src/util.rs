/// Levenshtein edit distance over Unicode scalar values, two-row O(min(m,n)) space.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();

    // Shorter string drives the row width.
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return long.len();
    }

    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut curr = vec![0usize; short.len() + 1];

    for (i, lc) in long.iter().enumerate() {
        curr[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let cost = usize::from(lc != sc);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[short.len()]
}

/// Similarity in whole percent (0-100): `1 - distance / longer_length`.
pub fn similarity_percent(s1: &str, s2: &str) -> u8 {
    if s1 == s2 {
        return 100;
    }
    let max_len = s1.chars().count().max(s2.chars().count());
    if max_len == 0 || s1.is_empty() || s2.is_empty() {
        return 0;
    }
    let distance = levenshtein_distance(s1, s2);
    let ratio = 1.0 - distance as f64 / max_len as f64;
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_are_zero() {
        assert_eq!(levenshtein_distance("netflix", "netflix"), 0);
        assert_eq!(levenshtein_distance("", ""), 0);
    }

    #[test]
    fn empty_string_is_length_of_other() {
        assert_eq!(levenshtein_distance("", "rent"), 4);
        assert_eq!(levenshtein_distance("rent", ""), 4);
    }

    #[test]
    fn counts_chars_not_bytes() {
        assert_eq!(levenshtein_distance("café", "cafe"), 1);
    }

    #[test]
    fn commutative() {
        assert_eq!(
            levenshtein_distance("spotify", "spotfy ab"),
            levenshtein_distance("spotfy ab", "spotify")
        );
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity_percent("grab", "grab"), 100);
        assert_eq!(similarity_percent("", "grab"), 0);
        assert_eq!(similarity_percent("abcd", "wxyz"), 0);
    }

    #[test]
    fn similarity_rounds_to_whole_percent() {
        // one edit across ten characters
        assert_eq!(similarity_percent("starbucks1", "starbucks2"), 90);
        assert_eq!(similarity_percent("netflix", "netflx"), 86);
    }
}
