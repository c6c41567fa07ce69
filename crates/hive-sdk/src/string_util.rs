/// String helpers shared by the worker crates.
pub struct StringUtil;

impl StringUtil {
    /// Convert a string to a boolean.
    ///
    /// Valid true values: `"1"`, `"true"`, `"yes"`, `"on"` (case-insensitive).
    /// Valid false values: `"0"`, `"false"`, `"no"`, `"off"` (case-insensitive).
    /// Returns `None` for unrecognized values.
    pub fn convert_to_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    /// Parse a debug level from an environment-style string.
    ///
    /// Integers are taken as-is; boolean words map to 1 (true) or 0 (false).
    pub fn convert_to_debug_level(value: &str) -> Option<i64> {
        let trimmed = value.trim();
        if let Ok(level) = trimmed.parse::<i64>() {
            return Some(level);
        }
        Self::convert_to_bool(trimmed).map(i64::from)
    }

    /// Returns the portion of `input` after the last occurrence of `separator`.
    /// If `separator` is not found, returns the entire string.
    pub fn sub_string_after_last(input: &str, separator: char) -> &str {
        match input.rfind(separator) {
            Some(idx) => &input[idx + separator.len_utf8()..],
            None => input,
        }
    }

    /// Levenshtein distance between two strings, counted in chars.
    pub fn edit_distance(a: &str, b: &str) -> usize {
        let b_chars: Vec<char> = b.chars().collect();
        let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
        let mut current = vec![0; b_chars.len() + 1];

        for (i, ca) in a.chars().enumerate() {
            current[0] = i + 1;
            for (j, cb) in b_chars.iter().enumerate() {
                let cost = usize::from(ca != *cb);
                current[j + 1] = (previous[j] + cost)
                    .min(previous[j + 1] + 1)
                    .min(current[j] + 1);
            }
            std::mem::swap(&mut previous, &mut current);
        }

        previous[b_chars.len()]
    }

    /// Sort `candidates` by decreasing similarity to `target`.
    ///
    /// Ties keep their original relative order.
    pub fn sort_by_similarity<S: AsRef<str>>(target: &str, candidates: &mut [S]) {
        candidates.sort_by_key(|c| Self::edit_distance(target, c.as_ref()));
    }
}
