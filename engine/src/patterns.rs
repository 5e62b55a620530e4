//! Ordered pattern tables
//!
//! Heuristic text classification (narrative detection, error classification,
//! fact extraction) is expressed as ordered `(regex, classification)` tables.
//! The first matching row wins. Tables are compiled once; a row whose regex
//! fails to compile is logged and dropped so classification never panics.

use regex::{Match, Regex};

/// An ordered list of compiled patterns with their classifications
#[derive(Debug)]
pub struct PatternTable<K> {
    rows: Vec<(Regex, K)>,
}

impl<K: Copy> PatternTable<K> {
    /// Compile a table from `(pattern, classification)` rows.
    pub fn compile(rows: &[(&str, K)]) -> Self {
        let rows = rows
            .iter()
            .filter_map(|(pattern, kind)| match Regex::new(pattern) {
                Ok(re) => Some((re, *kind)),
                Err(e) => {
                    tracing::error!("Dropping invalid pattern {:?}: {}", pattern, e);
                    None
                }
            })
            .collect();
        Self { rows }
    }

    /// First row that matches `text`, with the match itself.
    pub fn first_match<'t>(&self, text: &'t str) -> Option<(K, Match<'t>)> {
        self.rows
            .iter()
            .find_map(|(re, kind)| re.find(text).map(|m| (*kind, m)))
    }

    /// Classification of the first matching row.
    pub fn classify(&self, text: &str) -> Option<K> {
        self.first_match(text).map(|(kind, _)| kind)
    }

    /// Rows in table order.
    pub fn rows(&self) -> impl Iterator<Item = (&Regex, K)> {
        self.rows.iter().map(|(re, kind)| (re, *kind))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_row_wins() {
        let table = PatternTable::compile(&[(r"(?i)time(d)? ?out", 1), (r"(?i)out", 2)]);
        assert_eq!(table.classify("Operation timed out"), Some(1));
        assert_eq!(table.classify("way out"), Some(2));
        assert_eq!(table.classify("nothing"), None);
    }

    #[test]
    fn test_invalid_rows_are_dropped() {
        let table = PatternTable::compile(&[("(unclosed", 1), ("ok", 2)]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.classify("ok"), Some(2));
    }

    #[test]
    fn test_match_position() {
        let table = PatternTable::compile(&[("needle", ())]);
        let (_, m) = table.first_match("hay needle").unwrap();
        assert_eq!(m.start(), 4);
    }
}
