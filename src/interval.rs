// src/interval.rs
//
// Inclusive integer intervals and interval sets, used to select frame
// indices (extract) and to address output frame positions (combine
// duration overrides).
//
// Grammar: ranges joined by '+'. Each range is "a-b" (inclusive) or a
// single index "a". Example: "0-3+5+9-11".

/// Inclusive range of frame indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    pub lo: usize,
    pub hi: usize,
}

impl Interval {
    pub fn new(lo: usize, hi: usize) -> Self {
        Self { lo, hi }
    }

    /// Parse "a-b" or "a". Reversed bounds are rejected.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        if let Some((lo, hi)) = token.split_once('-') {
            let lo = lo.trim().parse().ok()?;
            let hi = hi.trim().parse().ok()?;
            if lo > hi {
                return None;
            }
            Some(Self { lo, hi })
        } else {
            let idx = token.parse().ok()?;
            Some(Self { lo: idx, hi: idx })
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.lo && index <= self.hi
    }
}

/// Ordered list of intervals. Intervals may overlap; order is the order
/// they were written, which matters to callers with last-match-wins
/// policies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
}

impl IntervalSet {
    /// Parse a '+'-joined list of ranges. Malformed ranges are dropped
    /// individually; a fully-garbage token yields an empty set.
    pub fn from_token(token: &str) -> Self {
        let intervals = token
            .split('+')
            .filter_map(Interval::from_token)
            .collect();
        Self { intervals }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.intervals.iter().any(|iv| iv.contains(index))
    }

    /// Distinct indices in ascending order.
    pub fn indices(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .intervals
            .iter()
            .flat_map(|iv| iv.lo..=iv.hi)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Distinct indices below `limit`, ascending. Intervals are clamped
    /// before expansion, so an arbitrarily large upper bound costs
    /// nothing beyond the indices that actually exist.
    pub fn indices_below(&self, limit: usize) -> Vec<usize> {
        if limit == 0 {
            return Vec::new();
        }
        let mut out: Vec<usize> = self
            .intervals
            .iter()
            .filter(|iv| iv.lo < limit)
            .flat_map(|iv| iv.lo..=iv.hi.min(limit - 1))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_and_range_tokens() {
        assert_eq!(Interval::from_token("5"), Some(Interval::new(5, 5)));
        assert_eq!(Interval::from_token("2-4"), Some(Interval::new(2, 4)));
        assert_eq!(Interval::from_token("4-2"), None);
        assert_eq!(Interval::from_token("x"), None);
    }

    #[test]
    fn set_parses_and_dedups() {
        let set = IntervalSet::from_token("0-2+5+1-3");
        assert!(set.contains(0));
        assert!(set.contains(3));
        assert!(set.contains(5));
        assert!(!set.contains(4));
        assert_eq!(set.indices(), vec![0, 1, 2, 3, 5]);
    }

    #[test]
    fn garbage_yields_empty_set() {
        let set = IntervalSet::from_token("abc+-");
        assert!(set.is_empty());
    }

    #[test]
    fn partially_malformed_keeps_good_ranges() {
        let set = IntervalSet::from_token("0-1+oops+4");
        assert_eq!(set.indices(), vec![0, 1, 4]);
    }

    #[test]
    fn indices_below_clamps_before_expanding() {
        let set = IntervalSet::from_token("1-4000000000");
        assert_eq!(set.indices_below(4), vec![1, 2, 3]);
        let set = IntervalSet::from_token("0-2+9");
        assert_eq!(set.indices_below(5), vec![0, 1, 2]);
        assert!(set.indices_below(0).is_empty());
    }
}
