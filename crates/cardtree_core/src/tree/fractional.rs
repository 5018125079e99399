//! Fractional index generation.
//!
//! Sibling order is carried by string keys from a dense order domain: a new
//! key can always be generated strictly between two existing keys without
//! renumbering anything. Keys are base-62 digit strings compared
//! lexicographically. Generated keys carry a short random jitter suffix so
//! two replicas inserting at the same logical position usually produce
//! different keys; when they collide anyway, the `(fractional_index, id)`
//! tuple ordering breaks the tie.

use rand::Rng;

/// Base-62 digit alphabet, in lexicographic order.
const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn digit_at(key: &str, i: usize) -> usize {
    key.as_bytes()
        .get(i)
        .map(|b| DIGITS.iter().position(|d| d == b).unwrap_or(0))
        .unwrap_or(0)
}

fn push_digit(out: &mut String, value: usize) {
    out.push(DIGITS[value] as char);
}

/// The smallest-effort key strictly greater than `a` (and below the top of
/// the key space).
fn midpoint_above(a: &str) -> String {
    let base = DIGITS.len();
    let mut out = String::new();
    let mut i = 0;
    loop {
        let da = digit_at(a, i);
        if da == base - 1 {
            push_digit(&mut out, da);
            i += 1;
            continue;
        }
        // (da + base) / 2 >= da + 1, so the result sorts after `a`.
        push_digit(&mut out, (da + base) / 2);
        return out;
    }
}

/// A key strictly between `a` and `b` (`a < b` lexicographically).
///
/// The result is never a prefix of `b`, so appending jitter digits keeps it
/// below `b`. A degenerate upper bound whose remaining digits are all the
/// minimum digit (e.g. `"a0"` above `"a"`) admits no key below it; such a
/// bound is treated as open-ended and the result lands above it instead.
pub fn midpoint(a: &str, b: Option<&str>) -> String {
    let Some(b) = b else {
        return midpoint_above(a);
    };

    let base = DIGITS.len();
    let mut out = String::new();
    let mut i = 0;
    loop {
        // Nothing but minimum digits left in the bound: no key with the
        // current prefix fits below it, so stop walking and go above `a`.
        if b.as_bytes()[i.min(b.len())..].iter().all(|&d| d == DIGITS[0]) {
            let rest = if i <= a.len() { &a[i..] } else { "" };
            out.push_str(&midpoint_above(rest));
            return out;
        }
        let da = digit_at(a, i);
        let db = digit_at(b, i);
        if da == db {
            push_digit(&mut out, da);
            i += 1;
            continue;
        }
        if db - da > 1 {
            push_digit(&mut out, (da + db) / 2);
            return out;
        }
        // Consecutive digits: keep `a`'s digit and go strictly above the
        // rest of `a`, which stays below `b` at position `i`.
        push_digit(&mut out, da);
        let rest = if i + 1 <= a.len() { &a[i + 1..] } else { "" };
        out.push_str(&midpoint_above(rest));
        return out;
    }
}

/// Generator for jittered fractional index keys.
#[derive(Debug, Clone, Copy)]
pub struct IndexGen {
    jitter: usize,
}

impl IndexGen {
    /// Create a generator appending `jitter` random digits to each key.
    pub fn new(jitter: usize) -> Self {
        Self { jitter }
    }

    /// Generate a key strictly between `lo` and `hi`.
    ///
    /// `None` bounds mean the start/end of the key space. Inconsistent
    /// bounds (`lo >= hi`) fall back to a key after `lo`.
    pub fn key_between(&self, lo: Option<&str>, hi: Option<&str>) -> String {
        let lo = lo.unwrap_or("");
        let hi = match hi {
            Some(hi) if hi > lo => Some(hi),
            Some(_) => None,
            None => None,
        };

        let mut key = midpoint(lo, hi);

        let mut rng = rand::thread_rng();
        for _ in 0..self.jitter {
            push_digit(&mut key, rng.gen_range(0..DIGITS.len()));
        }
        // Keys never end in the minimum digit, so every key still has room
        // below it.
        if key.ends_with('0') {
            key.pop();
            push_digit(&mut key, rng.gen_range(1..DIGITS.len()));
        }
        key
    }
}

impl Default for IndexGen {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midpoint_between_simple() {
        let m = midpoint("1", Some("3"));
        assert!("1" < m.as_str());
        assert!(m.as_str() < "3");
    }

    #[test]
    fn test_midpoint_consecutive_digits() {
        let m = midpoint("1", Some("2"));
        assert!("1" < m.as_str());
        assert!(m.as_str() < "2");
    }

    #[test]
    fn test_midpoint_unbounded_above() {
        let m = midpoint("z", None);
        assert!("z" < m.as_str());
    }

    #[test]
    fn test_midpoint_from_empty() {
        let m = midpoint("", None);
        assert!(!m.is_empty());
        let lower = midpoint("", Some(m.as_str()));
        assert!(lower.as_str() < m.as_str());
    }

    #[test]
    fn test_midpoint_never_prefix_of_upper() {
        let cases = [("1", "15"), ("a", "a1"), ("12", "13"), ("", "01")];
        for (lo, hi) in cases {
            let m = midpoint(lo, Some(hi));
            assert!(lo < m.as_str(), "{} < {}", lo, m);
            assert!(m.as_str() < hi, "{} < {}", m, hi);
            assert!(!hi.starts_with(&m) || m == hi, "{} prefix of {}", m, hi);
        }
    }

    #[test]
    fn test_key_between_respects_bounds_with_jitter() {
        let generator = IndexGen::new(3);
        for _ in 0..200 {
            let key = generator.key_between(Some("aa"), Some("ab"));
            assert!("aa" < key.as_str());
            assert!(key.as_str() < "ab");
            assert!(!key.ends_with('0'));
        }
    }

    #[test]
    fn test_key_between_open_bounds() {
        let generator = IndexGen::new(2);
        let first = generator.key_between(None, None);
        let before = generator.key_between(None, Some(first.as_str()));
        let after = generator.key_between(Some(first.as_str()), None);
        assert!(before.as_str() < first.as_str());
        assert!(first.as_str() < after.as_str());
    }

    #[test]
    fn test_key_between_dense_insertions_stay_ordered() {
        let generator = IndexGen::new(2);
        let mut lo = generator.key_between(None, None);
        let hi = generator.key_between(Some(lo.as_str()), None);
        // Repeatedly split the same interval; keys must stay inside it.
        for _ in 0..50 {
            let mid = generator.key_between(Some(lo.as_str()), Some(hi.as_str()));
            assert!(lo.as_str() < mid.as_str());
            assert!(mid.as_str() < hi.as_str());
            lo = mid;
        }
    }

    #[test]
    fn test_zero_suffixed_upper_bound_terminates() {
        // "a" < "a0" admits no key in between; the bound is degenerate and
        // must fall back to a key above "a" instead of looping.
        for (lo, hi) in [("a", "a0"), ("a", "a00"), ("", "0"), ("b3", "b30")] {
            let m = midpoint(lo, Some(hi));
            assert!(lo < m.as_str(), "{} < {}", lo, m);
        }

        let generator = IndexGen::new(2);
        let key = generator.key_between(Some("a"), Some("a0"));
        assert!("a" < key.as_str());
        assert!(!key.ends_with('0'));
    }

    #[test]
    fn test_key_between_inverted_bounds_falls_back() {
        let generator = IndexGen::new(2);
        let key = generator.key_between(Some("b"), Some("a"));
        assert!("b" < key.as_str());
    }
}
