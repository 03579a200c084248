//! Fractional ordering keys.
//!
//! A key is a base-62 fraction in `[0, 1)` written with the digits
//! `0-9A-Za-z`. Because the digit characters are in ascending ASCII order,
//! lexicographic string order equals numeric order, so rows can be sorted by
//! key without decoding.
//!
//! Keys produced here never end in the lowest digit `0`. That keeps the space
//! dense: there is always room below any key, and between any two distinct
//! keys, by extending one more digit.

const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: usize = DIGITS.len();

/// Key length past which a sibling list should be respaced.
pub const DEFAULT_REBALANCE_THRESHOLD: usize = 50;

/// Generator for lexicographically sortable position keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct FractionalIndex;

impl FractionalIndex {
    /// The midpoint key, returned by `between(None, None)`.
    pub const MIDPOINT: &'static str = "V";

    /// Returns a key strictly between `before` and `after`.
    ///
    /// `None` stands for the open end of the range. If the bounds are not in
    /// ascending order the result is placed after `before` and `after` is
    /// ignored.
    #[must_use]
    pub fn between(before: Option<&str>, after: Option<&str>) -> String {
        let lower = before.map(decode).unwrap_or_default();
        let upper = after.map(decode).filter(|u| !u.is_empty());

        let upper = match upper {
            Some(u) if compare_digits(&lower, &u).is_lt() => Some(u),
            _ => None,
        };

        encode(&midpoint(&lower, upper.as_deref()))
    }

    /// Returns `count` evenly spaced ascending keys.
    ///
    /// The key depth leaves at least one full digit of headroom between
    /// neighbours, so many inserts can land between any two of them before a
    /// key grows.
    #[must_use]
    pub fn initial(count: usize) -> Vec<String> {
        if count == 0 {
            return Vec::new();
        }

        let slots = (count as u128 + 1) * BASE as u128;
        let mut depth = 1u32;
        let mut capacity = BASE as u128;
        while capacity < slots {
            depth += 1;
            capacity = capacity.saturating_mul(BASE as u128);
        }

        (1..=count as u128)
            .map(|i| {
                let slot = i * capacity / (count as u128 + 1);
                let mut digits = vec![0usize; depth as usize];
                let mut rest = slot;
                for d in digits.iter_mut().rev() {
                    *d = (rest % BASE as u128) as usize;
                    rest /= BASE as u128;
                }
                while digits.last() == Some(&0) {
                    digits.pop();
                }
                encode(&digits)
            })
            .collect()
    }

    /// Whether `key` has grown past `threshold` characters.
    #[must_use]
    pub fn needs_rebalancing(key: &str, threshold: usize) -> bool {
        key.len() > threshold
    }

    /// Regenerates `count` evenly spaced keys for a sibling list.
    #[must_use]
    pub fn rebalance(count: usize) -> Vec<String> {
        Self::initial(count)
    }

    /// Whether `key` only uses alphabet characters and does not end in `0`.
    #[must_use]
    pub fn is_valid(key: &str) -> bool {
        !key.is_empty() && !key.ends_with('0') && key.bytes().all(|b| digit_value(b).is_some())
    }
}

fn digit_value(b: u8) -> Option<usize> {
    match b {
        b'0'..=b'9' => Some((b - b'0') as usize),
        b'A'..=b'Z' => Some((b - b'A') as usize + 10),
        b'a'..=b'z' => Some((b - b'a') as usize + 36),
        _ => None,
    }
}

fn decode(key: &str) -> Vec<usize> {
    let mut digits: Vec<usize> = key.bytes().filter_map(digit_value).collect();
    while digits.last() == Some(&0) {
        digits.pop();
    }
    digits
}

fn encode(digits: &[usize]) -> String {
    digits.iter().map(|&d| DIGITS[d] as char).collect()
}

/// Numeric comparison of two digit strings with implicit trailing zeros.
fn compare_digits(a: &[usize], b: &[usize]) -> std::cmp::Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| o.is_ne())
        .unwrap_or(std::cmp::Ordering::Equal)
}

/// Digits strictly between `lower` and `upper` (`None` = 1.0).
///
/// Requires `lower < upper` numerically and no trailing zeros in either.
fn midpoint(lower: &[usize], upper: Option<&[usize]>) -> Vec<usize> {
    if let Some(upper) = upper {
        let shared = upper
            .iter()
            .enumerate()
            .take_while(|(i, d)| lower.get(*i).copied().unwrap_or(0) == **d)
            .count();
        if shared > 0 {
            let mut out = upper[..shared].to_vec();
            let rest_upper = &upper[shared..];
            let rest_lower = lower.get(shared..).unwrap_or(&[]);
            out.extend(midpoint(
                rest_lower,
                (!rest_upper.is_empty()).then_some(rest_upper),
            ));
            return out;
        }
    }

    let lo = lower.first().copied().unwrap_or(0);
    let hi = upper.and_then(|u| u.first().copied()).unwrap_or(BASE);

    if hi > lo + 1 {
        return vec![(lo + hi) / 2];
    }

    // Adjacent leading digits.
    if let Some(upper) = upper {
        if upper.len() > 1 {
            return vec![upper[0]];
        }
    }
    let mut out = vec![lo];
    out.extend(midpoint(lower.get(1..).unwrap_or(&[]), None));
    out
}
