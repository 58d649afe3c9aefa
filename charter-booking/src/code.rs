use chrono::{DateTime, Utc};
use rand::Rng;

pub const CODE_PREFIX: &str = "CH";
const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const RANDOM_LEN: usize = 5;

/// Human-shareable reservation code: `CH-<base36 millis>-<random>`.
///
/// The time component keeps codes roughly sortable; the random suffix makes
/// two codes minted in the same millisecond collide with odds of 36^-5.
pub fn reservation_code<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let random: String = (0..RANDOM_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{CODE_PREFIX}-{}-{random}", base36(millis))
}

fn base36(mut n: u64) -> String {
    if n == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(ALPHABET[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}
