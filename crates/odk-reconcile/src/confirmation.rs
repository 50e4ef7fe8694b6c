//! Confirmation numbers: `<PREFIX>-<YYMMDD>-<5 chars>`.
//!
//! The suffix alphabet drops `0 O 1 I` so numbers survive being read aloud.
//! Uniqueness is enforced by the `orders.confirmation_number` UNIQUE
//! constraint; the allocator in `odk-db` regenerates on conflict at most
//! [`MAX_ALLOCATION_ATTEMPTS`] times.

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;

pub const MAX_ALLOCATION_ATTEMPTS: usize = 5;

const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SUFFIX_LEN: usize = 5;

pub fn generate_confirmation_number<R: Rng + ?Sized>(
    prefix: &str,
    date: NaiveDate,
    rng: &mut R,
) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}-{}", prefix, date.format("%y%m%d"), suffix)
}

pub fn new_confirmation_number(prefix: &str, now: DateTime<Utc>) -> String {
    generate_confirmation_number(prefix, now.date_naive(), &mut rand::thread_rng())
}

pub fn is_well_formed_confirmation_number(s: &str, prefix: &str) -> bool {
    let Some(rest) = s.strip_prefix(prefix).and_then(|r| r.strip_prefix('-')) else {
        return false;
    };
    let Some((date, suffix)) = rest.split_once('-') else {
        return false;
    };
    date.len() == 6
        && date.bytes().all(|b| b.is_ascii_digit())
        && NaiveDate::parse_from_str(&format!("20{date}"), "%Y%m%d").is_ok()
        && suffix.len() == SUFFIX_LEN
        && suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b))
}
