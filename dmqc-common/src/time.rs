//! Timestamp utilities

use chrono::{DateTime, Local};
use rand::distributions::Uniform;
use rand::Rng;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Get current local timestamp
pub fn now() -> DateTime<Local> {
    Local::now()
}

/// `YYYYMMDD` stamp used in job names
pub fn date_stamp(at: &DateTime<Local>) -> String {
    at.format("%Y%m%d").to_string()
}

/// Random token of uppercase letters and digits
pub fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let dist = Uniform::from(0..TOKEN_ALPHABET.len());
    (0..len)
        .map(|_| TOKEN_ALPHABET[rng.sample(dist)] as char)
        .collect()
}
