//! Small utility namespace handed to endpoint modules and plugins.

use rand::Rng;
use std::time::Duration;

/// Digits + uppercase letters.
pub const CHSET_UPPER: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
/// Digits + mixed-case letters.
pub const CHSET_FULL: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
/// URL-safe base64 alphabet.
pub const CHSET_64: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_-";
/// Uppercase letters only.
pub const CHSET_UCLET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Asynchronous delay, used by the remote-invoke polling loop.
pub async fn wait(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Current unix timestamp in seconds.
pub fn unix_time() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Days since the unix epoch.
pub fn daystamp() -> i64 {
    unix_time() / (60 * 60 * 24)
}

/// Random identifier of `length` characters drawn from `charset`
/// (defaulting callers use [`CHSET_64`]).
pub fn uid(length: usize, charset: &str) -> String {
    let chars: Vec<char> = charset.chars().collect();
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect()
}
