//! Random Gmail credentials handed out by the "generated" task.

use rand::Rng;
use rand::distributions::Alphanumeric;

const LOCAL_PART_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const LOCAL_PART_LEN: usize = 8;
const PASSWORD_LEN: usize = 12;

/// Returns `(email, password)` drawn from the thread-local RNG.
pub fn generate_gmail() -> (String, String) {
    generate_gmail_with(&mut rand::thread_rng())
}

pub fn generate_gmail_with<R: Rng>(rng: &mut R) -> (String, String) {
    let local: String = (0..LOCAL_PART_LEN)
        .map(|_| LOCAL_PART_CHARS[rng.gen_range(0..LOCAL_PART_CHARS.len())] as char)
        .collect();
    let password: String = (0..PASSWORD_LEN)
        .map(|_| rng.sample(Alphanumeric) as char)
        .collect();
    (format!("{local}@gmail.com"), password)
}
