use rand::Rng;

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Alphabet for room codes. Excludes 0/O/1/I/L to keep codes readable
/// when spoken or retyped from a screenshot.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Generate a random room code. Uniqueness against live rooms is the
/// caller's responsibility.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Check whether a string has the shape of a room code. Accepts lowercase
/// input; callers normalize with [`normalize_room_code`] before lookups.
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN
        && code
            .bytes()
            .all(|b| CODE_ALPHABET.contains(&b.to_ascii_uppercase()))
}

/// Uppercase a room code for storage and lookup.
pub fn normalize_room_code(code: &str) -> String {
    code.to_ascii_uppercase()
}
