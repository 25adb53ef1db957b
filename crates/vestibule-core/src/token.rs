use rand::RngCore;

/// Invite token length in bytes before hex encoding (128 bits of entropy).
pub const TOKEN_BYTES: usize = 16;

/// Invite token length on the wire (hex).
pub const TOKEN_LEN: usize = TOKEN_BYTES * 2;

/// Generate an unpredictable invite token as lowercase hex.
pub fn generate_invite_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Cheap shape check so obviously malformed tokens never reach a lookup.
pub fn is_valid_token_format(token: &str) -> bool {
    token.len() == TOKEN_LEN && token.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_tokens_are_valid() {
        for _ in 0..100 {
            let token = generate_invite_token();
            assert!(is_valid_token_format(&token), "invalid token: {token}");
        }
    }

    #[test]
    fn tokens_do_not_collide() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate_invite_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(!is_valid_token_format(""));
        assert!(!is_valid_token_format("short"));
        assert!(!is_valid_token_format(&"z".repeat(TOKEN_LEN)));
        assert!(!is_valid_token_format(&"a".repeat(TOKEN_LEN + 2)));
    }

    #[test]
    fn accepts_uppercase_hex() {
        assert!(is_valid_token_format(&"A".repeat(TOKEN_LEN)));
    }
}
