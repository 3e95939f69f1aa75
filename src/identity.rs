//! Client identity

use uuid::Uuid;

use crate::codec::voice::SENDER_ID_LENGTH;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generate a fresh 22-character client id
pub fn new_client_id() -> String {
    encode_id(Uuid::new_v4())
}

/// Encode a uuid as 22 characters, 6 bits each, most significant first
pub fn encode_id(uuid: Uuid) -> String {
    let value = uuid.as_u128();
    (0..SENDER_ID_LENGTH)
        .map(|i| {
            // first digit only carries the top 2 bits
            let shift = (SENDER_ID_LENGTH - 1 - i) * 6;
            let digit = (value >> shift) & 0x3f;
            ALPHABET[digit as usize] as char
        })
        .collect()
}
