//! Human-readable reference ids (`IQ-7K2M9P`, `BPO-X4QW8D`, ...).

use uuid::Uuid;

// No 0/O or 1/I, so references survive being read over the phone.
const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

fn generate(prefix: &str) -> String {
    // Bytes 10..16 of a v7 uuid are random.
    let bytes = Uuid::now_v7().into_bytes();
    let code: String = bytes[16 - CODE_LEN..]
        .iter()
        .map(|b| ALPHABET[usize::from(*b) % ALPHABET.len()] as char)
        .collect();
    format!("{prefix}-{code}")
}

pub fn inquiry() -> String {
    generate("IQ")
}

pub fn purchase_order() -> String {
    generate("PO")
}

pub fn bulk_purchase_order() -> String {
    generate("BPO")
}

pub fn transaction() -> String {
    generate("PT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn references_have_a_prefix_and_six_unambiguous_characters() {
        let reference = bulk_purchase_order();
        let (prefix, code) = reference.split_once('-').unwrap();
        assert_eq!(prefix, "BPO");
        assert_eq!(code.len(), CODE_LEN);
        assert!(code.bytes().all(|c| ALPHABET.contains(&c)));
    }

    #[test]
    fn consecutive_references_differ() {
        let seen: HashSet<String> = (0..200).map(|_| transaction()).collect();
        assert!(seen.len() > 190);
    }
}
