//! FNV-1a, hand-rolled per spec.md's explicit requirement for Vidhi's
//! deterministic id (`id = FNV-1a(category + normalized template)`) — not a
//! crate dependency, since the hash itself is part of the id's contract.

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

pub fn fnv1a_hex(input: &str) -> String {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic() {
        assert_eq!(fnv1a_hex("read|edit"), fnv1a_hex("read|edit"));
    }

    #[test]
    fn differs_on_different_input() {
        assert_ne!(fnv1a_hex("read|edit"), fnv1a_hex("edit|read"));
    }

    #[test]
    fn empty_string_is_offset_basis() {
        assert_eq!(fnv1a_hex(""), format!("{:016x}", FNV_OFFSET_BASIS));
    }
}
