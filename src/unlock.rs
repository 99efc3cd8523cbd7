//! The unlock handshake: challenge/response hash plus the command
//! sequencing that issues it over the bus (SPEC_FULL.md §4.5).

/// Rotates `value` right by `shift` bits; only the low 5 bits of `shift`
/// matter (a rotation is defined mod 32).
pub fn rotate_right_32(value: u32, shift: u32) -> u32 {
    value.rotate_right(shift & 0x1f)
}

/// Computes the 32-bit challenge response from the card's 8-byte challenge
/// (SPEC_FULL.md §4.5, challenge-hash algorithm).
pub fn challenge_response(challenge: &[u8; 8]) -> u32 {
    let sum: u32 = challenge.iter().map(|&b| b as u32).sum();
    let mut running = sum.wrapping_add(0x170a_7489);
    let mut hash: u32 = 0x05ef_e0aa;
    let mut key0: u32 = 0xdaf4_b157;
    let mut key1: u32 = 0x6bbe_c3b6;

    let nibbles: Vec<u8> = challenge
        .iter()
        .flat_map(|&b| [b >> 4, b & 0xf])
        .collect();
    let mut n0 = nibbles[0];
    let mut n1 = nibbles[1];
    let mut next_pair = 2usize;

    for swap_offset in (sum.wrapping_add(9))..(sum.wrapping_add(16)) {
        let n2 = nibbles[next_pair];
        let n3 = nibbles[next_pair + 1];
        next_pair += 2;

        let t = (if n3 & 0x8 != 0 { 0xff00u32 } else { 0 })
            | (((n3 as u32) << 4) | n1 as u32);
        let t = t ^ ((n0 as u32) << 8) ^ ((n2 as u32) << 12);
        running = running.wrapping_add(t);
        hash = hash.wrapping_add(rotate_right_32(
            (key0 ^ key1).wrapping_add(running),
            swap_offset,
        ));
        key0 = ((!running) & hash) | (key1 >> 16) | (running & key1 & 0xffff_0000);
        key1 = running ^ hash ^ key0;
        n0 = n2;
        n1 = n3;
    }

    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_right_wraps_shift_mod_32() {
        assert_eq!(rotate_right_32(1, 0), 1);
        assert_eq!(rotate_right_32(1, 32), 1);
        assert_eq!(rotate_right_32(0x8000_0000, 1), 0x4000_0000);
        assert_eq!(rotate_right_32(1, 1), 0x8000_0000);
    }

    #[test]
    fn challenge_hash_is_deterministic() {
        let challenge = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let sum: u32 = challenge.iter().map(|&b| b as u32).sum();
        assert_eq!(sum, 36);
        // The algorithm is a pure function of the challenge bytes; replaying
        // it twice must produce the same response.
        let a = challenge_response(&challenge);
        let b = challenge_response(&challenge);
        assert_eq!(a, b);
    }

    #[test]
    fn challenge_hash_changes_with_challenge() {
        let a = challenge_response(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        let b = challenge_response(&[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_ne!(a, b);
    }
}
