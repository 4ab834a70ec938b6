//! Message and parameter key types and the hashes that produce them.
//!
//! Keys are 32-bit and computed at runtime on first emit (the registration
//! token caches the result per call site), but the hash functions are all
//! `const fn` so declaration macros can also fold them at compile time.

/// Identifies a message format on the wire. Values 0..=2 are reserved for
/// region framing; everything else is a hash of the format string, category
/// and parameter type identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey(pub u32);

/// Identifies a parameter type. `0` acts as a wildcard in matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterKey(pub u32);

/// Starts an anonymous region.
pub const ANON_REGION_START: MessageKey = MessageKey(0);
/// Starts a named region; followed by the key of the region's format.
pub const NAMED_REGION_START: MessageKey = MessageKey(1);
/// Ends the innermost open region. Carries no payload.
pub const REGION_END: MessageKey = MessageKey(2);

impl MessageKey {
    /// True for the three reserved region-framing keys.
    #[inline]
    pub const fn is_reserved(self) -> bool {
        self.0 <= REGION_END.0
    }
}

impl ParameterKey {
    /// Matches any parameter type in a filter position.
    pub const WILDCARD: ParameterKey = ParameterKey(0);
}

/// 32-bit integer hash (Thomas Wang, 1997).
#[inline]
pub const fn hash_u32(s: u32) -> u32 {
    let a = s ^ 61 ^ (s >> 16);
    let b = a.wrapping_mul(9);
    let c = b ^ (b >> 4);
    let d = c.wrapping_mul(0x27d4_eb2d);
    d ^ (d >> 15)
}

/// Hashes a string by folding `hash_u32` over big-endian 4-byte groups.
/// The trailing 1..=3 bytes, if any, are packed high and folded last.
pub const fn hash_str(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut value = u32::MAX;

    let mut i = 0;
    while i + 4 <= bytes.len() {
        let word = (bytes[i] as u32) << 24
            | (bytes[i + 1] as u32) << 16
            | (bytes[i + 2] as u32) << 8
            | bytes[i + 3] as u32;
        value ^= hash_u32(word);
        i += 4;
    }

    let remainder = bytes.len() - i;
    if remainder > 0 {
        let mut word = (bytes[i] as u32) << 24;
        if remainder > 1 {
            word |= (bytes[i + 1] as u32) << 16;
        }
        if remainder > 2 {
            word |= (bytes[i + 2] as u32) << 8;
        }
        value ^= hash_u32(word);
    }

    value
}

/// Hash of the format string alone. Used by message filters to match
/// descriptors independently of category and parameter types.
#[inline]
pub const fn hash_message(message: &str) -> MessageKey {
    MessageKey(hash_str(message))
}

/// Mixes the message hash, category and parameter keys into the unique
/// on-wire message key.
pub fn mix_message_key(message: &str, category: u32, parameters: &[ParameterKey]) -> MessageKey {
    let mut value = hash_str(message) ^ hash_u32(category);
    for p in parameters {
        value ^= p.0;
    }
    MessageKey(value)
}

/// Number of dynamic parameters in a format string. Each `{}` occurrence is
/// one parameter.
pub const fn count_parameters(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut count = 0;
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i - 1] == b'{' && bytes[i] == b'}' {
            count += 1;
        }
        i += 1;
    }
    count
}

/// Byte offsets of each `{}` occurrence in a format string.
pub fn parameter_indices(s: &str) -> Vec<usize> {
    let bytes = s.as_bytes();
    let mut indices = Vec::new();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i - 1] == b'{' && bytes[i] == b'}' {
            indices.push(i - 1);
        }
        i += 1;
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_keys() {
        assert!(ANON_REGION_START.is_reserved());
        assert!(NAMED_REGION_START.is_reserved());
        assert!(REGION_END.is_reserved());
        assert!(!MessageKey(3).is_reserved());
    }

    #[test]
    fn test_count_parameters() {
        assert_eq!(count_parameters(""), 0);
        assert_eq!(count_parameters("no params"), 0);
        assert_eq!(count_parameters("one {}"), 1);
        assert_eq!(count_parameters("{} and {} and {}"), 3);
    }

    #[test]
    fn test_parameter_indices() {
        assert_eq!(parameter_indices("a {} b {}"), vec![2, 7]);
        assert!(parameter_indices("none").is_empty());
    }

    #[test]
    fn test_hash_stability() {
        // Distinct inputs should produce distinct hashes, and equal inputs
        // equal hashes, across calls.
        assert_eq!(hash_str("value = {}"), hash_str("value = {}"));
        assert_ne!(hash_str("value = {}"), hash_str("other = {}"));
        assert_ne!(hash_u32(1), hash_u32(2));
    }

    #[test]
    fn test_key_mixing_depends_on_all_inputs() {
        let base = mix_message_key("m {}", 1, &[ParameterKey(7)]);
        assert_ne!(base, mix_message_key("n {}", 1, &[ParameterKey(7)]));
        assert_ne!(base, mix_message_key("m {}", 2, &[ParameterKey(7)]));
        assert_ne!(base, mix_message_key("m {}", 1, &[ParameterKey(8)]));
    }
}
