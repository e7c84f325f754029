use crate::Generator;
use rand::Rng;
use tinylink_core::ShortCode;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Length of generated codes unless configured otherwise.
pub const DEFAULT_CODE_LENGTH: usize = 6;

/// Produces fixed-length codes drawn uniformly from `[A-Za-z0-9]`.
///
/// Stateless apart from its length; each call uses the thread-local RNG.
#[derive(Debug, Clone, Copy)]
pub struct RandomGenerator {
    length: usize,
}

impl RandomGenerator {
    /// Creates a generator for codes of `length` characters.
    ///
    /// The length is clamped to the range a [`ShortCode`] accepts (3-32).
    pub fn new(length: usize) -> Self {
        Self {
            length: length.clamp(3, 32),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LENGTH)
    }
}

impl Generator for RandomGenerator {
    type Output = ShortCode;

    fn generate(&self) -> Self::Output {
        let mut rng = rand::rng();
        let code = (0..self.length)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect::<String>();
        ShortCode::new_unchecked(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_have_configured_length_and_alphabet() {
        let generator = RandomGenerator::new(8);
        for _ in 0..1_000 {
            let code = generator.generate();
            assert_eq!(code.as_str().len(), 8);
            assert!(code.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn default_length_is_six() {
        assert_eq!(RandomGenerator::default().generate().as_str().len(), 6);
    }

    #[test]
    fn generated_codes_pass_validation() {
        let generator = RandomGenerator::default();
        let code = generator.generate();
        assert!(ShortCode::new(code.as_str()).is_ok());
    }

    #[test]
    fn length_is_clamped_to_valid_range() {
        assert_eq!(RandomGenerator::new(1).length(), 3);
        assert_eq!(RandomGenerator::new(64).length(), 32);
    }

    #[test]
    fn codes_are_rarely_repeated() {
        let generator = RandomGenerator::default();
        let codes: HashSet<_> = (0..10_000).map(|_| generator.generate()).collect();
        // 62^6 possibilities; a handful of birthday collisions at most
        assert!(codes.len() > 9_990);
    }

    #[test]
    fn every_symbol_is_reachable() {
        let generator = RandomGenerator::new(32);
        let seen: HashSet<char> = (0..500)
            .flat_map(|_| generator.generate().as_str().chars().collect::<Vec<_>>())
            .collect();
        assert_eq!(seen.len(), ALPHABET.len());
    }

    #[test]
    fn generator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RandomGenerator>();
    }
}
