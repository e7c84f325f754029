pub mod random;

pub use random::RandomGenerator;

use tinylink_core::ShortCode;

/// Trait for generating short codes.
///
/// Implementations are pure generators that don't interact with storage.
/// A generated code is only a candidate: the caller is responsible for
/// checking that it is free before using it.
pub trait Generator: Send + Sync + 'static {
    type Output: Into<ShortCode>;
    /// Generates a type that can be converted into a candidate short code.
    fn generate(&self) -> Self::Output;
}
