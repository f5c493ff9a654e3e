//! Key and value traits for the learned index
//!
//! Keys must be numeric and strictly orderable: the per-node linear model
//! evaluates `a * key + b` in double precision, so every key type must
//! provide a lossless-enough conversion to `f64`. Values are plain `Copy`
//! payloads stored inline in the slot array.

use std::fmt;

/// Key type accepted by the index.
///
/// Implemented for the primitive integer and floating-point types. The
/// conversion to `f64` feeds the linear model; for 64-bit integer keys above
/// 2^53 the conversion rounds, which only degrades prediction quality, never
/// correctness (exact key comparison still decides lookups).
pub trait IndexKey: Copy + PartialOrd + fmt::Debug + Send + Sync + 'static {
    /// Convert the key to the model's evaluation domain.
    fn to_model(self) -> f64;
}

/// Value type stored by the index.
///
/// Slots hold values inline and concurrent readers copy them out under
/// optimistic validation, hence the `Copy` bound.
pub trait IndexValue: Copy + Send + Sync + 'static {}

impl<T: Copy + Send + Sync + 'static> IndexValue for T {}

macro_rules! impl_index_key {
    ($($t:ty),*) => {
        $(
            impl IndexKey for $t {
                #[inline]
                fn to_model(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_index_key!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64);
