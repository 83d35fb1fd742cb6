#![doc(hidden)]

use crate::error::{Error, Result};

/// 1/x, or 0 for x == 0 so degenerate extents and areas stay harmless.
#[inline]
pub(crate) fn inverse_or_zero(x: f32) -> f32 {
    if x == 0.0 { 0.0 } else { x.recip() }
}

/// Reinterprets a typed slice as its raw bytes.
pub(crate) fn bytes_of<T>(data: &[T]) -> &[u8] {
    let len = std::mem::size_of::<T>() * data.len();

    unsafe { std::slice::from_raw_parts(data.as_ptr().cast(), len) }
}

/// Allocates a zero-initialized scratch vector, reporting allocation failure
/// instead of aborting.
pub(crate) fn try_vec<T: Clone + Default>(len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
    v.resize(len, T::default());
    Ok(v)
}
