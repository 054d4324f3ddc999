//! Chunked traversal shared by the kernels. The same chunk boundaries are
//! used whether chunks run sequentially or on the rayon pool, so results do
//! not depend on the device.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Map every chunk of `values` and fold the partial results with `reduce`.
pub(crate) fn map_reduce<T, R, M, F, I>(values: &[T], chunk_size: usize, parallel: bool, identity: I, map: M, reduce: F) -> R
where
    T: Sync,
    R: Send,
    I: Fn() -> R + Sync + Send,
    M: Fn(&[T]) -> R + Sync + Send,
    F: Fn(R, R) -> R + Sync + Send,
{
    if parallel {
        par_map_reduce(values, chunk_size, identity, map, reduce)
    } else {
        values.chunks(chunk_size).map(map).fold(identity(), reduce)
    }
}

/// Call `f(chunk_index, input_chunk, output_chunk)` over aligned chunks.
pub(crate) fn zip_for_each<A, B, F>(input: &[A], output: &mut [B], chunk_size: usize, parallel: bool, f: F)
where
    A: Sync,
    B: Send,
    F: Fn(usize, &[A], &mut [B]) + Sync + Send,
{
    if parallel {
        par_zip_for_each(input, output, chunk_size, f)
    } else {
        input
            .chunks(chunk_size)
            .zip(output.chunks_mut(chunk_size))
            .enumerate()
            .for_each(|(index, (src, dst))| f(index, src, dst));
    }
}

#[cfg(feature = "parallel")]
fn par_map_reduce<T, R, M, F, I>(values: &[T], chunk_size: usize, identity: I, map: M, reduce: F) -> R
where
    T: Sync,
    R: Send,
    I: Fn() -> R + Sync + Send,
    M: Fn(&[T]) -> R + Sync + Send,
    F: Fn(R, R) -> R + Sync + Send,
{
    values.par_chunks(chunk_size).map(map).reduce(identity, reduce)
}

#[cfg(not(feature = "parallel"))]
fn par_map_reduce<T, R, M, F, I>(values: &[T], chunk_size: usize, identity: I, map: M, reduce: F) -> R
where
    T: Sync,
    R: Send,
    I: Fn() -> R + Sync + Send,
    M: Fn(&[T]) -> R + Sync + Send,
    F: Fn(R, R) -> R + Sync + Send,
{
    values.chunks(chunk_size).map(map).fold(identity(), reduce)
}

#[cfg(feature = "parallel")]
fn par_zip_for_each<A, B, F>(input: &[A], output: &mut [B], chunk_size: usize, f: F)
where
    A: Sync,
    B: Send,
    F: Fn(usize, &[A], &mut [B]) + Sync + Send,
{
    input
        .par_chunks(chunk_size)
        .zip(output.par_chunks_mut(chunk_size))
        .enumerate()
        .for_each(|(index, (src, dst))| f(index, src, dst));
}

#[cfg(not(feature = "parallel"))]
fn par_zip_for_each<A, B, F>(input: &[A], output: &mut [B], chunk_size: usize, f: F)
where
    A: Sync,
    B: Send,
    F: Fn(usize, &[A], &mut [B]) + Sync + Send,
{
    input
        .chunks(chunk_size)
        .zip(output.chunks_mut(chunk_size))
        .enumerate()
        .for_each(|(index, (src, dst))| f(index, src, dst));
}
