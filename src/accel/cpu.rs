use rayon::prelude::*;

use crate::accel::ops::ScoreInput;

/// Scalar CPU reference of the scoring kernel (see `shaders/score.wgsl`).
pub fn score(games: i32, winning: f32, rounds: u32) -> u32 {
    let mut h = winning.to_bits() ^ (games as u32).wrapping_mul(0x9E37_79B9);
    for r in 0..rounds {
        h ^= h >> 16;
        h = h.wrapping_mul(0x7feb_352d);
        h ^= h >> 15;
        h = h.wrapping_mul(0x846c_a68b);
        h ^= h >> 16;
        h = h.wrapping_add(r);
    }
    h
}

/// Single-threaded reference over the whole input.
pub fn score_all(input: &ScoreInput) -> Vec<u32> {
    let mut out = vec![0u32; input.len()];
    score_into(input, 0, &mut out[..input.items()]);
    out
}

/// Same result as [`score_all`], split into `chunks` pieces on the rayon pool.
pub fn score_all_parallel(input: &ScoreInput, chunks: usize) -> Vec<u32> {
    let mut out = vec![0u32; input.len()];
    let items = input.items();
    if items == 0 {
        return out;
    }

    let chunk = items.div_ceil(chunks.max(1));
    out[..items]
        .par_chunks_mut(chunk)
        .enumerate()
        .for_each(|(i, slot)| score_into(input, i * chunk, slot));
    out
}

fn score_into(input: &ScoreInput, offset: usize, out: &mut [u32]) {
    for (k, slot) in out.iter_mut().enumerate() {
        let i = offset + k;
        *slot = score(input.games[i], input.winning[i], input.rounds);
    }
}

/// Size of the rayon pool the parallel path runs on.
pub fn thread_count() -> usize {
    rayon::current_num_threads()
}
