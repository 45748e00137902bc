//! Train/val splitting.

use rand::{seq::SliceRandom, SeedableRng};

/// Split into (train, val) with `val_ratio` of the items held out.
///
/// With a seed the items are shuffled reproducibly first; without one the input order is kept.
pub fn split_samples<T>(mut items: Vec<T>, val_ratio: f32, seed: Option<u64>) -> (Vec<T>, Vec<T>) {
    if let Some(seed) = seed {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        items.shuffle(&mut rng);
    }
    let ratio = val_ratio.clamp(0.0, 1.0);
    let mut val_len = (items.len() as f32 * ratio).round() as usize;
    if ratio > 0.0 && val_len == 0 && items.len() > 1 {
        val_len = 1;
    }
    let val = items.split_off(items.len() - val_len.min(items.len()));
    (items, val)
}
