//! Permutations and small helpers shared across the PSI phases.

use binnacle::AesRng;
use rand::seq::SliceRandom;

/// Generate a uniformly random permutation of `[0, n)`, seeded from the OS.
pub fn generate_permutation(n: usize) -> Vec<usize> {
    let mut permutation: Vec<usize> = (0..n).collect();
    let mut prng = AesRng::new();
    permutation.shuffle(&mut prng);
    permutation
}

/// Apply (`forward = true`) or undo (`forward = false`) a permutation.
/// `unpermute(p, permute(p, v))` is the identity for any `v`.
pub fn permute<T: Clone + Default>(permutation: &[usize], forward: bool, data: &mut Vec<T>) {
    debug_assert_eq!(permutation.len(), data.len());
    let mut output = vec![T::default(); data.len()];
    if forward {
        for (i, &p) in permutation.iter().enumerate() {
            output[p] = std::mem::take(&mut data[i]);
        }
    } else {
        for (i, &p) in permutation.iter().enumerate() {
            output[i] = std::mem::take(&mut data[p]);
        }
    }
    *data = output;
}
