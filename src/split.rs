use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

// Shuffles `indices` and holds out `ceil(fraction * n)` of them
// Returns (kept, held_out)
pub fn holdout<R: Rng + ?Sized>(
    mut indices: Vec<usize>,
    fraction: f64,
    rng: &mut R,
) -> (Vec<usize>, Vec<usize>) {
    let n = indices.len();
    let n_held = ((fraction * n as f64).ceil() as usize).min(n);
    indices.shuffle(rng);
    let held = indices.split_off(n - n_held);
    (indices, held)
}

/// Two sequential random splits: `test_fraction` of the data is held out, then
/// `holdout_test_fraction` of the held-out part goes to test and the rest to validation.
///
/// With the defaults (0.2, 0.5) this yields 80 % train, 10 % validation, 10 % test.
pub fn train_val_test<R: Rng + ?Sized>(
    n: usize,
    test_fraction: f64,
    holdout_test_fraction: f64,
    rng: &mut R,
) -> Partition {
    let (train, rest) = holdout((0..n).collect(), test_fraction, rng);
    let (validation, test) = holdout(rest, holdout_test_fraction, rng);
    Partition {
        train,
        validation,
        test,
    }
}
