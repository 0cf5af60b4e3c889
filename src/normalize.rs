use ndarray::{ArrayBase, DataMut, Dimension};
use num_traits::Float;

pub trait ZScore<A> {
    // Scalar z-score over every element of the array, population standard deviation
    // Returns the (mean, std) that were removed; a constant array is left untouched
    fn zscore_inplace(&mut self) -> (A, A);
}

impl<A, S, D> ZScore<A> for ArrayBase<S, D>
where
    A: Float,
    S: DataMut<Elem = A>,
    D: Dimension,
{
    fn zscore_inplace(&mut self) -> (A, A) {
        if self.is_empty() {
            return (A::zero(), A::zero());
        }
        let n = A::from(self.len()).unwrap_or_else(A::one);
        let mean = self.iter().fold(A::zero(), |acc, &v| acc + v) / n;
        let var = self.iter().fold(A::zero(), |acc, &v| {
            let d = v - mean;
            acc + d * d
        }) / n;
        let std = var.sqrt();

        if std > A::zero() {
            self.mapv_inplace(|v| (v - mean) / std);
        }
        (mean, std)
    }
}
