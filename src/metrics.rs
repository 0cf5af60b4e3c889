//! Test-set scores over indicator targets, `[N, 3]` with values in {0, 1}.
use ndarray::{Array2, ArrayView2, Zip};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub fscore: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    pub thresholds: Vec<f64>,
}

impl RocCurve {
    /// Trapezoidal area under the curve.
    pub fn auc(&self) -> f64 {
        auc(&self.fpr, &self.tpr)
    }
}

pub fn binarize(probabilities: &Array2<f32>, threshold: f32) -> Array2<f32> {
    probabilities.mapv(|p| if p > threshold { 1.0 } else { 0.0 })
}

fn check_shapes(y_true: &ArrayView2<f32>, y_pred: &ArrayView2<f32>) -> Result<()> {
    if y_true.dim() != y_pred.dim() {
        return Err(Error::Shape(format!(
            "targets {:?} and predictions {:?}",
            y_true.dim(),
            y_pred.dim()
        )));
    }
    Ok(())
}

/// Fraction of rows whose prediction matches the target in every column.
pub fn subset_accuracy(y_true: ArrayView2<f32>, y_pred: ArrayView2<f32>) -> Result<f64> {
    check_shapes(&y_true, &y_pred)?;
    if y_true.nrows() == 0 {
        return Err(Error::EmptyDataset);
    }
    let exact = y_true
        .rows()
        .into_iter()
        .zip(y_pred.rows())
        .filter(|(t, p)| t == p)
        .count();
    Ok(exact as f64 / y_true.nrows() as f64)
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Unweighted mean over columns of precision, recall and F1; empty denominators score 0.
pub fn macro_precision_recall_fscore(
    y_true: ArrayView2<f32>,
    y_pred: ArrayView2<f32>,
) -> Result<(f64, f64, f64)> {
    check_shapes(&y_true, &y_pred)?;
    let num_labels = y_true.ncols();
    if num_labels == 0 {
        return Err(Error::Shape("no label columns".to_string()));
    }

    let (mut precision, mut recall, mut fscore) = (0.0, 0.0, 0.0);
    for (t, p) in y_true.columns().into_iter().zip(y_pred.columns()) {
        let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
        Zip::from(&t).and(&p).for_each(|&t, &p| match (t > 0.5, p > 0.5) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        });
        let pr = ratio(tp, tp + fp);
        let rc = ratio(tp, tp + fn_);
        precision += pr;
        recall += rc;
        fscore += if pr + rc > 0.0 {
            2.0 * pr * rc / (pr + rc)
        } else {
            0.0
        };
    }

    let n = num_labels as f64;
    Ok((precision / n, recall / n, fscore / n))
}

pub fn score(y_true: &Array2<f32>, y_pred: &Array2<f32>) -> Result<Scores> {
    let accuracy = subset_accuracy(y_true.view(), y_pred.view())?;
    let (precision, recall, fscore) = macro_precision_recall_fscore(y_true.view(), y_pred.view())?;
    Ok(Scores {
        accuracy,
        precision,
        recall,
        fscore,
    })
}

/// Binary ROC curve of `scores` against `labels`.
///
/// One point per distinct score, highest first, preceded by `(0, 0)` at an infinite
/// threshold. Interior points lying on a straight segment between their neighbours are
/// dropped; the area is unchanged. Rates are NaN when the labels hold no positive or
/// no negative.
pub fn roc_curve(labels: &[f32], scores: &[f32]) -> Result<RocCurve> {
    if labels.len() != scores.len() {
        return Err(Error::Shape(format!(
            "{} labels and {} scores",
            labels.len(),
            scores.len()
        )));
    }

    let mut order = (0..scores.len()).collect::<Vec<usize>>();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut curve = RocCurve {
        fpr: vec![0.0],
        tpr: vec![0.0],
        thresholds: vec![f64::INFINITY],
    };
    let (mut tps, mut fps) = (0usize, 0usize);
    let mut counts = Vec::new();
    for (rank, &i) in order.iter().enumerate() {
        if labels[i] > 0.5 {
            tps += 1;
        } else {
            fps += 1;
        }
        let last_of_group = order
            .get(rank + 1)
            .map_or(true, |&next| scores[next] != scores[i]);
        if last_of_group {
            counts.push((tps, fps, scores[i] as f64));
        }
    }

    // Keep a point only where the cumulative counts change slope
    let kept = (0..counts.len()).filter(|&i| {
        if i == 0 || i + 1 == counts.len() {
            return true;
        }
        let (prev, here, next) = (counts[i - 1], counts[i], counts[i + 1]);
        next.0 + prev.0 != 2 * here.0 || next.1 + prev.1 != 2 * here.1
    });
    let counts = kept.map(|i| counts[i]).collect::<Vec<(usize, usize, f64)>>();

    for (tp, fp, threshold) in counts {
        curve.tpr.push(tp as f64 / tps as f64);
        curve.fpr.push(fp as f64 / fps as f64);
        curve.thresholds.push(threshold);
    }
    Ok(curve)
}

/// ROC of the indicator matrix read as one flat binary problem.
///
/// Each `(row, column)` cell counts as an independent sample. This treats the three
/// outputs as interchangeable binary decisions, which does not hold for the quadrant
/// targets; the curve is reported for continuity with earlier runs, not as a
/// per-class ROC.
pub fn flattened_roc(y_true: &Array2<f32>, y_score: &Array2<f32>) -> Result<RocCurve> {
    check_shapes(&y_true.view(), &y_score.view())?;
    let labels = y_true.iter().copied().collect::<Vec<f32>>();
    let scores = y_score.iter().copied().collect::<Vec<f32>>();
    roc_curve(&labels, &scores)
}

pub fn auc(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum()
}
