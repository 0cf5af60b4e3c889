//! Mini-batch training loop.
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use ndarray::{Array2, Array3, ArrayView1, Axis};
use ndarray_stats::QuantileExt;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::Error;
use crate::model::{cross_entropy, signal_batch, target_batch, to_array, EEGNet, ModelConfig};

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer: AdamConfig,
    #[config(default = 20)]
    pub num_epochs: usize,
    #[config(default = 16)]
    pub batch_size: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 0.01)]
    pub learning_rate: f64,
}

/// Per-epoch loss and categorical accuracy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub loss: Vec<f32>,
    pub accuracy: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub val_accuracy: Vec<f32>,
}

fn argmax(v: ArrayView1<f32>) -> usize {
    v.argmax().unwrap_or(0)
}

/// Whether the largest prediction and the largest target component coincide.
pub fn categorical_hit(prediction: ArrayView1<f32>, target: ArrayView1<f32>) -> bool {
    argmax(prediction) == argmax(target)
}

fn check_pair(x: &Array3<f32>, y: &Array2<f32>) -> crate::error::Result<()> {
    if x.len_of(Axis(0)) != y.nrows() {
        return Err(Error::Shape(format!(
            "{} epochs for {} targets",
            x.len_of(Axis(0)),
            y.nrows()
        )));
    }
    Ok(())
}

/// Mean loss and categorical accuracy without updating the model.
pub fn evaluate<B: Backend>(
    model: &EEGNet<B>,
    x: &Array3<f32>,
    y: &Array2<f32>,
    device: &B::Device,
) -> crate::error::Result<(f32, f32)> {
    check_pair(x, y)?;
    let n = y.nrows();
    if n == 0 {
        return Ok((f32::NAN, f32::NAN));
    }
    model.check_input(x)?;

    let rows = (0..n).collect::<Vec<usize>>();
    let probabilities = model.forward(signal_batch(x, &rows, device));
    let loss = cross_entropy(probabilities.clone(), target_batch(y, &rows, device))
        .into_scalar()
        .elem::<f32>();
    let predicted = to_array(probabilities)?;
    let hits = predicted
        .rows()
        .into_iter()
        .zip(y.rows())
        .filter(|(p, t)| categorical_hit(p.view(), t.view()))
        .count();
    Ok((loss, hits as f32 / n as f32))
}

/// Trains `model` and returns it with its history; batches are reshuffled every epoch.
///
/// The reported training loss and accuracy are averaged over the epoch while the
/// weights move, the validation figures are computed after the last batch.
pub fn fit<B: AutodiffBackend, R: Rng + ?Sized>(
    mut model: EEGNet<B>,
    x: &Array3<f32>,
    y: &Array2<f32>,
    validation: Option<(&Array3<f32>, &Array2<f32>)>,
    cfg: &TrainingConfig,
    device: &B::Device,
    rng: &mut R,
) -> crate::error::Result<(EEGNet<B>, History)> {
    check_pair(x, y)?;
    let n = y.nrows();
    if n == 0 {
        return Err(Error::EmptyDataset);
    }
    model.check_input(x)?;
    if cfg.batch_size == 0 {
        return Err(Error::Config("batch_size must be positive".to_string()));
    }

    let mut optim = cfg.optimizer.init();
    let mut history = History::default();
    let mut order = (0..n).collect::<Vec<usize>>();

    for epoch in 0..cfg.num_epochs {
        order.shuffle(rng);
        let mut epoch_loss = 0.0f64;
        let mut hits = 0usize;

        for batch in order.chunks(cfg.batch_size) {
            let probabilities = model.forward(signal_batch(x, batch, device));
            let loss = cross_entropy(probabilities.clone(), target_batch(y, batch, device));
            epoch_loss += loss.clone().into_scalar().elem::<f64>() * batch.len() as f64;

            let predicted = to_array(probabilities)?;
            for (&i, p) in batch.iter().zip(predicted.rows()) {
                if categorical_hit(p, y.row(i)) {
                    hits += 1;
                }
            }

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(cfg.learning_rate, model, grads);
            model = model.constrain(&cfg.model);
        }

        let loss = (epoch_loss / n as f64) as f32;
        let accuracy = hits as f32 / n as f32;
        history.loss.push(loss);
        history.accuracy.push(accuracy);

        if let Some((x_val, y_val)) = validation {
            let (val_loss, val_accuracy) = evaluate(&model.valid(), x_val, y_val, device)?;
            history.val_loss.push(val_loss);
            history.val_accuracy.push(val_accuracy);
            log::info!(
                "Epoch {}/{}: loss {:.4} accuracy {:.4} val_loss {:.4} val_accuracy {:.4}",
                epoch + 1,
                cfg.num_epochs,
                loss,
                accuracy,
                val_loss,
                val_accuracy
            );
        } else {
            log::info!(
                "Epoch {}/{}: loss {:.4} accuracy {:.4}",
                epoch + 1,
                cfg.num_epochs,
                loss,
                accuracy
            );
        }
    }

    Ok((model, history))
}
