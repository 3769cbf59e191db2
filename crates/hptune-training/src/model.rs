//! Digit classifier trained by the example trainer.
//!
//! [`ModelFn`] is the seam between the [`Trainer`](crate::trainer::Trainer)
//! and a model: one optimization step per batch, and a read-only evaluation
//! of a batch. [`SoftmaxClassifier`] is a multinomial logistic regression
//! over flattened images, optimized with momentum SGD on the mean negative
//! log-likelihood.

use crate::data::Batch;
use thiserror::Error;

/// Errors raised by a model while training or evaluating.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The batch has a different feature width than the model.
    #[error("feature width mismatch: model expects {expected}, batch has {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    /// A label is not one of the model's classes.
    #[error("label {label} is outside the model's {num_classes} classes")]
    InvalidLabel { label: usize, num_classes: usize },

    /// The loss diverged.
    #[error("non-finite loss {0}")]
    NonFiniteLoss(f64),

    /// An empty batch was passed to a training step.
    #[error("empty batch")]
    EmptyBatch,
}

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Per-batch evaluation totals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchEval {
    /// Sum of per-example negative log-likelihood.
    pub nll_sum: f64,
    /// Number of correctly classified examples.
    pub correct: u64,
    /// Number of examples evaluated.
    pub count: u64,
}

impl BatchEval {
    /// Adds another batch's totals.
    pub fn merge(&mut self, other: BatchEval) {
        self.nll_sum += other.nll_sum;
        self.correct += other.correct;
        self.count += other.count;
    }
}

/// Trait for models driven by the trainer.
pub trait ModelFn: Send {
    /// Runs one optimization step and returns the batch's mean loss.
    fn train_step(&mut self, batch: &Batch) -> ModelResult<f64>;

    /// Evaluates a batch without updating parameters.
    fn evaluate_batch(&self, batch: &Batch) -> ModelResult<BatchEval>;
}

/// Multinomial logistic regression with momentum SGD.
///
/// # Examples
///
/// ```
/// use hptune_training::data::synthetic_digits;
/// use hptune_training::model::{ModelFn, SoftmaxClassifier};
///
/// let data = synthetic_digits(32, 0, 0);
/// let mut model = SoftmaxClassifier::new(data.num_features(), 10, 0.01, 0.5);
/// let batch = data.batches(32, None).next().unwrap();
/// let loss = model.train_step(&batch).unwrap();
/// assert!(loss > 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct SoftmaxClassifier {
    num_features: usize,
    num_classes: usize,
    /// Row-major `num_classes x num_features`.
    weights: Vec<f32>,
    bias: Vec<f32>,
    weight_velocity: Vec<f32>,
    bias_velocity: Vec<f32>,
    lr: f32,
    momentum: f32,
}

impl SoftmaxClassifier {
    /// Creates a zero-initialized classifier.
    pub fn new(num_features: usize, num_classes: usize, lr: f64, momentum: f64) -> Self {
        Self {
            num_features,
            num_classes,
            weights: vec![0.0; num_features * num_classes],
            bias: vec![0.0; num_classes],
            weight_velocity: vec![0.0; num_features * num_classes],
            bias_velocity: vec![0.0; num_classes],
            lr: lr as f32,
            momentum: momentum as f32,
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn check_batch(&self, batch: &Batch) -> ModelResult<()> {
        if batch.num_features() != self.num_features {
            return Err(ModelError::FeatureMismatch {
                expected: self.num_features,
                actual: batch.num_features(),
            });
        }
        if let Some(&label) = batch.labels().iter().find(|&&l| l >= self.num_classes) {
            return Err(ModelError::InvalidLabel {
                label,
                num_classes: self.num_classes,
            });
        }
        Ok(())
    }

    /// Log-probabilities of every class for one example.
    fn log_softmax(&self, x: &[f32]) -> Vec<f64> {
        let logits: Vec<f64> = (0..self.num_classes)
            .map(|c| {
                let row = &self.weights[c * self.num_features..(c + 1) * self.num_features];
                let dot: f32 = row.iter().zip(x).map(|(w, v)| w * v).sum();
                f64::from(dot + self.bias[c])
            })
            .collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let log_sum = logits.iter().map(|l| (l - max).exp()).sum::<f64>().ln() + max;
        logits.into_iter().map(|l| l - log_sum).collect()
    }

    /// Predicted class for one example.
    pub fn predict(&self, x: &[f32]) -> usize {
        argmax(&self.log_softmax(x))
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
        .0
}

impl ModelFn for SoftmaxClassifier {
    fn train_step(&mut self, batch: &Batch) -> ModelResult<f64> {
        if batch.is_empty() {
            return Err(ModelError::EmptyBatch);
        }
        self.check_batch(batch)?;

        let n = batch.len();
        let scale = 1.0 / n as f32;
        let mut grad_w = vec![0.0f32; self.weights.len()];
        let mut grad_b = vec![0.0f32; self.num_classes];
        let mut loss = 0.0f64;

        for (i, &label) in batch.labels().iter().enumerate() {
            let x = batch.row(i);
            let log_probs = self.log_softmax(x);
            loss -= log_probs[label];

            for (c, log_p) in log_probs.iter().enumerate() {
                let mut g = log_p.exp() as f32;
                if c == label {
                    g -= 1.0;
                }
                g *= scale;
                grad_b[c] += g;
                let row = &mut grad_w[c * self.num_features..(c + 1) * self.num_features];
                for (gw, v) in row.iter_mut().zip(x) {
                    *gw += g * v;
                }
            }
        }

        let loss = loss / n as f64;
        if !loss.is_finite() {
            return Err(ModelError::NonFiniteLoss(loss));
        }

        // v <- momentum * v + grad; p <- p - lr * v
        for ((w, v), g) in self
            .weights
            .iter_mut()
            .zip(self.weight_velocity.iter_mut())
            .zip(&grad_w)
        {
            *v = self.momentum * *v + g;
            *w -= self.lr * *v;
        }
        for ((b, v), g) in self
            .bias
            .iter_mut()
            .zip(self.bias_velocity.iter_mut())
            .zip(&grad_b)
        {
            *v = self.momentum * *v + g;
            *b -= self.lr * *v;
        }

        Ok(loss)
    }

    fn evaluate_batch(&self, batch: &Batch) -> ModelResult<BatchEval> {
        self.check_batch(batch)?;
        let mut eval = BatchEval::default();
        for (i, &label) in batch.labels().iter().enumerate() {
            let log_probs = self.log_softmax(batch.row(i));
            eval.nll_sum -= log_probs[label];
            if argmax(&log_probs) == label {
                eval.correct += 1;
            }
            eval.count += 1;
        }
        Ok(eval)
    }
}
