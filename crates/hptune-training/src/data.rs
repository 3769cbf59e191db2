//! Handwritten-digit datasets.
//!
//! This module reads MNIST from its IDX files and produces in-memory
//! [`Dataset`]s that can be iterated in (optionally shuffled) batches.
//!
//! # IDX Format
//!
//! All integers are big-endian `u32`:
//! - images: magic `2051`, count, rows, cols, then `count * rows * cols` bytes
//! - labels: magic `2049`, count, then `count` bytes
//!
//! Files may be gzip-compressed; a `.gz` suffix is detected automatically.
//!
//! When no MNIST directory is available, [`synthetic_digits`] generates a
//! deterministic stand-in with the same shape and normalization.

use flate2::read::GzDecoder;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Magic number of an IDX image file.
pub const IMAGE_MAGIC: u32 = 2051;
/// Magic number of an IDX label file.
pub const LABEL_MAGIC: u32 = 2049;
pub const IMAGE_SIDE: usize = 28;
pub const NUM_FEATURES: usize = IMAGE_SIDE * IMAGE_SIDE;
pub const NUM_CLASSES: usize = 10;
/// Mean pixel intensity of the MNIST training set.
pub const MNIST_MEAN: f32 = 0.1307;
/// Pixel standard deviation of the MNIST training set.
pub const MNIST_STD: f32 = 0.3081;

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

/// Errors that can occur while loading datasets.
#[derive(Error, Debug)]
pub enum DataError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Neither the raw nor the gzip variant of a file exists.
    #[error("dataset file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file does not start with the expected magic number.
    #[error("bad IDX magic number: expected {expected}, got {actual}")]
    BadMagic { expected: u32, actual: u32 },

    /// The file is shorter than its header claims.
    #[error("truncated IDX file: expected {expected} bytes of data, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Image and label counts differ.
    #[error("{images} images but {labels} labels")]
    LengthMismatch { images: usize, labels: usize },

    /// A label is outside `0..NUM_CLASSES`.
    #[error("label {label} at index {index} is out of range")]
    InvalidLabel { label: usize, index: usize },

    /// A dataset or batch size was empty where data is required.
    #[error("empty dataset")]
    Empty,
}

/// Result type for dataset operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// An in-memory set of flattened images with class labels.
#[derive(Debug, Clone)]
pub struct Dataset {
    features: Vec<f32>,
    labels: Vec<usize>,
    num_features: usize,
}

impl Dataset {
    /// Creates a dataset from row-major features.
    ///
    /// # Errors
    ///
    /// Returns an error if the feature count does not match the label count or
    /// a label is not a valid class.
    pub fn new(features: Vec<f32>, labels: Vec<usize>, num_features: usize) -> Result<Self> {
        if num_features == 0 {
            return Err(DataError::Empty);
        }
        let rows = features.len() / num_features;
        if features.len() % num_features != 0 || rows != labels.len() {
            return Err(DataError::LengthMismatch {
                images: rows,
                labels: labels.len(),
            });
        }
        if let Some((index, &label)) = labels
            .iter()
            .enumerate()
            .find(|&(_, &label)| label >= NUM_CLASSES)
        {
            return Err(DataError::InvalidLabel { label, index });
        }
        Ok(Self {
            features,
            labels,
            num_features,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Returns the features and label of example `index`.
    pub fn example(&self, index: usize) -> (&[f32], usize) {
        let start = index * self.num_features;
        (
            &self.features[start..start + self.num_features],
            self.labels[index],
        )
    }

    /// Number of batches one pass produces.
    pub fn num_batches(&self, batch_size: usize) -> usize {
        self.len().div_ceil(batch_size.max(1))
    }

    /// Iterates over the dataset in batches of `batch_size`.
    ///
    /// With an `rng` the example order is shuffled for this pass; the last
    /// batch may be short.
    pub fn batches(&self, batch_size: usize, rng: Option<&mut StdRng>) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(rng) = rng {
            order.shuffle(rng);
        }
        BatchIter {
            dataset: self,
            order,
            batch_size: batch_size.max(1),
            position: 0,
        }
    }

    /// Keeps only the first `n` examples.
    pub fn truncate(&mut self, n: usize) {
        if n < self.len() {
            self.labels.truncate(n);
            self.features.truncate(n * self.num_features);
        }
    }
}

/// A batch of examples gathered from a [`Dataset`].
#[derive(Debug, Clone)]
pub struct Batch {
    features: Vec<f32>,
    labels: Vec<usize>,
    num_features: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Features of the `index`-th example in the batch.
    pub fn row(&self, index: usize) -> &[f32] {
        let start = index * self.num_features;
        &self.features[start..start + self.num_features]
    }
}

/// Iterator returned by [`Dataset::batches`].
#[derive(Debug)]
pub struct BatchIter<'a> {
    dataset: &'a Dataset,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
}

impl Iterator for BatchIter<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let indices = &self.order[self.position..end];
        self.position = end;

        let num_features = self.dataset.num_features;
        let mut features = Vec::with_capacity(indices.len() * num_features);
        let mut labels = Vec::with_capacity(indices.len());
        for &index in indices {
            let (row, label) = self.dataset.example(index);
            features.extend_from_slice(row);
            labels.push(label);
        }
        Some(Batch {
            features,
            labels,
            num_features,
        })
    }
}

/// Maps raw `0..=255` pixels to the normalized MNIST scale.
pub fn normalize_pixels(pixels: &[u8]) -> Vec<f32> {
    pixels
        .iter()
        .map(|&p| (f32::from(p) / 255.0 - MNIST_MEAN) / MNIST_STD)
        .collect()
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let end = offset.saturating_add(4);
    bytes
        .get(offset..end)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(DataError::Truncated {
            expected: end,
            actual: bytes.len(),
        })
}

/// Multiplies header dimensions; a product that overflows can never be
/// satisfied by the file and is reported as truncation.
fn checked_size(dims: &[usize], available: usize) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or(DataError::Truncated {
            expected: usize::MAX,
            actual: available,
        })
}

fn payload(bytes: &[u8], header: usize, len: usize) -> Result<&[u8]> {
    let truncated = DataError::Truncated {
        expected: len,
        actual: bytes.len().saturating_sub(header),
    };
    match header.checked_add(len) {
        Some(end) => bytes.get(header..end).ok_or(truncated),
        None => Err(truncated),
    }
}

/// Parses an IDX image file, returning raw pixels and the image side lengths.
pub fn parse_idx_images(bytes: &[u8]) -> Result<(Vec<u8>, usize, usize)> {
    let magic = read_u32(bytes, 0)?;
    if magic != IMAGE_MAGIC {
        return Err(DataError::BadMagic {
            expected: IMAGE_MAGIC,
            actual: magic,
        });
    }
    let count = read_u32(bytes, 4)? as usize;
    let rows = read_u32(bytes, 8)? as usize;
    let cols = read_u32(bytes, 12)? as usize;
    let len = checked_size(&[count, rows, cols], bytes.len().saturating_sub(16))?;
    let pixels = payload(bytes, 16, len)?;
    Ok((pixels.to_vec(), rows, cols))
}

/// Parses an IDX label file.
pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<u8>> {
    let magic = read_u32(bytes, 0)?;
    if magic != LABEL_MAGIC {
        return Err(DataError::BadMagic {
            expected: LABEL_MAGIC,
            actual: magic,
        });
    }
    let count = read_u32(bytes, 4)? as usize;
    Ok(payload(bytes, 8, count)?.to_vec())
}

/// Reads `dir/name`, falling back to `dir/name.gz`.
fn read_maybe_gz(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let raw = dir.join(name);
    let gz = dir.join(format!("{name}.gz"));
    let mut bytes = Vec::new();
    if raw.exists() {
        BufReader::new(File::open(&raw)?).read_to_end(&mut bytes)?;
    } else if gz.exists() {
        GzDecoder::new(BufReader::new(File::open(&gz)?)).read_to_end(&mut bytes)?;
    } else {
        return Err(DataError::NotFound(raw));
    }
    Ok(bytes)
}

fn load_split(dir: &Path, images: &str, labels: &str) -> Result<Dataset> {
    let (pixels, rows, cols) = parse_idx_images(&read_maybe_gz(dir, images)?)?;
    let labels = parse_idx_labels(&read_maybe_gz(dir, labels)?)?;
    let num_features = checked_size(&[rows, cols], pixels.len())?;
    let count = if num_features == 0 {
        0
    } else {
        pixels.len() / num_features
    };
    if count != labels.len() {
        return Err(DataError::LengthMismatch {
            images: count,
            labels: labels.len(),
        });
    }
    Dataset::new(
        normalize_pixels(&pixels),
        labels.into_iter().map(usize::from).collect(),
        num_features,
    )
}

/// Loads the MNIST train and test splits from `dir`.
///
/// # Errors
///
/// Returns an error if any of the four IDX files is missing or malformed.
pub fn load_mnist(dir: impl AsRef<Path>) -> Result<(Dataset, Dataset)> {
    let dir = dir.as_ref();
    let train = load_split(dir, TRAIN_IMAGES, TRAIN_LABELS)?;
    let test = load_split(dir, TEST_IMAGES, TEST_LABELS)?;
    info!(
        "Loaded MNIST from {}: {} train / {} test examples",
        dir.display(),
        train.len(),
        test.len()
    );
    Ok((train, test))
}

/// Generates `count` synthetic 28x28 digits.
///
/// Each class has a fixed random stroke pattern; examples are noisy copies of
/// their class pattern. The same `seed` always yields the same patterns, so a
/// train and a validation split generated with one seed share classes.
pub fn synthetic_digits(count: usize, seed: u64, sample_seed: u64) -> Dataset {
    let mut pattern_rng = StdRng::seed_from_u64(seed);
    let patterns: Vec<Vec<u8>> = (0..NUM_CLASSES)
        .map(|_| {
            (0..NUM_FEATURES)
                .map(|_| if pattern_rng.gen_bool(0.2) { 255 } else { 0 })
                .collect()
        })
        .collect();

    let mut rng = StdRng::seed_from_u64(sample_seed);
    let mut pixels = Vec::with_capacity(count * NUM_FEATURES);
    let mut labels = Vec::with_capacity(count);
    for _ in 0..count {
        let label = rng.gen_range(0..NUM_CLASSES);
        pixels.extend(patterns[label].iter().map(|&p| {
            if rng.gen_bool(0.1) {
                255 - p
            } else {
                p
            }
        }));
        labels.push(label);
    }

    Dataset::from_raw(pixels, labels)
}

impl Dataset {
    fn from_raw(pixels: Vec<u8>, labels: Vec<usize>) -> Self {
        Self {
            features: normalize_pixels(&pixels),
            labels,
            num_features: NUM_FEATURES,
        }
    }
}
