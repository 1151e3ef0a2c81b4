//! Train / validation / test splits
//!
//! Each class is split independently so every split keeps the class
//! balance of the source folder. The split is deterministic for a seed.
//!
//! For a class with `n` images, after a seeded shuffle:
//! 1. the first `ceil(n * testing)` go to the **test** split
//! 2. the next `ceil(n * validation)` go to the **validation** split
//! 3. the rest go to the **training** split

use std::path::Path;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::loader::{ImageDirectory, ImageSample};
use crate::utils::error::{BanknoteError, Result};

/// Seed used by [`read_datasets`]
pub const DEFAULT_SPLIT_SEED: u64 = 42;

/// Images and one-hot labels of one split, kept pairwise aligned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSplit {
    images_data: Vec<Vec<f32>>,
    labels_onehot: Vec<Vec<f32>>,
    /// `[channels, height, width]` of every image
    image_dims: [usize; 3],
    num_classes: usize,
}

impl DataSplit {
    /// Build a split, checking that images and labels line up
    pub fn new(
        images_data: Vec<Vec<f32>>,
        labels_onehot: Vec<Vec<f32>>,
        image_dims: [usize; 3],
        num_classes: usize,
    ) -> Result<Self> {
        if images_data.len() != labels_onehot.len() {
            return Err(BanknoteError::Dataset(format!(
                "{} images but {} labels",
                images_data.len(),
                labels_onehot.len()
            )));
        }

        let image_len: usize = image_dims.iter().product();
        if let Some(img) = images_data.iter().find(|img| img.len() != image_len) {
            return Err(BanknoteError::Dataset(format!(
                "image has {} values, expected {} for {:?}",
                img.len(),
                image_len,
                image_dims
            )));
        }

        if let Some(label) = labels_onehot.iter().find(|l| l.len() != num_classes) {
            return Err(BanknoteError::Dataset(format!(
                "one-hot label has width {}, expected {}",
                label.len(),
                num_classes
            )));
        }

        Ok(Self {
            images_data,
            labels_onehot,
            image_dims,
            num_classes,
        })
    }

    /// Build a split from images and class indices
    pub fn from_labels(
        images_data: Vec<Vec<f32>>,
        labels: &[usize],
        image_dims: [usize; 3],
        num_classes: usize,
    ) -> Result<Self> {
        if let Some(&bad) = labels.iter().find(|&&l| l >= num_classes) {
            return Err(BanknoteError::Dataset(format!(
                "label {} out of range for {} classes",
                bad, num_classes
            )));
        }
        let labels_onehot = labels.iter().map(|&l| one_hot(l, num_classes)).collect();
        Self::new(images_data, labels_onehot, image_dims, num_classes)
    }

    /// An empty split with the given geometry
    pub fn empty(image_dims: [usize; 3], num_classes: usize) -> Self {
        Self {
            images_data: Vec::new(),
            labels_onehot: Vec::new(),
            image_dims,
            num_classes,
        }
    }

    /// Images, each `[C, H, W]` flattened
    pub fn images_data(&self) -> &[Vec<f32>] {
        &self.images_data
    }

    /// One-hot labels, each of width `num_classes`
    pub fn labels_onehot(&self) -> &[Vec<f32>] {
        &self.labels_onehot
    }

    pub fn image_dims(&self) -> [usize; 3] {
        self.image_dims
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn len(&self) -> usize {
        self.images_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images_data.is_empty()
    }

    /// Class index of every sample (arg-max of the one-hot vector)
    pub fn labels(&self) -> Vec<usize> {
        self.labels_onehot.iter().map(|l| argmax(l)).collect()
    }

    /// Number of samples per class
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_classes];
        for label in self.labels() {
            counts[label] += 1;
        }
        counts
    }

    /// Shuffle images and labels with the same permutation
    pub fn shuffle(&mut self, seed: u64) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(&mut rng);
        self.apply_order(&order);
    }

    fn apply_order(&mut self, order: &[usize]) {
        let mut images = std::mem::take(&mut self.images_data);
        let mut labels = std::mem::take(&mut self.labels_onehot);
        self.images_data = order.iter().map(|&i| std::mem::take(&mut images[i])).collect();
        self.labels_onehot = order.iter().map(|&i| std::mem::take(&mut labels[i])).collect();
    }
}

/// One-hot vector with a 1 at `label`
pub fn one_hot(label: usize, num_classes: usize) -> Vec<f32> {
    let mut v = vec![0.0; num_classes];
    if label < num_classes {
        v[label] = 1.0;
    }
    v
}

/// Index of the largest value (first one on ties)
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// Class list plus the three splits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datasets {
    /// Class names; index = label
    pub classes: Vec<String>,
    pub training_data: DataSplit,
    pub validation_data: DataSplit,
    pub testing_data: DataSplit,
}

impl Datasets {
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Log split sizes
    pub fn log_summary(&self) {
        info!(
            "Datasets: {} classes | train: {} | validation: {} | test: {}",
            self.classes.len(),
            self.training_data.len(),
            self.validation_data.len(),
            self.testing_data.len()
        );
    }
}

/// Sizes `(test, validation)` taken from a class of `n` images
pub fn split_counts(n: usize, validation_percentage: f64, testing_percentage: f64) -> (usize, usize) {
    let n_test = ceil_fraction(n, testing_percentage).min(n);
    let n_val = ceil_fraction(n, validation_percentage).min(n - n_test);
    (n_test, n_val)
}

// 20 * 0.3 is 6.000000000000001 in f64; trim the noise before rounding up
fn ceil_fraction(n: usize, fraction: f64) -> usize {
    ((n as f64 * fraction) - 1e-9).ceil().max(0.0) as usize
}

/// Read an image folder and split it with [`DEFAULT_SPLIT_SEED`]
pub fn read_datasets<P: AsRef<Path>>(
    img_dir: P,
    img_size: usize,
    validation_percentage: f64,
    testing_percentage: f64,
) -> Result<Datasets> {
    read_datasets_with_seed(
        img_dir,
        img_size,
        validation_percentage,
        testing_percentage,
        DEFAULT_SPLIT_SEED,
    )
}

/// Read an image folder and produce stratified train/validation/test splits
pub fn read_datasets_with_seed<P: AsRef<Path>>(
    img_dir: P,
    img_size: usize,
    validation_percentage: f64,
    testing_percentage: f64,
    seed: u64,
) -> Result<Datasets> {
    for (name, value) in [
        ("validation_percentage", validation_percentage),
        ("testing_percentage", testing_percentage),
    ] {
        if !(0.0..1.0).contains(&value) {
            return Err(BanknoteError::Config(format!(
                "{} must be in range [0.0, 1.0), got {}",
                name, value
            )));
        }
    }
    if validation_percentage + testing_percentage >= 1.0 {
        return Err(BanknoteError::Config(
            "validation + testing percentages must be below 1.0".to_string(),
        ));
    }

    let directory = ImageDirectory::new(img_dir, img_size)?;
    let num_classes = directory.num_classes();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut test: Vec<&ImageSample> = Vec::new();
    let mut valid: Vec<&ImageSample> = Vec::new();
    let mut train: Vec<&ImageSample> = Vec::new();

    for class_idx in 0..num_classes {
        let mut class_samples = directory.samples_of_class(class_idx);
        class_samples.shuffle(&mut rng);

        let (n_test, n_val) =
            split_counts(class_samples.len(), validation_percentage, testing_percentage);
        test.extend(&class_samples[..n_test]);
        valid.extend(&class_samples[n_test..n_test + n_val]);
        train.extend(&class_samples[n_test + n_val..]);
    }

    let dims = [3, img_size, img_size];
    let build = |samples: &[&ImageSample], message: &str| -> Result<DataSplit> {
        let images = directory.load_tensors(samples, message)?;
        let labels: Vec<usize> = samples.iter().map(|s| s.label).collect();
        DataSplit::from_labels(images, &labels, dims, num_classes)
    };

    let datasets = Datasets {
        training_data: build(&train, "training")?,
        validation_data: build(&valid, "validation")?,
        testing_data: build(&test, "testing")?,
        classes: directory.classes.clone(),
    };
    datasets.log_summary();

    Ok(datasets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn tagged_split(n: usize) -> DataSplit {
        // Image i is filled with value i, label is i % 3
        let images: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32; 4]).collect();
        let labels: Vec<usize> = (0..n).map(|i| i % 3).collect();
        DataSplit::from_labels(images, &labels, [1, 2, 2], 3).unwrap()
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let err = DataSplit::new(vec![vec![0.0; 4]], vec![], [1, 2, 2], 2).unwrap_err();
        assert!(matches!(err, BanknoteError::Dataset(_)));
    }

    #[test]
    fn test_wrong_label_width_rejected() {
        let result = DataSplit::new(vec![vec![0.0; 4]], vec![vec![1.0, 0.0, 0.0]], [1, 2, 2], 2);
        assert!(result.is_err());
        assert!(DataSplit::from_labels(vec![vec![0.0; 4]], &[2], [1, 2, 2], 2).is_err());
    }

    #[test]
    fn test_shuffle_preserves_pairing() {
        let mut split = tagged_split(30);
        let before_counts = split.class_counts();
        split.shuffle(1);

        assert_eq!(split.len(), 30);
        assert_eq!(split.class_counts(), before_counts);
        for (img, label) in split.images_data().iter().zip(split.labels()) {
            assert_eq!(img[0] as usize % 3, label);
        }
        // Order actually changed
        let firsts: Vec<usize> = split.images_data().iter().map(|i| i[0] as usize).collect();
        assert_ne!(firsts, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_shuffle_is_deterministic() {
        let mut a = tagged_split(20);
        let mut b = tagged_split(20);
        a.shuffle(7);
        b.shuffle(7);
        assert_eq!(a.labels(), b.labels());
    }

    #[test]
    fn test_split_counts() {
        assert_eq!(split_counts(20, 0.1, 0.3), (6, 2));
        assert_eq!(split_counts(10, 0.1, 0.3), (3, 1));
        assert_eq!(split_counts(1, 0.1, 0.3), (1, 0));
        assert_eq!(split_counts(5, 0.0, 0.0), (0, 0));
    }

    #[test]
    fn test_argmax_and_one_hot() {
        assert_eq!(one_hot(2, 4), vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
    }

    #[test]
    fn test_read_datasets_stratified() {
        let dir = tempfile::tempdir().unwrap();
        for (class, color) in [("100", [200u8, 0, 0]), ("1000", [0u8, 0, 200])] {
            let class_dir = dir.path().join(class);
            std::fs::create_dir(&class_dir).unwrap();
            for i in 0..10 {
                RgbImage::from_pixel(10, 10, Rgb(color))
                    .save(class_dir.join(format!("{:02}.png", i)))
                    .unwrap();
            }
        }

        let datasets = read_datasets(dir.path(), 8, 0.1, 0.3).unwrap();

        assert_eq!(datasets.classes, vec!["100", "1000"]);
        assert_eq!(datasets.testing_data.len(), 6);
        assert_eq!(datasets.validation_data.len(), 2);
        assert_eq!(datasets.training_data.len(), 12);
        assert_eq!(datasets.training_data.class_counts(), vec![6, 6]);

        for split in [&datasets.training_data, &datasets.validation_data, &datasets.testing_data] {
            assert_eq!(split.images_data().len(), split.labels_onehot().len());
            assert!(split.labels_onehot().iter().all(|l| l.len() == datasets.classes.len()));
            assert_eq!(split.image_dims(), [3, 8, 8]);
        }
    }

    #[test]
    fn test_read_datasets_rejects_bad_percentages() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_datasets(dir.path(), 8, 0.6, 0.5),
            Err(BanknoteError::Config(_))
        ));
        assert!(read_datasets(dir.path(), 8, -0.1, 0.3).is_err());
    }
}
