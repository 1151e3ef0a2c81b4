//! Burn Dataset Integration
//!
//! Exposes an in-memory [`DataSplit`] through Burn's `Dataset` trait and
//! turns lists of items into `[N, C, H, W]` image batches.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use super::split::{argmax, DataSplit};

/// A single banknote image ready for Burn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BanknoteItem {
    /// Image data as flattened CHW float array in `[0, 1]`
    pub image: Vec<f32>,
    /// Class label index
    pub label: usize,
}

/// Burn view over a pre-loaded split
#[derive(Debug, Clone)]
pub struct BanknoteDataset {
    items: Vec<BanknoteItem>,
    image_dims: [usize; 3],
}

impl BanknoteDataset {
    /// Copy a split into Burn items (one-hot labels become class indices)
    pub fn from_split(split: &DataSplit) -> Self {
        let items = split
            .images_data()
            .iter()
            .zip(split.labels_onehot())
            .map(|(image, onehot)| BanknoteItem {
                image: image.clone(),
                label: argmax(onehot),
            })
            .collect();

        Self {
            items,
            image_dims: split.image_dims(),
        }
    }

    /// `[channels, height, width]` of every item
    pub fn image_dims(&self) -> [usize; 3] {
        self.image_dims
    }

    /// Items at the given indices, skipping out-of-range ones
    pub fn items_at(&self, indices: &[usize]) -> Vec<BanknoteItem> {
        indices.iter().filter_map(|&i| self.get(i)).collect()
    }
}

impl Dataset<BanknoteItem> for BanknoteDataset {
    fn get(&self, index: usize) -> Option<BanknoteItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of images and class targets
#[derive(Clone, Debug)]
pub struct BanknoteBatch<B: Backend> {
    /// `[batch, channels, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch]` class indices
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks items into tensors on the requested device
#[derive(Clone, Debug)]
pub struct BanknoteBatcher {
    image_dims: [usize; 3],
}

impl BanknoteBatcher {
    pub fn new(image_dims: [usize; 3]) -> Self {
        Self { image_dims }
    }
}

impl<B: Backend> Batcher<B, BanknoteItem, BanknoteBatch<B>> for BanknoteBatcher {
    fn batch(&self, items: Vec<BanknoteItem>, device: &B::Device) -> BanknoteBatch<B> {
        let batch_size = items.len();
        let [channels, height, width] = self.image_dims;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, channels, height, width]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        BanknoteBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn split() -> DataSplit {
        let images = (0..5).map(|i| vec![i as f32 / 10.0; 3 * 2 * 2]).collect();
        DataSplit::from_labels(images, &[0, 1, 1, 0, 1], [3, 2, 2], 2).unwrap()
    }

    #[test]
    fn test_dataset_from_split() {
        let dataset = BanknoteDataset::from_split(&split());
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.get(2).unwrap().label, 1);
        assert!(dataset.get(5).is_none());
        assert_eq!(dataset.items_at(&[4, 0, 9]).len(), 2);
    }

    #[test]
    fn test_batcher_shapes() {
        let device = Default::default();
        let dataset = BanknoteDataset::from_split(&split());
        let batcher = BanknoteBatcher::new(dataset.image_dims());

        let batch: BanknoteBatch<TestBackend> = batcher.batch(dataset.items_at(&[0, 1, 2]), &device);
        assert_eq!(batch.images.dims(), [3, 3, 2, 2]);
        assert_eq!(batch.targets.dims(), [3]);

        let targets: Vec<i64> = batch.targets.into_data().to_vec().unwrap();
        assert_eq!(targets, vec![0, 1, 1]);
    }
}
