//! Banknote Image Directory Loader
//!
//! Discovers the class sub-directories of an image folder and decodes
//! images into normalized channels-first float buffers.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{BanknoteError, Result};

/// File extensions recognised as images
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// A single image file with its class label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index (position in the sorted class list)
    pub label: usize,
}

/// Image folder organised as one sub-directory per class
#[derive(Debug)]
pub struct ImageDirectory {
    /// Root directory of the dataset
    pub root_dir: PathBuf,
    /// All image files, grouped by class in class order
    pub samples: Vec<ImageSample>,
    /// Class names, sorted; index = label
    pub classes: Vec<String>,
    /// Side length images are resized to
    pub image_size: u32,
}

impl ImageDirectory {
    /// Scan an image directory
    ///
    /// The directory should be structured as:
    /// ```text
    /// root_dir/
    /// ├── 1000/
    /// │   ├── front_01.jpg
    /// │   └── back_01.jpg
    /// ├── 500/
    /// │   └── ...
    /// └── ...
    /// ```
    pub fn new<P: AsRef<Path>>(root_dir: P, image_size: usize) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Scanning image directory: {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(BanknoteError::PathNotFound(root_dir));
        }
        if image_size == 0 {
            return Err(BanknoteError::Config("image size must be greater than 0".to_string()));
        }

        let mut classes: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                // Labels are indices into the sorted names, so none may be dropped
                let name = entry.file_name().into_string().map_err(|_| {
                    BanknoteError::Dataset(format!(
                        "class directory name is not valid UTF-8: {:?}",
                        entry.path()
                    ))
                })?;
                classes.push(name);
            }
        }
        classes.sort();

        if classes.is_empty() {
            return Err(BanknoteError::Dataset(format!(
                "No class directories found in {:?}",
                root_dir
            )));
        }

        info!("Found {} classes", classes.len());

        let mut samples = Vec::new();
        for (label, class_name) in classes.iter().enumerate() {
            let class_dir = root_dir.join(class_name);

            let mut paths: Vec<PathBuf> = WalkDir::new(&class_dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.path().to_path_buf())
                .filter(|p| p.is_file() && is_image_file(p))
                .collect();
            // Directory iteration order is platform dependent
            paths.sort();

            debug!("Class '{}' (label {}): {} images", class_name, label, paths.len());
            samples.extend(paths.into_iter().map(|path| ImageSample { path, label }));
        }

        if samples.is_empty() {
            return Err(BanknoteError::Dataset(format!(
                "No images found in {:?}",
                root_dir
            )));
        }

        info!("Found {} images", samples.len());

        Ok(Self {
            root_dir,
            samples,
            classes,
            image_size: image_size as u32,
        })
    }

    /// Get the number of samples in the dataset
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the dataset is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get the number of classes
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Samples of one class, in directory order
    pub fn samples_of_class(&self, class_idx: usize) -> Vec<&ImageSample> {
        self.samples.iter().filter(|s| s.label == class_idx).collect()
    }

    /// Load an image from disk and resize it
    pub fn load_image(&self, sample: &ImageSample) -> Result<DynamicImage> {
        let img = ImageReader::open(&sample.path)
            .map_err(|e| BanknoteError::ImageLoadError(sample.path.clone(), e.to_string()))?
            .with_guessed_format()
            .map_err(|e| BanknoteError::ImageLoadError(sample.path.clone(), e.to_string()))?
            .decode()
            .map_err(|e| BanknoteError::ImageLoadError(sample.path.clone(), e.to_string()))?;

        Ok(img.resize_exact(
            self.image_size,
            self.image_size,
            image::imageops::FilterType::Triangle,
        ))
    }

    /// Load an image as CHW RGB floats in `[0, 1]`
    pub fn load_image_tensor(&self, sample: &ImageSample) -> Result<Vec<f32>> {
        let img = self.load_image(sample)?;
        Ok(image_to_chw(&img))
    }

    /// Decode a list of samples, showing a progress bar
    pub fn load_tensors(&self, samples: &[&ImageSample], message: &str) -> Result<Vec<Vec<f32>>> {
        let pb = ProgressBar::new(samples.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(message.to_string());

        let mut tensors = Vec::with_capacity(samples.len());
        for sample in samples {
            tensors.push(self.load_image_tensor(sample)?);
            pb.inc(1);
        }
        pb.finish_and_clear();

        Ok(tensors)
    }

    /// Get statistics about the dataset
    pub fn get_stats(&self) -> DatasetStats {
        let mut class_counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            class_counts[sample.label] += 1;
        }

        DatasetStats {
            total_samples: self.samples.len(),
            num_classes: self.num_classes(),
            class_counts,
            class_names: self.classes.clone(),
        }
    }
}

/// Check whether a path has one of the recognised image extensions
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Convert an image to RGB CHW floats divided by 255
pub fn image_to_chw(img: &DynamicImage) -> Vec<f32> {
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let plane = height * width;
    let mut tensor = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        tensor[offset] = pixel[0] as f32 / 255.0;
        tensor[plane + offset] = pixel[1] as f32 / 255.0;
        tensor[2 * plane + offset] = pixel[2] as f32 / 255.0;
    }

    tensor
}

/// Statistics about the dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub num_classes: usize,
    pub class_counts: Vec<usize>,
    pub class_names: Vec<String>,
}

impl DatasetStats {
    /// Print statistics to console
    pub fn print(&self) {
        println!("\n📊 Dataset Statistics:");
        println!("  Total images: {}", self.total_samples);
        println!("  Number of classes: {}", self.num_classes);
        println!("\n  Images per class:");

        for (idx, (name, count)) in self.class_names.iter().zip(&self.class_counts).enumerate() {
            let bar_len = (*count as f32 / self.total_samples.max(1) as f32 * 40.0) as usize;
            println!("    {:3}. {:20} {:5} {}", idx, name, count, "█".repeat(bar_len));
        }
    }
}
