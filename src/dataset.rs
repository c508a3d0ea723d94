use std::fs;
use std::path::{Path, PathBuf};

use burn::data::dataset::{Dataset, InMemDataset};
use image::imageops::FilterType;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::error::DataLoadError;

/// Raster formats the loader picks up; anything else in a class directory
/// is ignored.
const SUPPORTED_FILES: [&str; 4] = ["bmp", "jpg", "jpeg", "png"];

/// A decoded, resized image with its class label.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageItem {
    /// Interleaved RGB bytes, `size * size * 3` of them.
    pub pixels: Vec<u8>,
    /// Class id in `[0, num_classes)`.
    pub label: usize,
}

/// An in-memory image classification dataset loaded from a directory tree
/// with one subdirectory per class.
///
/// Class ids are assigned to the lexicographically sorted subdirectory
/// names, starting at 0. Every image is decoded and resized up front with
/// bilinear (triangle filter) interpolation, so load failures surface
/// before the first batch and iteration order is stable across runs.
pub struct FolderDataset {
    dataset: InMemDataset<ImageItem>,
    classes: Vec<String>,
}

impl Dataset<ImageItem> for FolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl FolderDataset {
    /// Load a whole directory tree as one dataset, in listing order.
    pub fn from_folder<P: AsRef<Path>>(root: P, image_size: usize) -> Result<Self, DataLoadError> {
        let (entries, classes) = scan(root.as_ref())?;
        let items = decode_entries(&entries, image_size)?;

        Ok(Self::with_items(items, classes))
    }

    /// Load a directory tree and withhold a validation subset.
    ///
    /// The listing is shuffled once with a `StdRng` seeded from `seed`; the
    /// trailing `floor(validation_fraction * n)` samples become the
    /// validation set and the rest the training set. The same seed always
    /// yields the same membership and order.
    pub fn split_from_folder<P: AsRef<Path>>(
        root: P,
        image_size: usize,
        validation_fraction: f64,
        seed: u64,
    ) -> Result<(Self, Self), DataLoadError> {
        let (mut entries, classes) = scan(root.as_ref())?;

        let mut rng = StdRng::seed_from_u64(seed);
        entries.shuffle(&mut rng);

        let num_validation = (validation_fraction * entries.len() as f64).floor() as usize;
        let split = entries.len() - num_validation;

        let training = decode_entries(&entries[..split], image_size)?;
        let validation = decode_entries(&entries[split..], image_size)?;

        log::debug!(
            "split `{}` into {} training / {} validation samples",
            root.as_ref().display(),
            training.len(),
            validation.len(),
        );

        Ok((
            Self::with_items(training, classes.clone()),
            Self::with_items(validation, classes),
        ))
    }

    fn with_items(items: Vec<ImageItem>, classes: Vec<String>) -> Self {
        Self {
            dataset: InMemDataset::new(items),
            classes,
        }
    }

    /// Class names, sorted; ids are positions in this slice.
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Number of classes found in the directory tree.
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

/// Walk `root/<class>/<image>` and collect `(path, label)` pairs.
///
/// Classes are the sorted subdirectory names; files within a class are
/// sorted by path, so the listing order is deterministic.
fn scan(root: &Path) -> Result<(Vec<(PathBuf, usize)>, Vec<String>), DataLoadError> {
    let read_dir = fs::read_dir(root).map_err(|source| DataLoadError::MissingDirectory {
        path: root.to_path_buf(),
        source,
    })?;

    let mut class_dirs = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| DataLoadError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.path().is_dir() {
            let name = entry.file_name().to_string_lossy().into_owned();
            class_dirs.push((name, entry.path()));
        }
    }

    if class_dirs.is_empty() {
        return Err(DataLoadError::NoClasses {
            path: root.to_path_buf(),
        });
    }
    class_dirs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut entries = Vec::new();
    for (label, (class, dir)) in class_dirs.iter().enumerate() {
        let mut files = Vec::new();
        let read_dir = fs::read_dir(dir).map_err(|source| DataLoadError::Io {
            path: dir.clone(),
            source,
        })?;
        for entry in read_dir {
            let entry = entry.map_err(|source| DataLoadError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && has_supported_extension(&path) {
                files.push(path);
            }
        }

        if files.is_empty() {
            return Err(DataLoadError::EmptyClass {
                class: class.clone(),
                path: root.to_path_buf(),
            });
        }
        files.sort();

        log::debug!("class `{class}` -> id {label}, {} images", files.len());
        entries.extend(files.into_iter().map(|path| (path, label)));
    }

    let classes = class_dirs.into_iter().map(|(name, _)| name).collect();

    Ok((entries, classes))
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_FILES.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Decode and resize every entry, preserving order.
///
/// Decoding fans out over rayon's pool; collecting indexed results keeps
/// the output order identical to the input listing.
fn decode_entries(
    entries: &[(PathBuf, usize)],
    image_size: usize,
) -> Result<Vec<ImageItem>, DataLoadError> {
    entries
        .par_iter()
        .map(|(path, label)| {
            let image = image::open(path).map_err(|source| DataLoadError::Decode {
                path: path.clone(),
                source,
            })?;
            let resized = image.resize_exact(
                image_size as u32,
                image_size as u32,
                FilterType::Triangle,
            );

            Ok(ImageItem {
                pixels: resized.into_rgb8().into_raw(),
                label: *label,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const IMAGE_SIZE: usize = 32;

    /// Write `count` distinct PNGs under `root/<class>/`.
    fn write_class_images(root: &Path, class: &str, count: usize, tint: u8) {
        let dir = root.join(class);
        fs::create_dir_all(&dir).unwrap();
        for index in 0..count {
            let image = image::RgbImage::from_fn(20, 24, |x, y| {
                image::Rgb([tint, index as u8, (x + y) as u8])
            });
            image.save(dir.join(format!("img_{index:02}.png"))).unwrap();
        }
    }

    fn two_class_tree() -> tempfile::TempDir {
        let tree = tempfile::tempdir().unwrap();
        write_class_images(tree.path(), "healthy", 10, 10);
        write_class_images(tree.path(), "blight", 10, 200);
        tree
    }

    #[test]
    fn classes_are_sorted_and_labels_in_range() {
        let tree = two_class_tree();
        let dataset = FolderDataset::from_folder(tree.path(), IMAGE_SIZE).unwrap();

        assert_eq!(dataset.classes(), ["blight", "healthy"]);
        assert_eq!(dataset.len(), 20);
        for item in dataset.iter() {
            assert!(item.label < dataset.num_classes());
            assert_eq!(item.pixels.len(), 3 * IMAGE_SIZE * IMAGE_SIZE);
        }
    }

    #[test]
    fn split_withholds_trailing_fraction() {
        let tree = two_class_tree();
        let (training, validation) =
            FolderDataset::split_from_folder(tree.path(), IMAGE_SIZE, 0.2, 123).unwrap();

        // floor(0.2 * 20) = 4 samples withheld
        assert_eq!(training.len(), 16);
        assert_eq!(validation.len(), 4);

        // No sample appears in both subsets; pixel contents are unique per image.
        let train_pixels: HashSet<Vec<u8>> = training.iter().map(|item| item.pixels).collect();
        let valid_pixels: HashSet<Vec<u8>> = validation.iter().map(|item| item.pixels).collect();
        assert_eq!(train_pixels.len(), 16);
        assert_eq!(valid_pixels.len(), 4);
        assert!(train_pixels.is_disjoint(&valid_pixels));
    }

    #[test]
    fn same_seed_means_same_order() {
        let tree = two_class_tree();
        let (first_train, first_valid) =
            FolderDataset::split_from_folder(tree.path(), IMAGE_SIZE, 0.2, 123).unwrap();
        let (second_train, second_valid) =
            FolderDataset::split_from_folder(tree.path(), IMAGE_SIZE, 0.2, 123).unwrap();

        assert_eq!(
            first_train.iter().collect::<Vec<_>>(),
            second_train.iter().collect::<Vec<_>>()
        );
        assert_eq!(
            first_valid.iter().collect::<Vec<_>>(),
            second_valid.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn dataloader_yields_one_batch_per_full_or_partial_chunk() {
        use crate::data::{ClassificationBatch, ClassificationBatcher};
        use burn::backend::ndarray::NdArray;
        use burn::data::dataloader::DataLoaderBuilder;

        let tree = two_class_tree();
        let (training, validation) =
            FolderDataset::split_from_folder(tree.path(), IMAGE_SIZE, 0.2, 123).unwrap();

        let loader = |dataset: FolderDataset| {
            DataLoaderBuilder::<NdArray, _, _>::new(ClassificationBatcher::new(IMAGE_SIZE))
                .batch_size(4)
                .num_workers(1)
                .build(dataset)
        };

        let train_loader = loader(training);
        let train_batches: Vec<ClassificationBatch<NdArray>> = train_loader.iter().collect();
        let valid_loader = loader(validation);
        let valid_batches: Vec<ClassificationBatch<NdArray>> = valid_loader.iter().collect();

        // 16 samples / 4 per batch, 4 samples / 4 per batch
        assert_eq!(train_batches.len(), 4);
        assert_eq!(valid_batches.len(), 1);
        assert_eq!(valid_batches[0].targets.dims(), [4]);
    }

    #[test]
    fn zero_fraction_keeps_everything_in_training() {
        let tree = two_class_tree();
        let (training, validation) =
            FolderDataset::split_from_folder(tree.path(), IMAGE_SIZE, 0.0, 123).unwrap();

        assert_eq!(training.len(), 20);
        assert_eq!(validation.len(), 0);
    }

    #[test]
    fn missing_directory_fails() {
        let tree = tempfile::tempdir().unwrap();
        let result = FolderDataset::from_folder(tree.path().join("nope"), IMAGE_SIZE);

        assert!(matches!(
            result,
            Err(DataLoadError::MissingDirectory { .. })
        ));
    }

    #[test]
    fn root_without_classes_fails() {
        let tree = tempfile::tempdir().unwrap();
        fs::write(tree.path().join("stray.txt"), "not a class").unwrap();

        let result = FolderDataset::from_folder(tree.path(), IMAGE_SIZE);
        assert!(matches!(result, Err(DataLoadError::NoClasses { .. })));
    }

    #[test]
    fn empty_class_fails_before_any_batch() {
        let tree = two_class_tree();
        fs::create_dir_all(tree.path().join("rust")).unwrap();

        let result = FolderDataset::from_folder(tree.path(), IMAGE_SIZE);
        assert!(matches!(
            result,
            Err(DataLoadError::EmptyClass { class, .. }) if class == "rust"
        ));
    }

    #[test]
    fn undecodable_image_fails() {
        let tree = two_class_tree();
        fs::write(tree.path().join("healthy").join("broken.png"), "not an image").unwrap();

        let result = FolderDataset::from_folder(tree.path(), IMAGE_SIZE);
        assert!(matches!(result, Err(DataLoadError::Decode { path, .. }) if path.ends_with("broken.png")));
    }

    #[test]
    fn unsupported_files_are_ignored() {
        let tree = two_class_tree();
        fs::write(tree.path().join("healthy").join("notes.txt"), "ignored").unwrap();

        let dataset = FolderDataset::from_folder(tree.path(), IMAGE_SIZE).unwrap();
        assert_eq!(dataset.len(), 20);
    }
}
