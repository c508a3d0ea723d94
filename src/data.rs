use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::ElementConversion,
};

use crate::dataset::ImageItem;

/// Assembles [`ImageItem`]s into model-ready tensors.
///
/// Images come out as `[batch, 3, size, size]` floats scaled to `[0, 1]`,
/// targets as a flat `Int` tensor of class ids.
#[derive(Clone, Debug)]
pub struct ClassificationBatcher {
    image_size: usize,
}

#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl ClassificationBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ClassificationBatch<B>> for ClassificationBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ClassificationBatch<B> {
        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    TensorData::from([(item.label as i64).elem::<B::IntElem>()]),
                    device,
                )
            })
            .collect();

        let size = self.image_size;
        let images = items
            .into_iter()
            .map(|item| TensorData::new(item.pixels, Shape::new([size, size, 3])))
            .map(|data| {
                Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), device)
                    .swap_dims(2, 1) // [H, C, W]
                    .swap_dims(1, 0) // [C, H, W]
            })
            .map(|tensor| tensor / 255)
            .collect();

        let images = Tensor::stack(images, 0);
        let targets = Tensor::cat(targets, 0);

        ClassificationBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    fn item(size: usize, label: usize, value: u8) -> ImageItem {
        ImageItem {
            pixels: vec![value; 3 * size * size],
            label,
        }
    }

    #[test]
    fn batch_has_channel_first_shape() {
        let batcher = ClassificationBatcher::new(8);
        let device = NdArrayDevice::Cpu;

        let batch: ClassificationBatch<NdArray> =
            batcher.batch(vec![item(8, 0, 0), item(8, 1, 255), item(8, 0, 128)], &device);

        assert_eq!(batch.images.dims(), [3, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), [3]);
    }

    #[test]
    fn targets_keep_item_order() {
        let batcher = ClassificationBatcher::new(4);
        let device = NdArrayDevice::Cpu;

        let batch: ClassificationBatch<NdArray> =
            batcher.batch(vec![item(4, 2, 0), item(4, 0, 0), item(4, 1, 0)], &device);

        let targets: Vec<i64> = batch
            .targets
            .into_data()
            .convert::<i64>()
            .to_vec()
            .unwrap();
        assert_eq!(targets, [2, 0, 1]);
    }

    #[test]
    fn pixels_are_scaled_to_unit_range() {
        let batcher = ClassificationBatcher::new(4);
        let device = NdArrayDevice::Cpu;

        let batch: ClassificationBatch<NdArray> =
            batcher.batch(vec![item(4, 0, 255)], &device);

        let max: f32 = batch.images.max().into_scalar().elem();
        assert!((max - 1.0).abs() < 1e-6);
    }
}
