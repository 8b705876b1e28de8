use crate::state::ClassLabels;
use ndarray::{Array3, Array4, ArrayView1, Axis};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,
    #[error("unrecognised image format: {0}")]
    Format(std::io::Error),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("decoded pixels do not fit the image dimensions: {0}")]
    Layout(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum ClassifyError {
    #[error("model returned an empty score vector")]
    NoScores,
    #[error("predicted index {index} has no label ({labels} labels configured)")]
    UnknownClass { index: usize, labels: usize },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Prediction {
    pub class: String,
    pub confidence: f32,
}

/// Decodes an uploaded file into `height x width x channels` pixels.
///
/// The channel count follows the encoded color type; deeper formats are
/// reduced to 8 bits per channel. Images whose decoded buffer would exceed
/// `max_decoded_bytes` are rejected before allocation.
pub fn decode_image(bytes: &[u8], max_decoded_bytes: u64) -> Result<Array3<u8>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut limits = image::Limits::default();
    limits.max_alloc = Some(max_decoded_bytes);

    let mut reader = image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(DecodeError::Format)?;
    reader.limits(limits);
    let image = reader.decode()?;

    let (width, height) = (image.width() as usize, image.height() as usize);
    let (raw, channels) = match image.color().channel_count() {
        1 => (image.to_luma8().into_raw(), 1),
        2 => (image.to_luma_alpha8().into_raw(), 2),
        3 => (image.to_rgb8().into_raw(), 3),
        _ => (image.to_rgba8().into_raw(), 4),
    };

    Array3::from_shape_vec((height, width, channels), raw)
        .map_err(|e| DecodeError::Layout(e.to_string()))
}

/// Adds the leading batch axis the model expects, keeping raw pixel values.
pub fn to_batch(pixels: Array3<u8>) -> Array4<f32> {
    pixels.mapv(f32::from).insert_axis(Axis(0))
}

/// Index and value of the highest score. The lowest index wins ties and
/// NaN never wins.
pub fn argmax(scores: ArrayView1<f32>) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .fold(None, |best, (index, score)| match best {
            Some((_, best_score)) if score <= best_score => best,
            _ => Some((index, score)),
        })
}

pub fn classify(scores: ArrayView1<f32>, labels: &ClassLabels) -> Result<Prediction, ClassifyError> {
    let (index, confidence) = argmax(scores).ok_or(ClassifyError::NoScores)?;
    let class = labels.get(index).ok_or(ClassifyError::UnknownClass {
        index,
        labels: labels.len(),
    })?;

    Ok(Prediction {
        class: class.to_string(),
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb, Rgba};
    use ndarray::array;
    use std::io::Cursor;

    const DECODE_LIMIT: u64 = 64 * 1024 * 1024;

    fn potato_labels() -> ClassLabels {
        ClassLabels::new(
            3,
            "3.onnx",
            vec![
                "Early Blight".to_string(),
                "Late Blight".to_string(),
                "Healthy".to_string(),
            ],
        )
        .unwrap()
    }

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        image.write_to(&mut cursor, format).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_decode_rgb_png() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_fn(4, 2, |x, y| {
            Rgb([x as u8 * 10, y as u8 * 100, 7])
        });
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let pixels = decode_image(&bytes, DECODE_LIMIT).unwrap();

        assert_eq!(pixels.shape(), &[2, 4, 3]);
        assert_eq!(pixels[[1, 3, 0]], 30);
        assert_eq!(pixels[[1, 3, 1]], 100);
        assert_eq!(pixels[[1, 3, 2]], 7);
    }

    #[test]
    fn test_decode_keeps_channel_count() {
        let gray = ImageBuffer::<Luma<u8>, Vec<u8>>::from_pixel(5, 5, Luma([9]));
        let rgba = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_pixel(5, 5, Rgba([1, 2, 3, 4]));

        let gray = encode(DynamicImage::ImageLuma8(gray), ImageFormat::Png);
        let rgba = encode(DynamicImage::ImageRgba8(rgba), ImageFormat::Png);

        let gray = decode_image(&gray, DECODE_LIMIT).unwrap();
        let rgba = decode_image(&rgba, DECODE_LIMIT).unwrap();

        assert_eq!(gray.shape(), &[5, 5, 1]);
        assert_eq!(rgba.shape(), &[5, 5, 4]);
        assert_eq!(rgba[[0, 0, 3]], 4);
    }

    #[test]
    fn test_decode_jpeg() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(16, 8, Rgb([120, 200, 40]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg);

        assert_eq!(decode_image(&bytes, DECODE_LIMIT).unwrap().shape(), &[8, 16, 3]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_image(&[], DECODE_LIMIT), Err(DecodeError::Empty)));
        assert!(decode_image(b"definitely not an image", DECODE_LIMIT).is_err());
        // Valid PNG signature followed by nothing.
        let signature_only = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert!(decode_image(&signature_only, DECODE_LIMIT).is_err());
    }

    #[test]
    fn test_decode_respects_allocation_limit() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(256, 256, Rgb([30, 160, 40]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        assert!(matches!(
            decode_image(&bytes, 1024),
            Err(DecodeError::Decode(image::ImageError::Limits(_)))
        ));
        assert_eq!(
            decode_image(&bytes, 1024 * 1024).unwrap().shape(),
            &[256, 256, 3]
        );
    }

    #[test]
    fn test_to_batch() {
        let pixels = Array3::<u8>::from_elem((256, 256, 3), 255);

        let batch = to_batch(pixels);

        assert_eq!(batch.shape(), &[1, 256, 256, 3]);
        assert_eq!(batch[[0, 10, 20, 2]], 255.0);
    }

    #[test]
    fn test_argmax_ties_and_nan() {
        assert_eq!(argmax(array![0.5, 0.5, 0.0].view()), Some((0, 0.5)));
        assert_eq!(argmax(array![0.1, 0.7, 0.7].view()), Some((1, 0.7)));
        assert_eq!(argmax(array![f32::NAN, 0.2, 0.1].view()), Some((1, 0.2)));
        assert_eq!(argmax(array![f32::NAN].view()), None);
        assert_eq!(argmax(ndarray::Array1::<f32>::zeros(0).view()), None);
    }

    #[test]
    fn test_classify() {
        let labels = potato_labels();

        let healthy = classify(array![0.05, 0.03, 0.92].view(), &labels).unwrap();
        assert_eq!(healthy.class, "Healthy");
        assert_eq!(healthy.confidence, 0.92);

        let tie = classify(array![0.5, 0.5, 0.0].view(), &labels).unwrap();
        assert_eq!(tie.class, "Early Blight");
        assert_eq!(tie.confidence, 0.5);
    }

    #[test]
    fn test_classify_errors() {
        let labels = potato_labels();

        assert_eq!(
            classify(ndarray::Array1::<f32>::zeros(0).view(), &labels),
            Err(ClassifyError::NoScores)
        );
        assert_eq!(
            classify(array![0.1, 0.1, 0.1, 0.7].view(), &labels),
            Err(ClassifyError::UnknownClass {
                index: 3,
                labels: 3
            })
        );
    }
}
