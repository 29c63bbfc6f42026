//! uint8 embedding quantization for compact BLOB storage.

use ndarray::Array1;

/// Quantize a float32 embedding into uint8 bytes plus scale/offset.
/// Linear map [min, max] → [0, 255]; original ≈ byte * scale + offset.
pub fn quantize(embedding: &Array1<f32>) -> (Vec<u8>, f32, f32) {
    let min = embedding.iter().copied().fold(f32::INFINITY, f32::min);
    let max = embedding.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let range = max - min;
    if range < 1e-9 {
        return (vec![0u8; embedding.len()], 0.0, min);
    }

    let scale = range / 255.0;
    let bytes = embedding
        .iter()
        .map(|&v| ((v - min) / scale).round().clamp(0.0, 255.0) as u8)
        .collect();

    (bytes, scale, min)
}

/// Reconstruct a float32 embedding from quantized bytes.
pub fn dequantize(bytes: &[u8], scale: f32, offset: f32) -> Array1<f32> {
    Array1::from_iter(bytes.iter().map(|&b| b as f32 * scale + offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_roundtrip_accuracy() {
        let original = array![0.2, -0.7, 0.05, 0.9, -0.33];
        let (bytes, scale, offset) = quantize(&original);
        let restored = dequantize(&bytes, scale, offset);
        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 0.01);
        }
    }

    #[test]
    fn test_constant_vector() {
        let (bytes, scale, offset) = quantize(&array![0.4, 0.4, 0.4]);
        assert_eq!(scale, 0.0);
        assert_eq!(offset, 0.4);
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
