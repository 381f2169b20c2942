use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};

/// Converts a device string to a Candle Device.
///
/// # Supported Device Strings
///
/// - `"cpu"`: Returns the CPU device
/// - `"cuda"`: Returns the default CUDA device (index 0)
/// - `"cuda:N"`: Returns the CUDA device with the specified index
///
/// # Errors
///
/// Returns an error if the requested CUDA device is not available or the
/// device string is not recognized.
pub fn get_device(device_str: &str) -> Result<Device> {
    if device_str.starts_with("cuda") {
        let cuda_index = if device_str == "cuda" {
            0
        } else {
            device_str
                .split(':')
                .nth(1)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        };

        let device = Device::cuda_if_available(cuda_index)?;
        if !device.is_cuda() {
            return Err(anyhow!("CUDA device {} is not available", cuda_index));
        }
        Ok(device)
    } else {
        match device_str {
            "cpu" => Ok(Device::Cpu),
            _ => Err(anyhow!("Unsupported device type: {}", device_str)),
        }
    }
}

/// Mean, min and max of a tensor, for diagnostics.
pub fn get_tensor_stats(tensor: &Tensor) -> Result<(f32, f32, f32)> {
    let flat = tensor.flatten_all()?.to_dtype(candle_core::DType::F32)?;
    let values = flat.to_vec1::<f32>()?;
    if values.is_empty() {
        return Ok((f32::NAN, f32::NAN, f32::NAN));
    }
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0f64;
    for &v in &values {
        min = min.min(v);
        max = max.max(v);
        sum += v as f64;
    }
    Ok(((sum / values.len() as f64) as f32, min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_device_resolves() {
        assert!(get_device("cpu").is_ok());
    }

    #[test]
    fn unknown_device_errors() {
        assert!(get_device("tpu").is_err());
    }

    #[test]
    fn tensor_stats() {
        let device = Device::Cpu;
        let t = Tensor::new(&[1.0f32, 2.0, 3.0], &device).unwrap();
        let (mean, min, max) = get_tensor_stats(&t).unwrap();
        assert!((mean - 2.0).abs() < 1e-6);
        assert_eq!(min, 1.0);
        assert_eq!(max, 3.0);
    }
}
