//! Running mean and standard deviation of repeated stochastic outputs.

use crate::error::{MlError, Result};
use candle_core::{DType, Device, Shape, Tensor};

/// Element-wise Welford accumulator; samples are folded in and never retained.
#[derive(Debug, Default)]
pub struct MeanStdMetric {
    count: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
    shape: Option<Shape>,
    device: Option<Device>,
}

impl MeanStdMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn update(&mut self, sample: &Tensor) -> Result<()> {
        match &self.shape {
            Some(shape) if shape != sample.shape() => {
                return Err(MlError::evaluation(format!(
                    "sample shape {:?} differs from earlier samples {:?}",
                    sample.dims(),
                    shape.dims()
                )));
            }
            Some(_) => {}
            None => {
                self.shape = Some(sample.shape().clone());
                self.device = Some(sample.device().clone());
                self.mean = vec![0.0; sample.elem_count()];
                self.m2 = vec![0.0; sample.elem_count()];
            }
        }

        let values = sample.flatten_all()?.to_dtype(DType::F64)?.to_vec1::<f64>()?;
        self.count += 1;
        let n = self.count as f64;
        for ((x, mean), m2) in values.iter().zip(&mut self.mean).zip(&mut self.m2) {
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += delta * (x - *mean);
        }
        Ok(())
    }

    /// Mean and sample standard deviation (`n - 1` denominator, `0` for one sample).
    pub fn get(&self) -> Result<(Tensor, Tensor)> {
        let (Some(shape), Some(device)) = (&self.shape, &self.device) else {
            return Err(MlError::evaluation("no samples accumulated"));
        };
        let std: Vec<f32> = if self.count < 2 {
            vec![0.0; self.m2.len()]
        } else {
            let denom = (self.count - 1) as f64;
            self.m2.iter().map(|m2| (m2 / denom).sqrt() as f32).collect()
        };
        let mean: Vec<f32> = self.mean.iter().map(|m| *m as f32).collect();
        Ok((
            Tensor::from_vec(mean, shape.clone(), device)?,
            Tensor::from_vec(std, shape.clone(), device)?,
        ))
    }
}

/// Draw `repeats` samples and return their element-wise mean and std.
pub fn monte_carlo<F>(repeats: usize, mut sample: F) -> Result<(Tensor, Tensor)>
where
    F: FnMut(usize) -> Result<Tensor>,
{
    if repeats == 0 {
        return Err(MlError::config("monte-carlo repeats must be at least 1"));
    }
    let mut metric = MeanStdMetric::new();
    for i in 0..repeats {
        metric.update(&sample(i)?)?;
    }
    metric.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_closed_form() {
        let sequence = [1f32, 2.0, 3.0, 4.0];
        let (mean, std) = monte_carlo(sequence.len(), |i| {
            Ok(Tensor::new(&[sequence[i], -sequence[i] * 2.0], &Device::Cpu)?)
        })
        .unwrap();

        let mean = mean.to_vec1::<f32>().unwrap();
        let std = std.to_vec1::<f32>().unwrap();
        let expected_std = (5f32 / 3.0).sqrt();
        assert!((mean[0] - 2.5).abs() < 1e-6);
        assert!((mean[1] + 5.0).abs() < 1e-6);
        assert!((std[0] - expected_std).abs() < 1e-6);
        assert!((std[1] - 2.0 * expected_std).abs() < 1e-5);
    }

    #[test]
    fn test_single_sample_has_zero_std() {
        let (_, std) =
            monte_carlo(1, |_| Ok(Tensor::new(&[7f32], &Device::Cpu)?)).unwrap();
        assert_eq!(std.to_vec1::<f32>().unwrap(), vec![0.0]);
    }

    #[test]
    fn test_zero_repeats_rejected() {
        assert!(monte_carlo(0, |_| Ok(Tensor::new(&[1f32], &Device::Cpu)?)).is_err());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut metric = MeanStdMetric::new();
        metric.update(&Tensor::new(&[1f32, 2.0], &Device::Cpu).unwrap()).unwrap();
        assert!(metric.update(&Tensor::new(&[1f32], &Device::Cpu).unwrap()).is_err());
        assert!(MeanStdMetric::new().get().is_err());
    }
}
