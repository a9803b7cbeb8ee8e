//! Order statistics over deviation columns.

/// Sorted, NaN-free sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    sorted: Vec<f64>,
}

impl Sample {
    /// Collect the non-NaN values and sort them.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut sorted: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
        sorted.sort_by(f64::total_cmp);
        Self { sorted }
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Percentile `p` in 0..=100, linearly interpolated between the two
    /// closest ranks (`rank = p/100 * (n-1)`). `None` for an empty sample.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let n = self.sorted.len();
        if n == 0 {
            return None;
        }
        let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        if lo == hi {
            return Some(self.sorted[lo]);
        }
        let (a, b) = (self.sorted[lo], self.sorted[hi]);
        let t = rank - lo as f64;
        // Clamp keeps rounding from stepping past the next rank.
        Some((a + (b - a) * t).clamp(a, b))
    }

    /// (Q1, Q3).
    pub fn quartiles(&self) -> Option<(f64, f64)> {
        Some((self.percentile(25.0)?, self.percentile(75.0)?))
    }

    /// Tukey fences: (Q1 - k*IQR, Q3 + k*IQR).
    pub fn tukey_fences(&self, k: f64) -> Option<(f64, f64)> {
        let (q1, q3) = self.quartiles()?;
        let iqr = q3 - q1;
        Some((q1 - k * iqr, q3 + k * iqr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn drops_nan_and_sorts() {
        let s = Sample::from_values([3.0, f64::NAN, 1.0, 2.0]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.percentile(0.0), Some(1.0));
        assert_eq!(s.percentile(100.0), Some(3.0));
    }

    #[test]
    fn linear_interpolation() {
        // 1..=10: rank for p=95 is 8.55 -> 9 + 0.55 * (10 - 9)
        let s = Sample::from_values((1..=10).map(f64::from));
        assert!(approx(s.percentile(95.0).unwrap(), 9.55));
        assert!(approx(s.percentile(50.0).unwrap(), 5.5));
        assert!(approx(s.percentile(2.5).unwrap(), 1.225));
    }

    #[test]
    fn quartiles_and_fences() {
        let s = Sample::from_values([1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(s.quartiles(), Some((2.0, 4.0)));
        assert_eq!(s.tukey_fences(1.5), Some((-1.0, 7.0)));
    }

    #[test]
    fn empty_sample() {
        let s = Sample::from_values([f64::NAN]);
        assert!(s.is_empty());
        assert_eq!(s.percentile(50.0), None);
        assert_eq!(s.tukey_fences(1.5), None);
    }

    #[test]
    fn single_value() {
        let s = Sample::from_values([4.0]);
        assert_eq!(s.percentile(95.0), Some(4.0));
        assert_eq!(s.quartiles(), Some((4.0, 4.0)));
    }
}
