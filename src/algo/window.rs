use std::collections::VecDeque;

/// Fixed-capacity FIFO of the most recent observed values.
///
/// Values must be finite. Statistics are computed over the whole window,
/// including the value that was just pushed.
#[derive(Clone, Debug)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

/// Mean and z-score of one observation against the window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub std_dev: Option<f64>,
    pub z_score: f64,
}

impl RollingWindow {
    /// `capacity` must be positive; the detector validates this before construction.
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `value`, evicting the oldest once at capacity.
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Unbiased (n - 1) standard deviation around `mean`. `None` below two values.
    pub fn sample_std_dev(&self, mean: f64) -> Option<f64> {
        let n = self.values.len();
        if n < 2 {
            return None;
        }
        let sum_sq: f64 = self
            .values
            .iter()
            .map(|x| {
                let diff = x - mean;
                diff * diff
            })
            .sum();
        Some((sum_sq / (n - 1) as f64).sqrt())
    }

    /// Score `value` against the current window contents.
    ///
    /// Readings near `f64::MAX` overflow the plain sums; those windows are
    /// rescaled into [-1, 1] first so the mean and z-score stay finite.
    pub fn score(&self, value: f64) -> WindowStats {
        let mean = self.mean();
        let std_dev = self.sample_std_dev(mean);
        let z_score = z_score(value, mean, std_dev);

        if mean.is_finite() && std_dev.is_none_or(f64::is_finite) && z_score.is_finite() {
            return WindowStats {
                mean,
                std_dev,
                z_score,
            };
        }
        self.score_rescaled(value)
    }

    fn score_rescaled(&self, value: f64) -> WindowStats {
        let scale = self.values.iter().fold(value.abs(), |acc, x| acc.max(x.abs()));
        let n = self.values.len() as f64;

        let mean = self.values.iter().map(|x| x / scale).sum::<f64>() / n;
        let std_dev = (self.values.len() >= 2).then(|| {
            let sum_sq: f64 = self
                .values
                .iter()
                .map(|x| {
                    let diff = x / scale - mean;
                    diff * diff
                })
                .sum();
            (sum_sq / (n - 1.0)).sqrt()
        });

        WindowStats {
            mean: mean * scale,
            std_dev: std_dev.map(|sd| sd * scale),
            z_score: z_score(value / scale, mean, std_dev),
        }
    }

    /// Push `value` and score it against the updated window.
    pub fn update(&mut self, value: f64) -> WindowStats {
        self.push(value);
        self.score(value)
    }
}

// Degenerate windows (too short or constant) are never distinguishable.
fn z_score(value: f64, mean: f64, std_dev: Option<f64>) -> f64 {
    match std_dev {
        Some(sd) if sd != 0.0 => (value - mean) / sd,
        _ => 0.0,
    }
}
