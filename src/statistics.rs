/// Running aggregate over every heart rate decoded in a session.
///
/// `max`/`min` are only meaningful once at least one value was seen,
/// which is why they are exposed as `Option`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    count: u64,
    sum: u64,
    max: u16,
    min: u16,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: u16) {
        if self.count == 0 {
            self.max = value;
            self.min = value;
        } else {
            self.max = self.max.max(value);
            self.min = self.min.min(value);
        }
        self.count += 1;
        self.sum += u64::from(value);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn max(&self) -> Option<u16> {
        (!self.is_empty()).then_some(self.max)
    }

    pub fn min(&self) -> Option<u16> {
        (!self.is_empty()).then_some(self.min)
    }

    pub fn mean(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.sum as f64 / self.count as f64)
    }
}
