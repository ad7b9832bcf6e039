//! Sliding window of the most recent finalized bars

use std::collections::VecDeque;

use crate::bars::Bar;

/// Fixed-capacity FIFO of CVD, close and volume for the last K bars.
///
/// The oldest entry is evicted once capacity is reached; the window is never
/// cleared during a run.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    cvd: VecDeque<f64>,
    closes: VecDeque<f64>,
    volumes: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cvd: VecDeque::with_capacity(capacity + 1),
            closes: VecDeque::with_capacity(capacity + 1),
            volumes: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn push_bar(&mut self, bar: &Bar) {
        self.push(bar.cvd as f64, bar.close, bar.volume as f64);
    }

    pub fn push(&mut self, cvd: f64, close: f64, volume: f64) {
        self.cvd.push_back(cvd);
        self.closes.push_back(close);
        self.volumes.push_back(volume);
        if self.cvd.len() > self.capacity {
            self.cvd.pop_front();
            self.closes.pop_front();
            self.volumes.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.cvd.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cvd.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.cvd.len() == self.capacity
    }

    /// CVD values, oldest first
    pub fn cvd(&self) -> Vec<f64> {
        self.cvd.iter().copied().collect()
    }

    pub fn closes(&self) -> &VecDeque<f64> {
        &self.closes
    }

    pub fn volumes(&self) -> &VecDeque<f64> {
        &self.volumes
    }

    /// Most recent close
    pub fn last_close(&self) -> Option<f64> {
        self.closes.back().copied()
    }

    pub fn last_volume(&self) -> Option<f64> {
        self.volumes.back().copied()
    }

    /// Closes before the most recent one
    pub fn prior_closes(&self) -> impl Iterator<Item = f64> + '_ {
        let n = self.closes.len().saturating_sub(1);
        self.closes.iter().take(n).copied()
    }

    /// Volumes before the most recent one
    pub fn prior_volumes(&self) -> impl Iterator<Item = f64> + '_ {
        let n = self.volumes.len().saturating_sub(1);
        self.volumes.iter().take(n).copied()
    }

    pub fn min_close(&self) -> Option<f64> {
        self.closes.iter().copied().reduce(f64::min)
    }

    pub fn max_close(&self) -> Option<f64> {
        self.closes.iter().copied().reduce(f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut window = RollingWindow::new(3);
        for i in 0..5 {
            window.push(i as f64, 100.0 + i as f64, 10.0);
        }
        assert!(window.is_full());
        assert_eq!(window.cvd(), vec![2.0, 3.0, 4.0]);
        assert_eq!(window.last_close(), Some(104.0));
        assert_eq!(window.prior_closes().collect::<Vec<_>>(), vec![102.0, 103.0]);
        assert_eq!(window.min_close(), Some(102.0));
        assert_eq!(window.max_close(), Some(104.0));
    }

    #[test]
    fn test_not_full_until_capacity() {
        let mut window = RollingWindow::new(5);
        window.push(1.0, 1.0, 1.0);
        assert_eq!(window.len(), 1);
        assert!(!window.is_full());
        assert_eq!(window.prior_volumes().count(), 0);
    }
}
