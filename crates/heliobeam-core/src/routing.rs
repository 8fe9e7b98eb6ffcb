//! Power allocation across GRN demands.
//!
//! A MOR delivers at most `capacity × target_utilization`. When demand is
//! below that, every GRN gets what it asked for; otherwise the deliverable
//! power is split in proportion to demand.

use thiserror::Error;

/// Routing input errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    /// Capacity is zero, negative or not finite
    #[error("capacity must be positive and finite, got {0}")]
    InvalidCapacity(f64),

    /// Utilization target outside (0, 1]
    #[error("target utilization must be in (0, 1], got {0}")]
    InvalidUtilization(f64),

    /// A demand is negative or not finite
    #[error("demand #{index} is invalid: {value}")]
    InvalidDemand {
        /// Position in the input
        index: usize,
        /// Offending value
        value: f64,
    },
}

/// Result of one allocation round.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// Delivered power per demand, same order as the input
    pub delivered_w: Vec<f64>,
    /// Sum of `delivered_w`
    pub total_delivered_w: f64,
    /// `total_delivered_w / capacity`
    pub utilization: f64,
}

/// Proportional power router for one MOR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerRouter {
    capacity_w: f64,
    target_utilization: f64,
}

impl PowerRouter {
    /// Default utilization target.
    pub const DEFAULT_UTILIZATION: f64 = 0.95;

    /// Router for `capacity_w` at the default 95% target.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` unless the capacity is positive and finite.
    pub fn new(capacity_w: f64) -> Result<Self, RoutingError> {
        Self::with_utilization(capacity_w, Self::DEFAULT_UTILIZATION)
    }

    /// Router with an explicit utilization target.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` or `InvalidUtilization`.
    pub fn with_utilization(capacity_w: f64, target_utilization: f64) -> Result<Self, RoutingError> {
        if !(capacity_w.is_finite() && capacity_w > 0.0) {
            return Err(RoutingError::InvalidCapacity(capacity_w));
        }
        if !(target_utilization > 0.0 && target_utilization <= 1.0) {
            return Err(RoutingError::InvalidUtilization(target_utilization));
        }
        Ok(Self { capacity_w, target_utilization })
    }

    /// Maximum deliverable power.
    #[must_use]
    pub fn deliverable_w(&self) -> f64 {
        self.capacity_w * self.target_utilization
    }

    /// Split deliverable power across `demands_w`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDemand` for the first negative or non-finite entry.
    pub fn allocate(&self, demands_w: &[f64]) -> Result<Allocation, RoutingError> {
        if let Some((index, &value)) =
            demands_w.iter().enumerate().find(|(_, d)| !(d.is_finite() && **d >= 0.0))
        {
            return Err(RoutingError::InvalidDemand { index, value });
        }

        let total_demand: f64 = demands_w.iter().sum();
        let target = total_demand.min(self.deliverable_w());
        let scale = if total_demand > 0.0 { target / total_demand } else { 0.0 };

        let delivered_w: Vec<f64> = demands_w.iter().map(|d| d * scale).collect();
        let total_delivered_w = delivered_w.iter().sum();

        Ok(Allocation {
            delivered_w,
            total_delivered_w,
            utilization: total_delivered_w / self.capacity_w,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-6 * b.abs().max(1.0)
    }

    #[test]
    fn oversubscribed_split_is_proportional() {
        let router = PowerRouter::new(2e9).unwrap();
        let demands = vec![30e6; 70];
        let allocation = router.allocate(&demands).unwrap();

        assert!(close(allocation.total_delivered_w, 1.9e9));
        assert!(close(allocation.utilization, 0.95));
        assert!(allocation.delivered_w.iter().all(|d| close(*d, 1.9e9 / 70.0)));
    }

    #[test]
    fn undersubscribed_demand_is_met() {
        let router = PowerRouter::new(2e9).unwrap();
        let allocation = router.allocate(&[1e8, 3e8]).unwrap();

        assert_eq!(allocation.delivered_w, vec![1e8, 3e8]);
        assert!(close(allocation.utilization, 0.2));
    }

    #[test]
    fn no_demand_delivers_nothing() {
        let router = PowerRouter::new(1e6).unwrap();
        let allocation = router.allocate(&[0.0, 0.0]).unwrap();
        assert_eq!(allocation.total_delivered_w, 0.0);
    }

    #[test]
    fn rejects_bad_inputs() {
        assert_eq!(PowerRouter::new(0.0), Err(RoutingError::InvalidCapacity(0.0)));
        assert!(PowerRouter::with_utilization(1.0, 1.5).is_err());

        let router = PowerRouter::new(1e6).unwrap();
        assert!(matches!(
            router.allocate(&[1.0, -2.0]),
            Err(RoutingError::InvalidDemand { index: 1, .. })
        ));
        assert!(router.allocate(&[f64::NAN]).is_err());
    }
}
