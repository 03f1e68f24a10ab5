use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Shared flag telling connection admission whether the state subscription is healthy.
///
/// Written by the state listener, read when a new connection arrives.
/// Existing connections never look at it.
#[derive(Debug, Clone)]
pub struct HealthFlag(Arc<AtomicBool>);

impl HealthFlag {
    /// Create a flag with the given initial value.
    pub fn new(healthy: bool) -> Self {
        Self(Arc::new(AtomicBool::new(healthy)))
    }

    /// Whether new connections may be admitted.
    pub fn is_healthy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Store `healthy`, returning `true` when the value changed.
    pub fn set(&self, healthy: bool) -> bool {
        self.0.swap(healthy, Ordering::AcqRel) != healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_transitions_only() {
        let flag = HealthFlag::new(false);
        let shared = flag.clone();
        assert!(shared.set(true));
        assert!(flag.is_healthy());
        assert!(!shared.set(true));
        assert!(flag.set(false));
        assert!(!shared.is_healthy());
    }
}
