//! Message pacing between successive bot messages.

use std::time::Duration;

use async_trait::async_trait;

/// Waits out the pause before a message is shown.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, pace: Duration);
}

/// Real-time pacing, optionally scaled (0.5 = twice as fast).
#[derive(Debug, Clone, Copy)]
pub struct TokioPacer {
    scale: f64,
}

impl TokioPacer {
    pub fn new(scale: f64) -> Self {
        let scale = if scale.is_finite() && scale >= 0.0 {
            scale
        } else {
            1.0
        };
        Self { scale }
    }

    fn scaled(&self, pace: Duration) -> Duration {
        pace.mul_f64(self.scale)
    }
}

impl Default for TokioPacer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, pace: Duration) {
        let pace = self.scaled(pace);
        if !pace.is_zero() {
            tokio::time::sleep(pace).await;
        }
    }
}

/// No pacing at all. Used by tests and when pacing is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantPacer;

#[async_trait]
impl Pacer for InstantPacer {
    async fn pause(&self, _pace: Duration) {}
}
