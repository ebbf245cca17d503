use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// A source that can end the poll loop.
///
/// The poller observes the signal only between cycles, so an in-flight cycle
/// always runs to completion.
#[async_trait]
pub trait Shutdown: Send + Sync {
    /// This future resolves when a shutdown signal is received.
    async fn wait_for_signal(&mut self);
}

#[derive(Default)]
pub struct CtrlCShutdown;

impl CtrlCShutdown {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Shutdown for CtrlCShutdown {
    async fn wait_for_signal(&mut self) {
        // An error installing the handler is treated like a received signal.
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received, finishing the current cycle");
    }
}

/// Wall-clock budget for the whole run, measured from the first wait.
pub struct DurationBudget {
    duration: Duration,
}

impl DurationBudget {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Shutdown for DurationBudget {
    async fn wait_for_signal(&mut self) {
        info!(
            budget = %humantime::format_duration(self.duration),
            "Run budget started"
        );
        tokio::time::sleep(self.duration).await;
        info!(
            budget = %humantime::format_duration(self.duration),
            "Run budget elapsed"
        );
    }
}

/// Resolves as soon as either handler does.
pub struct CombinedShutdown {
    first: Box<dyn Shutdown>,
    second: Box<dyn Shutdown>,
}

impl CombinedShutdown {
    pub fn new(first: Box<dyn Shutdown>, second: Box<dyn Shutdown>) -> Self {
        Self { first, second }
    }
}

#[async_trait]
impl Shutdown for CombinedShutdown {
    async fn wait_for_signal(&mut self) {
        tokio::select! {
            _ = self.first.wait_for_signal() => {}
            _ = self.second.wait_for_signal() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct Never;

    #[async_trait]
    impl Shutdown for Never {
        async fn wait_for_signal(&mut self) {
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn duration_budget_resolves_after_its_duration() {
        let start = Instant::now();
        let mut budget = DurationBudget::new(Duration::from_millis(20));

        budget.wait_for_signal().await;

        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn combined_shutdown_resolves_with_the_first_signal() {
        let mut combined = CombinedShutdown::new(
            Box::new(Never),
            Box::new(DurationBudget::new(Duration::from_millis(5))),
        );

        let result =
            tokio::time::timeout(Duration::from_secs(5), combined.wait_for_signal()).await;

        assert!(result.is_ok());
    }
}
