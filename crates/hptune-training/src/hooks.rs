//! Training hooks for observing the training loop.
//!
//! Hooks are called by the [`Trainer`](crate::trainer::Trainer) at fixed points
//! of every run: before and after each iteration, around each epoch, and once
//! at the end. They run on the training thread, in registration order, and a
//! hook error aborts the run.

use crate::hpo::HpoError;
use crate::metrics::{Metrics, ACCURACY, LOSS, NLL};
use crate::trainer::EngineState;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

/// Errors that can occur during hook execution.
#[derive(Debug, Error)]
pub enum HookError {
    /// Reporting to the tuning service failed.
    #[error("HPO reporting failed: {0}")]
    Hpo(#[from] HpoError),

    /// A custom hook error.
    #[error("Hook error: {0}")]
    Custom(String),
}

/// Result type for hook operations.
pub type HookResult<T> = Result<T, HookError>;

/// Action to take after a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Continue training normally.
    Continue,
    /// Stop training early.
    Stop,
}

/// Trait for training hooks.
///
/// All methods except [`name`](Hook::name) have no-op defaults.
///
/// # Examples
///
/// ```
/// use hptune_training::hooks::{Hook, HookAction, HookResult};
/// use hptune_training::trainer::EngineState;
///
/// struct StopAfterTwo;
///
/// impl Hook for StopAfterTwo {
///     fn name(&self) -> &str {
///         "stop_after_two"
///     }
///
///     fn after_epoch(&mut self, state: &EngineState) -> HookResult<HookAction> {
///         if state.epoch >= 2 {
///             Ok(HookAction::Stop)
///         } else {
///             Ok(HookAction::Continue)
///         }
///     }
/// }
/// ```
pub trait Hook: Send {
    /// Returns the name of this hook for logging purposes.
    fn name(&self) -> &str;

    /// Called before each epoch, after `state.epoch` has been advanced.
    fn before_epoch(&mut self, _state: &EngineState) -> HookResult<()> {
        Ok(())
    }

    /// Called before each training iteration (1-based).
    fn before_step(&mut self, _iteration: u64) -> HookResult<()> {
        Ok(())
    }

    /// Called after each training iteration with that iteration's metrics.
    fn after_step(&mut self, _iteration: u64, _metrics: &Metrics) -> HookResult<HookAction> {
        Ok(HookAction::Continue)
    }

    /// Called once an epoch has finished and both evaluation passes have run.
    fn after_epoch(&mut self, _state: &EngineState) -> HookResult<HookAction> {
        Ok(HookAction::Continue)
    }

    /// Called at the end of training.
    fn end(&mut self, _state: &EngineState) -> HookResult<()> {
        Ok(())
    }
}

/// Logs the training loss at a fixed iteration interval and the evaluation
/// results after every epoch.
///
/// # Examples
///
/// ```
/// use hptune_training::hooks::LoggingHook;
///
/// // Log every 10 iterations
/// let hook = LoggingHook::new(10);
/// ```
#[derive(Debug)]
pub struct LoggingHook {
    every_n_steps: u64,
}

impl LoggingHook {
    /// Creates a new logging hook that logs every N iterations.
    pub fn new(every_n_steps: u64) -> Self {
        Self {
            every_n_steps: every_n_steps.max(1),
        }
    }

    fn log_results(label: &str, epoch: u64, metrics: &Metrics) {
        match (metrics.get(ACCURACY), metrics.get(NLL)) {
            (Some(acc), Some(nll)) => info!(
                "{} Results - Epoch: {} Avg accuracy: {:.2} Avg loss: {:.2}",
                label, epoch, acc, nll
            ),
            _ => info!("{} Results - Epoch: {} {:?}", label, epoch, metrics.values),
        }
    }
}

impl Hook for LoggingHook {
    fn name(&self) -> &str {
        "logging_hook"
    }

    fn after_step(&mut self, iteration: u64, metrics: &Metrics) -> HookResult<HookAction> {
        if iteration % self.every_n_steps == 0 {
            if let Some(loss) = metrics.get(LOSS) {
                info!("Iteration {}: loss = {:.2}", iteration, loss);
            }
        }
        Ok(HookAction::Continue)
    }

    fn after_epoch(&mut self, state: &EngineState) -> HookResult<HookAction> {
        if let Some(metrics) = &state.train_metrics {
            Self::log_results("Training", state.epoch, metrics);
        }
        if let Some(metrics) = &state.eval_metrics {
            Self::log_results("Validation", state.epoch, metrics);
        }
        Ok(HookAction::Continue)
    }

    fn end(&mut self, state: &EngineState) -> HookResult<()> {
        match state.epoch_loss {
            Some(loss) => info!(
                "Training finished after {} epochs ({} iterations): final epoch loss = {:.6}",
                state.epoch, state.iteration, loss
            ),
            None => info!("Training finished after {} epochs", state.epoch),
        }
        Ok(())
    }
}

/// Measures wall-clock time per epoch and for the whole run.
#[derive(Debug, Default)]
pub struct TimerHook {
    run_started: Option<Instant>,
    epoch_started: Option<Instant>,
    epoch_durations: Vec<Duration>,
    total: Option<Duration>,
}

impl TimerHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durations of the completed epochs, in order.
    pub fn epoch_durations(&self) -> &[Duration] {
        &self.epoch_durations
    }

    /// Total run duration, available once the run has ended.
    pub fn total(&self) -> Option<Duration> {
        self.total
    }
}

impl Hook for TimerHook {
    fn name(&self) -> &str {
        "timer_hook"
    }

    fn before_epoch(&mut self, _state: &EngineState) -> HookResult<()> {
        let now = Instant::now();
        self.run_started.get_or_insert(now);
        self.epoch_started = Some(now);
        Ok(())
    }

    fn after_epoch(&mut self, state: &EngineState) -> HookResult<HookAction> {
        if let Some(started) = self.epoch_started.take() {
            let elapsed = started.elapsed();
            self.epoch_durations.push(elapsed);
            info!(
                "Epoch {} took {:.3} seconds",
                state.epoch,
                elapsed.as_secs_f64()
            );
        }
        Ok(HookAction::Continue)
    }

    fn end(&mut self, _state: &EngineState) -> HookResult<()> {
        if let Some(started) = self.run_started {
            let total = started.elapsed();
            self.total = Some(total);
            info!("Training took {:.3} seconds", total.as_secs_f64());
        }
        Ok(())
    }
}

/// A collection of hooks that are called in sequence.
#[derive(Default)]
pub struct HookList {
    hooks: Vec<Box<dyn Hook>>,
}

impl std::fmt::Debug for HookList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| h.name()))
            .finish()
    }
}

impl HookList {
    /// Creates a new empty hook list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hook to the list.
    pub fn add<H: Hook + 'static>(&mut self, hook: H) {
        self.hooks.push(Box::new(hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs `before_epoch` on all hooks.
    pub fn before_epoch(&mut self, state: &EngineState) -> HookResult<()> {
        for hook in &mut self.hooks {
            hook.before_epoch(state)?;
        }
        Ok(())
    }

    /// Runs `before_step` on all hooks.
    pub fn before_step(&mut self, iteration: u64) -> HookResult<()> {
        for hook in &mut self.hooks {
            hook.before_step(iteration)?;
        }
        Ok(())
    }

    /// Runs `after_step` on all hooks.
    ///
    /// Returns `HookAction::Stop` if any hook requests stopping.
    pub fn after_step(&mut self, iteration: u64, metrics: &Metrics) -> HookResult<HookAction> {
        for hook in &mut self.hooks {
            if hook.after_step(iteration, metrics)? == HookAction::Stop {
                return Ok(HookAction::Stop);
            }
        }
        Ok(HookAction::Continue)
    }

    /// Runs `after_epoch` on every hook, even after one has requested a stop,
    /// so that epoch-level reporting is never skipped.
    ///
    /// Returns `HookAction::Stop` if any hook requests stopping.
    pub fn after_epoch(&mut self, state: &EngineState) -> HookResult<HookAction> {
        let mut action = HookAction::Continue;
        for hook in &mut self.hooks {
            if hook.after_epoch(state)? == HookAction::Stop {
                action = HookAction::Stop;
            }
        }
        Ok(action)
    }

    /// Runs `end` on all hooks.
    pub fn end(&mut self, state: &EngineState) -> HookResult<()> {
        for hook in &mut self.hooks {
            hook.end(state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct CountingHook {
        epochs: Arc<AtomicU64>,
        stop_at: Option<u64>,
    }

    impl Hook for CountingHook {
        fn name(&self) -> &str {
            "counting_hook"
        }

        fn after_epoch(&mut self, state: &EngineState) -> HookResult<HookAction> {
            self.epochs.fetch_add(1, Ordering::SeqCst);
            match self.stop_at {
                Some(epoch) if state.epoch >= epoch => Ok(HookAction::Stop),
                _ => Ok(HookAction::Continue),
            }
        }
    }

    struct FailingHook;

    impl Hook for FailingHook {
        fn name(&self) -> &str {
            "failing_hook"
        }

        fn before_step(&mut self, _iteration: u64) -> HookResult<()> {
            Err(HookError::Custom("boom".to_string()))
        }
    }

    fn state_at(epoch: u64) -> EngineState {
        EngineState {
            epoch,
            ..EngineState::default()
        }
    }

    #[test]
    fn test_logging_hook() {
        let mut hook = LoggingHook::new(10);
        let metrics = Metrics::new(10).with(LOSS, 0.5);
        assert_eq!(hook.after_step(10, &metrics).unwrap(), HookAction::Continue);
        assert_eq!(hook.after_step(11, &metrics).unwrap(), HookAction::Continue);

        let mut state = state_at(1);
        state.eval_metrics = Some(Metrics::new(1).with(ACCURACY, 0.9).with(NLL, 0.3));
        assert_eq!(hook.after_epoch(&state).unwrap(), HookAction::Continue);
        assert!(hook.end(&state).is_ok());
    }

    #[test]
    fn test_logging_hook_interval_floor() {
        let mut hook = LoggingHook::new(0);
        assert_eq!(hook.every_n_steps, 1);
        let metrics = Metrics::new(1).with(LOSS, 0.5);
        assert_eq!(hook.after_step(1, &metrics).unwrap(), HookAction::Continue);
    }

    #[test]
    fn test_timer_hook_records_epochs() {
        let mut hook = TimerHook::new();
        for epoch in 1..=2 {
            let state = state_at(epoch);
            hook.before_epoch(&state).unwrap();
            hook.after_epoch(&state).unwrap();
        }
        hook.end(&state_at(2)).unwrap();

        assert_eq!(hook.epoch_durations().len(), 2);
        let total = hook.total().unwrap();
        assert!(total >= hook.epoch_durations()[0]);
    }

    #[test]
    fn test_hook_list_after_epoch_runs_every_hook() {
        let first = Arc::new(AtomicU64::new(0));
        let second = Arc::new(AtomicU64::new(0));
        let mut hooks = HookList::new();
        hooks.add(CountingHook {
            epochs: first.clone(),
            stop_at: Some(1),
        });
        hooks.add(CountingHook {
            epochs: second.clone(),
            stop_at: None,
        });

        assert_eq!(hooks.after_epoch(&state_at(1)).unwrap(), HookAction::Stop);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hook_list_propagates_errors() {
        let mut hooks = HookList::new();
        hooks.add(LoggingHook::new(1));
        hooks.add(FailingHook);
        assert_eq!(hooks.len(), 2);

        let err = hooks.before_step(1).unwrap_err();
        assert!(matches!(err, HookError::Custom(msg) if msg == "boom"));
    }

    #[test]
    fn test_hook_list_debug_lists_names() {
        let mut hooks = HookList::new();
        hooks.add(LoggingHook::new(1));
        hooks.add(TimerHook::new());
        assert_eq!(format!("{hooks:?}"), r#"["logging_hook", "timer_hook"]"#);
    }
}
