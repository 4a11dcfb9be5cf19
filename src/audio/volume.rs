//! Volume mixing and timed fades for trackdeck
//!
//! The audible gain of an engine is the product of three independent
//! factors: the caller-set base volume, the fade multiplier driven by
//! timed ramps, and the ducking gain applied on transient focus loss.
//! Fades only ever touch the multiplier, so they cannot clobber a volume
//! the user set while they were running.

use crate::internal_error;
use crate::utils::error::Result;
use log::debug;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};

/// Gain factors of one engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeMix {
    /// Caller-set volume (0.0 to 1.0)
    pub base: f32,
    /// Fade multiplier (0.0 to 1.0)
    pub fade: f32,
    /// Gain applied while ducked
    pub duck_gain: f32,
    pub ducked: bool,
}

impl VolumeMix {
    pub fn new(base: f32, duck_gain: f32) -> Self {
        Self {
            base: base.clamp(0.0, 1.0),
            fade: 1.0,
            duck_gain: duck_gain.clamp(0.0, 1.0),
            ducked: false,
        }
    }

    /// Gain the renderer should output
    pub fn effective(&self) -> f32 {
        let duck = if self.ducked { self.duck_gain } else { 1.0 };
        (self.base * self.fade * duck).clamp(0.0, 1.0)
    }
}

impl Default for VolumeMix {
    fn default() -> Self {
        Self::new(1.0, 0.2)
    }
}

/// Discrete-step linear ramp of the fade multiplier
///
/// With `n = duration / interval` steps of `(target - start) / n`, the ramp
/// applies one step, sleeps one interval, and after `n` steps snaps to
/// `target` exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadePlan {
    pub start: f32,
    pub target: f32,
    pub steps: u32,
    pub delta: f32,
    pub interval: Duration,
}

impl FadePlan {
    pub fn new(start: f32, target: f32, duration: Duration, interval: Duration) -> Self {
        let target = target.clamp(0.0, 1.0);
        let steps = if interval.is_zero() {
            0
        } else {
            (duration.as_millis() / interval.as_millis().max(1)).min(u32::MAX as u128) as u32
        };
        let delta = if steps == 0 { 0.0 } else { (target - start) / steps as f32 };

        Self {
            start,
            target,
            steps,
            delta,
            interval,
        }
    }

    /// Intermediate levels, one per step, before the final snap
    pub fn levels(&self) -> impl Iterator<Item = f32> {
        let delta = self.delta;
        let mut level = self.start;
        (0..self.steps).map(move |_| {
            level = (level + delta).clamp(0.0, 1.0);
            level
        })
    }
}

/// Parameters of one fade
pub struct FadeRequest {
    pub target: f32,
    pub duration: Duration,
    pub interval: Duration,
    /// Published with the completion event when set
    pub tag: Option<String>,
    /// Invoked only when the fade completes, never on cancellation
    pub on_complete: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl FadeRequest {
    pub fn new(target: f32, duration: Duration, interval: Duration) -> Self {
        Self {
            target,
            duration,
            interval,
            tag: None,
            on_complete: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn on_complete<F: FnOnce() + Send + 'static>(mut self, callback: F) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for FadeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FadeRequest")
            .field("target", &self.target)
            .field("duration", &self.duration)
            .field("interval", &self.interval)
            .field("tag", &self.tag)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// The single write path a fade uses to reach its engine
///
/// Every method takes the fade's generation; a write for a generation that
/// is no longer current must be refused, which is what makes cancellation
/// take effect immediately.
pub trait FadeSink: Send + Sync {
    /// Apply an intermediate level; false when the fade was superseded
    fn write_fade_level(&self, generation: u64, level: f32) -> bool;

    /// Snap to the target and retire the fade; false when superseded
    fn finish_fade(&self, generation: u64, target: f32, tag: Option<String>) -> bool;

    /// Retire the fade without touching the level
    fn cancel_fade(&self, generation: u64);
}

/// How a fade ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeOutcome {
    Completed,
    Cancelled,
}

/// Cancellable handle of a running fade
pub struct FadeHandle {
    generation: u64,
    sink: Weak<dyn FadeSink>,
    task: JoinHandle<()>,
    outcome: oneshot::Receiver<FadeOutcome>,
}

impl FadeHandle {
    /// Spawn the step loop of `plan` on the current tokio runtime
    pub fn spawn(sink: Weak<dyn FadeSink>, generation: u64, plan: FadePlan, request: FadeRequest) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| internal_error!("volume fades need a tokio runtime"))?;
        let (tx, rx) = oneshot::channel();
        let task_sink = sink.clone();
        let FadeRequest { tag, on_complete, .. } = request;

        debug!(
            "Fade #{} from {:.3} to {:.3} in {} steps of {:?}",
            generation, plan.start, plan.target, plan.steps, plan.interval
        );

        let task = runtime.spawn(async move {
            for level in plan.levels() {
                match task_sink.upgrade() {
                    Some(sink) if sink.write_fade_level(generation, level) => {}
                    _ => return,
                }
                tokio::time::sleep(plan.interval).await;
            }

            let Some(sink) = task_sink.upgrade() else { return };
            if sink.finish_fade(generation, plan.target, tag) {
                drop(sink);
                if let Some(callback) = on_complete {
                    callback();
                }
                let _ = tx.send(FadeOutcome::Completed);
            }
        });

        Ok(Self {
            generation,
            sink,
            task,
            outcome: rx,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop further writes; levels already applied stay applied
    pub fn cancel(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.cancel_fade(self.generation);
        }
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    /// Wait for the fade to end
    pub async fn finished(self) -> FadeOutcome {
        self.outcome.await.unwrap_or(FadeOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct TestSink {
        state: Mutex<(u64, f32, Vec<f32>)>,
    }

    impl TestSink {
        fn begin(&self) -> u64 {
            let mut state = self.state.lock();
            state.0 += 1;
            state.0
        }

        fn level(&self) -> f32 {
            self.state.lock().1
        }

        fn writes(&self) -> usize {
            self.state.lock().2.len()
        }
    }

    impl FadeSink for TestSink {
        fn write_fade_level(&self, generation: u64, level: f32) -> bool {
            let mut state = self.state.lock();
            if state.0 != generation {
                return false;
            }
            state.1 = level;
            state.2.push(level);
            true
        }

        fn finish_fade(&self, generation: u64, target: f32, _tag: Option<String>) -> bool {
            self.write_fade_level(generation, target)
        }

        fn cancel_fade(&self, generation: u64) {
            let mut state = self.state.lock();
            if state.0 == generation {
                state.0 += 1;
            }
        }
    }

    fn spawn(sink: &Arc<TestSink>, start: f32, request: FadeRequest) -> FadeHandle {
        let generation = sink.begin();
        let plan = FadePlan::new(start, request.target, request.duration, request.interval);
        let weak: Weak<dyn FadeSink> = Arc::downgrade(sink) as Weak<dyn FadeSink>;
        FadeHandle::spawn(weak, generation, plan, request).unwrap()
    }

    #[test]
    fn test_volume_mix() {
        let mut mix = VolumeMix::new(0.8, 0.25);
        assert!((mix.effective() - 0.8).abs() < f32::EPSILON);

        mix.fade = 0.5;
        assert!((mix.effective() - 0.4).abs() < 1e-6);

        mix.ducked = true;
        assert!((mix.effective() - 0.1).abs() < 1e-6);
        assert_eq!(mix.base, 0.8);
    }

    #[test]
    fn test_fade_plan_steps() {
        let plan = FadePlan::new(1.0, 0.0, Duration::from_millis(500), Duration::from_millis(20));
        assert_eq!(plan.steps, 25);
        assert!((plan.delta + 0.04).abs() < 1e-6);

        let levels: Vec<f32> = plan.levels().collect();
        assert_eq!(levels.len(), 25);
        assert!(levels.windows(2).all(|w| w[1] <= w[0]));

        let instant = FadePlan::new(0.3, 0.9, Duration::ZERO, Duration::from_millis(20));
        assert_eq!(instant.steps, 0);
        assert_eq!(instant.levels().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fade_snaps_exactly_to_target() {
        let sink = Arc::new(TestSink::default());
        let handle = spawn(&sink, 0.0, FadeRequest::new(0.7, Duration::from_millis(300), Duration::from_millis(7)));

        assert_eq!(handle.finished().await, FadeOutcome::Completed);
        assert_eq!(sink.level(), 0.7);
        // 42 intermediate steps plus the final snap
        assert_eq!(sink.writes(), 43);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_fade_skips_callback() {
        let sink = Arc::new(TestSink::default());
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();

        let first = spawn(
            &sink,
            1.0,
            FadeRequest::new(0.0, Duration::from_millis(1000), Duration::from_millis(10))
                .on_complete(move || flag.store(true, Ordering::SeqCst)),
        );
        tokio::time::sleep(Duration::from_millis(55)).await;

        let second = spawn(&sink, sink.level(), FadeRequest::new(1.0, Duration::from_millis(100), Duration::from_millis(10)));

        assert_eq!(second.finished().await, FadeOutcome::Completed);
        assert_eq!(first.finished().await, FadeOutcome::Cancelled);
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(sink.level(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_writes_without_rollback() {
        let sink = Arc::new(TestSink::default());
        let handle = spawn(&sink, 1.0, FadeRequest::new(0.0, Duration::from_millis(1000), Duration::from_millis(100)));

        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.cancel();
        let level = sink.level();
        let writes = sink.writes();
        assert!(level < 1.0 && level > 0.0);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(sink.writes(), writes);
        assert_eq!(sink.level(), level);
        assert_eq!(handle.finished().await, FadeOutcome::Cancelled);
    }
}
