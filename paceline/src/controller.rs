//! Rate controller: steers the inter-transaction delay onto a target TPS.
//!
//! Workers sleep for the shared delay after every transaction. Every `period`
//! (100 ms) the controller samples the transaction counter, extrapolates the
//! sample to a per-second rate and nudges the delay:
//!
//! ```text
//! above target * 1.01:  ratio = tps / target   delay += step(ratio)
//! below target * 0.99:  ratio = target / tps   delay -= min(step(ratio), delay)
//! otherwise:            unchanged
//!
//! step(ratio) = 10 * ratio^f + f * 10 * ratio          (microseconds)
//! ```
//!
//! `f` is the slow-start factor (1.6 by default). The farther the rate is from
//! the target, the larger the step, super-linearly; close to the target the step
//! shrinks to a few tens of microseconds. There is no integral or derivative
//! term: the controller relies on the ±1% band to stop moving once it is
//! close enough.
//!
//! The arithmetic lives in [`next_delay`] and [`RateController::tick`] so it can
//! be exercised without timers; [`rate_controller_task`] is the timed loop that
//! also emits the periodic status line and the final summary.
use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{pacing::PacingState, signal::StopSignal};

/// Sampling period of the controller.
pub const CONTROL_PERIOD: Duration = Duration::from_millis(100);

/// Relative half-width of the band in which the delay is left alone.
pub const TOLERANCE: f64 = 0.01;

/// Delay change, in microseconds, for a given deviation ratio (always >= 1).
pub fn step_us(ratio: f64, slow_start_factor: f64) -> f64 {
    10.0 * ratio.powf(slow_start_factor) + slow_start_factor * 10.0 * ratio
}

/// Pure controller step: the delay to use after observing `current_tps`.
///
/// `target_tps == 0` means "no target" and leaves the delay untouched. The
/// result never underflows: a decrease is clamped to the current delay.
pub fn next_delay(current_tps: f64, target_tps: f64, slow_start_factor: f64, delay_us: u64) -> u64 {
    if target_tps <= 0.0 {
        return delay_us;
    }
    if current_tps > target_tps * (1.0 + TOLERANCE) {
        let step = step_us(current_tps / target_tps, slow_start_factor);
        delay_us.saturating_add(step as u64)
    } else if current_tps < target_tps * (1.0 - TOLERANCE) {
        // An idle sample makes the ratio infinite; the clamp takes the delay to 0.
        let ratio = if current_tps > 0.0 {
            target_tps / current_tps
        } else {
            f64::INFINITY
        };
        let step = step_us(ratio, slow_start_factor).min(delay_us as f64);
        delay_us - (step as u64).min(delay_us)
    } else {
        delay_us
    }
}

/// Rates observed during one controller period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub tps: f64,
    pub qps: f64,
    pub transactions: u64,
    pub statements: u64,
    pub delay_us: u64,
}

/// Feedback state carried between ticks.
#[derive(Debug, Clone)]
pub struct RateController {
    target_tps: f64,
    slow_start_factor: f64,
    period: Duration,
    prev_transactions: u64,
    prev_statements: u64,
}

impl RateController {
    pub fn new(target_tps: f64, slow_start_factor: f64) -> Self {
        Self::with_period(target_tps, slow_start_factor, CONTROL_PERIOD)
    }

    pub fn with_period(target_tps: f64, slow_start_factor: f64, period: Duration) -> Self {
        Self {
            target_tps,
            slow_start_factor,
            period,
            prev_transactions: 0,
            prev_statements: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Samples the counters, adjusts the shared delay and returns what was seen.
    pub fn tick(&mut self, pacing: &PacingState) -> Sample {
        let transactions = pacing.transactions();
        let statements = pacing.statements();
        let per_second = 1e9 / self.period.as_nanos() as f64;

        let tps = transactions.saturating_sub(self.prev_transactions) as f64 * per_second;
        let qps = statements.saturating_sub(self.prev_statements) as f64 * per_second;

        let mut delay_us = pacing.delay_us();
        if self.target_tps > 0.0 {
            delay_us = next_delay(tps, self.target_tps, self.slow_start_factor, delay_us);
            pacing.set_delay_us(delay_us);
        }

        self.prev_transactions = transactions;
        self.prev_statements = statements;
        Sample {
            tps,
            qps,
            transactions,
            statements,
            delay_us,
        }
    }
}

/// Whole-run averages, computed when the stop signal is observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub transactions: u64,
    pub statements: u64,
    pub average_tps: f64,
    pub average_qps: f64,
    pub final_delay: Duration,
}

impl RunSummary {
    pub fn capture(pacing: &PacingState, elapsed: Duration) -> Self {
        let transactions = pacing.transactions();
        let statements = pacing.statements();
        let secs = elapsed.as_secs_f64();
        let per_second = |n: u64| if secs > 0.0 { n as f64 / secs } else { 0.0 };
        Self {
            elapsed,
            transactions,
            statements,
            average_tps: per_second(transactions),
            average_qps: per_second(statements),
            final_delay: pacing.delay(),
        }
    }
}

/// Settings of the timed controller loop.
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub report_interval: Duration,
    /// Planned test length, used to print the remaining time.
    pub duration: Option<Duration>,
    pub clients: usize,
}

/// Runs the controller until `stop` fires and returns the run's summary.
///
/// `started` is the instant measuring began; averages are taken over the wall
/// clock since then.
pub async fn rate_controller_task(
    mut controller: RateController,
    pacing: Arc<PacingState>,
    settings: ControllerSettings,
    started: Instant,
    mut stop: StopSignal,
) -> RunSummary {
    let period = controller.period();
    let report_every = (settings.report_interval.as_nanos() / period.as_nanos().max(1)).max(1);
    let mut next_tick = started;

    // The first sample is taken one full period after `started`: a tick at
    // zero elapsed time would read as an idle target and drop the delay to 0.
    for i in 1u128.. {
        next_tick += period;
        tokio::select! {
            biased;
            _ = stop.triggered() => break,
            _ = tokio::time::sleep_until(next_tick) => {}
        }

        let sample = controller.tick(&pacing);
        if i % report_every == 0 {
            log_status(&sample, &settings, started.elapsed());
        }
    }

    let summary = RunSummary::capture(&pacing, started.elapsed());
    tracing::info!(
        "End test - Clients: {} - Elapsed: {:?} - Average TPS: {:.0} - Average QPS: {:.0}",
        settings.clients,
        summary.elapsed,
        summary.average_tps,
        summary.average_qps,
    );
    summary
}

fn log_status(sample: &Sample, settings: &ControllerSettings, elapsed: Duration) {
    let delay = Duration::from_micros(sample.delay_us);
    match settings.duration {
        Some(duration) => tracing::info!(
            "TPS: {:.0} QPS: {:.0} Xact: {} Queries: {} Delay: {:?} Remaining: {:.0}s",
            sample.tps,
            sample.qps,
            sample.transactions,
            sample.statements,
            delay,
            duration.saturating_sub(elapsed).as_secs_f64(),
        ),
        None => tracing::info!(
            "TPS: {:.0} QPS: {:.0} Xact: {} Queries: {} Delay: {:?} Test duration: {:.0}s",
            sample.tps,
            sample.qps,
            sample.transactions,
            sample.statements,
            delay,
            elapsed.as_secs_f64(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pacing::Window, signal::StopReason};

    const FACTOR: f64 = 1.6;

    mod next_delay {
        use super::*;
        use proptest::prelude::*;

        #[test]
        fn no_target_never_adjusts() {
            assert_eq!(next_delay(5_000.0, 0.0, FACTOR, 1_234), 1_234);
            assert_eq!(next_delay(0.0, 0.0, FACTOR, 0), 0);
        }

        #[test]
        fn inside_band_is_unchanged() {
            for tps in [990.0, 995.0, 1_000.0, 1_005.0, 1_010.0] {
                assert_eq!(next_delay(tps, 1_000.0, FACTOR, 5_000), 5_000, "tps {tps}");
            }
        }

        #[test]
        fn above_target_grows_by_the_step_formula() {
            // ratio 2: 10 * 2^1.6 + 1.6 * 10 * 2 = 30.31 + 32 = 62.31
            assert_eq!(next_delay(2_000.0, 1_000.0, FACTOR, 1_000), 1_062);
            // ratio 1.02: just outside the band, the step is close to its floor
            assert_eq!(next_delay(1_020.0, 1_000.0, FACTOR, 1_000), 1_026);
        }

        #[test]
        fn below_target_shrinks_by_the_step_formula() {
            assert_eq!(next_delay(500.0, 1_000.0, FACTOR, 1_000), 938);
        }

        #[test]
        fn decrease_is_clamped_to_zero() {
            assert_eq!(next_delay(1.0, 1_000.0, FACTOR, 50), 0);
            assert_eq!(next_delay(0.0, 1_000.0, FACTOR, 10_000), 0);
            assert_eq!(next_delay(0.0, 1_000.0, FACTOR, 0), 0);
        }

        #[test]
        fn larger_factor_reacts_harder_far_from_target() {
            let gentle = next_delay(10_000.0, 1_000.0, 1.2, 0);
            let steep = next_delay(10_000.0, 1_000.0, 2.0, 0);
            assert!(steep > gentle, "{steep} <= {gentle}");
        }

        proptest! {
            #[test]
            fn never_below_zero_and_moves_the_right_way(
                tps in 0.0f64..1e6,
                target in 1.0f64..1e5,
                factor in 0.5f64..3.0,
                delay in 0u64..10_000_000,
            ) {
                let next = next_delay(tps, target, factor, delay);
                if tps > target * (1.0 + TOLERANCE) {
                    prop_assert!(next > delay);
                } else if tps < target * (1.0 - TOLERANCE) {
                    prop_assert!(next <= delay);
                } else {
                    prop_assert_eq!(next, delay);
                }
            }
        }
    }

    /// Aggregate rate of `clients` closed-loop clients that each spend
    /// `service_us` per transaction plus the pacing delay.
    fn closed_loop_tps(clients: f64, service_us: f64, delay_us: u64) -> f64 {
        clients * 1e6 / (service_us + delay_us as f64)
    }

    #[test]
    fn stationary_overload_strictly_increases_the_delay() {
        let pacing = PacingState::new(Duration::ZERO);
        let mut controller = RateController::new(1_000.0, FACTOR);
        let mut last = pacing.delay_us();

        // 300 transactions per 100ms is 3000 tps, whatever the delay.
        for _ in 0..50 {
            for _ in 0..300 {
                pacing.record_transaction(Window::Measured);
            }
            let sample = controller.tick(&pacing);
            assert_eq!(sample.tps, 3_000.0);
            assert!(sample.delay_us > last, "{} <= {last}", sample.delay_us);
            last = sample.delay_us;
        }
    }

    #[test]
    fn tick_extrapolates_to_per_second_rates() {
        let pacing = PacingState::new(Duration::from_millis(5));
        let mut controller = RateController::new(0.0, FACTOR);
        for _ in 0..12 {
            pacing.record_transaction(Window::Measured);
        }
        for _ in 0..30 {
            pacing.record_statement(Window::Measured);
        }
        let sample = controller.tick(&pacing);
        assert_eq!(sample.tps, 120.0);
        assert_eq!(sample.qps, 300.0);
        // No target: the delay is reported, not steered.
        assert_eq!(sample.delay_us, 5_000);

        let idle = controller.tick(&pacing);
        assert_eq!(idle.tps, 0.0);
        assert_eq!(idle.transactions, 12);
    }

    #[test]
    fn closed_loop_converges_into_the_band_and_stays() {
        let target = 2_000.0;
        let mut delay = 0u64;
        let mut converged_at = None;

        for i in 0..2_000 {
            let tps = closed_loop_tps(10.0, 1_000.0, delay);
            let next = next_delay(tps, target, FACTOR, delay);
            let in_band = (tps - target).abs() <= target * TOLERANCE;

            match converged_at {
                None if in_band => converged_at = Some(i),
                None => assert!(next > delay, "approach must be monotonic"),
                Some(_) => {
                    assert!(in_band, "left the band at tick {i} (tps {tps})");
                    assert_eq!(next, delay);
                }
            }
            delay = next;
        }

        assert!(converged_at.is_some(), "never reached the band");
        let tps = closed_loop_tps(10.0, 1_000.0, delay);
        assert!((tps - target).abs() <= target * TOLERANCE, "final tps {tps}");
    }

    #[tokio::test(start_paused = true)]
    async fn task_returns_summary_on_stop() {
        let pacing = Arc::new(PacingState::new(Duration::from_millis(1)));
        let stop = StopSignal::new();
        let started = Instant::now();
        let handle = tokio::spawn(rate_controller_task(
            RateController::new(0.0, FACTOR),
            Arc::clone(&pacing),
            ControllerSettings {
                report_interval: Duration::from_secs(1),
                duration: None,
                clients: 1,
            },
            started,
            stop.clone(),
        ));

        for _ in 0..20 {
            pacing.record_transaction(Window::Measured);
            pacing.record_statement(Window::Measured);
            pacing.record_statement(Window::Measured);
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        stop.trigger(StopReason::Interrupted);

        let summary = handle.await.unwrap();
        assert_eq!(summary.transactions, 20);
        assert_eq!(summary.statements, 40);
        assert_eq!(summary.elapsed, Duration::from_secs(2));
        assert_eq!(summary.average_tps, 10.0);
        assert_eq!(summary.average_qps, 20.0);
        assert_eq!(summary.final_delay, Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn initial_delay_survives_the_first_period() {
        let pacing = Arc::new(PacingState::new(Duration::from_millis(5)));
        let stop = StopSignal::new();
        let handle = tokio::spawn(rate_controller_task(
            RateController::new(100.0, FACTOR),
            Arc::clone(&pacing),
            ControllerSettings {
                report_interval: Duration::from_secs(1),
                duration: None,
                clients: 1,
            },
            Instant::now(),
            stop.clone(),
        ));

        // Nothing has been sampled yet, so nothing may have been steered.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(pacing.delay_us(), 5_000);

        // 10 transactions in the first period is 100 tps: inside the band.
        for _ in 0..10 {
            pacing.record_transaction(Window::Measured);
        }
        tokio::time::sleep(CONTROL_PERIOD + CONTROL_PERIOD / 2).await;
        assert_eq!(pacing.delay_us(), 5_000);

        stop.trigger(StopReason::Interrupted);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn task_steers_the_shared_delay() {
        let pacing = Arc::new(PacingState::new(Duration::ZERO));
        let stop = StopSignal::new();
        let handle = tokio::spawn(rate_controller_task(
            RateController::new(100.0, FACTOR),
            Arc::clone(&pacing),
            ControllerSettings {
                report_interval: Duration::from_secs(1),
                duration: Some(Duration::from_secs(10)),
                clients: 1,
            },
            Instant::now(),
            stop.clone(),
        ));

        // 50 transactions per period is 500 tps against a target of 100.
        for _ in 0..10 {
            for _ in 0..50 {
                pacing.record_transaction(Window::Measured);
            }
            tokio::time::sleep(CONTROL_PERIOD).await;
        }
        stop.trigger(StopReason::DurationElapsed);
        handle.await.unwrap();

        assert!(pacing.delay_us() > 0);
    }
}
