//! Background refresh of both stores on independent intervals.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info, info_span, warn};

use crate::engine::RelayEngine;
use crate::output::append_record;
use crate::static_data::StaticRefreshOutcome;
use crate::stats::FeedStats;

/// Shortest period a refresh loop will tick at.
pub const MIN_REFRESH_PERIOD: Duration = Duration::from_secs(1);

/// Intervals and optional statistics sink for the refresh loops.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub realtime_interval: Duration,
    pub static_check_interval: Duration,
    /// CSV file receiving one [`FeedStats`] row per realtime refresh.
    pub stats_path: Option<PathBuf>,
}

impl SchedulerOptions {
    pub fn from_engine(engine: &RelayEngine) -> Self {
        let config = engine.config();
        Self {
            realtime_interval: config.realtime_interval,
            static_check_interval: config.static_check_interval,
            stats_path: None,
        }
    }

    pub fn with_stats_path(mut self, path: Option<PathBuf>) -> Self {
        self.stats_path = path;
        self
    }
}

/// A zero interval is raised to [`MIN_REFRESH_PERIOD`].
fn refresh_period(loop_name: &str, every: Duration) -> Duration {
    if every.is_zero() {
        warn!(
            loop_name,
            period_secs = MIN_REFRESH_PERIOD.as_secs(),
            "Zero refresh interval; using the minimum period"
        );
        MIN_REFRESH_PERIOD
    } else {
        every
    }
}

/// Running refresh loops. Dropping the handle stops them without waiting;
/// [`shutdown`](Self::shutdown) also waits for both to finish.
pub struct RefreshScheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RefreshScheduler {
    /// Spawns one loop per source. Both run their first refresh immediately.
    pub fn start(engine: Arc<RelayEngine>, options: SchedulerOptions) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let realtime_every = refresh_period("realtime", options.realtime_interval);
        let static_every = refresh_period("static", options.static_check_interval);

        let realtime = tokio::spawn(
            realtime_loop(
                engine.clone(),
                realtime_every,
                options.stats_path.clone(),
                rx.clone(),
            )
            .instrument(info_span!("realtime_refresh")),
        );
        let schedule = tokio::spawn(
            static_loop(engine, static_every, rx).instrument(info_span!("static_refresh")),
        );

        info!(
            realtime_interval_secs = realtime_every.as_secs(),
            static_check_interval_secs = static_every.as_secs(),
            "Refresh scheduler started"
        );
        Self {
            shutdown,
            tasks: vec![realtime, schedule],
        }
    }

    /// Signals both loops to stop and waits for them. A realtime fetch in
    /// progress is abandoned; a static refresh in progress runs to the end
    /// so its archive and download state stay in step.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Refresh task ended abnormally");
            }
        }
        info!("Refresh scheduler stopped");
    }
}

async fn realtime_loop(
    engine: Arc<RelayEngine>,
    every: Duration,
    stats_path: Option<PathBuf>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let stats = tokio::select! {
            _ = shutdown.changed() => break,
            result = engine.refresh_realtime_now() => match result {
                Ok(stats) => stats,
                Err(e) => FeedStats::from_error(e.kind(), &e.to_string()),
            },
        };

        if let Some(path) = &stats_path
            && let Err(e) = append_record(path, &stats)
        {
            error!(error = %e, path = %path.display(), "Failed to write refresh stats");
        }
    }
}

async fn static_loop(
    engine: Arc<RelayEngine>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        // Not raced against shutdown: the staged archive and the persisted
        // download time are only consistent once refresh returns.
        if let Ok(StaticRefreshOutcome::Published { generation, .. }) =
            engine.refresh_static_now(false).await
        {
            info!(generation, "Scheduled static refresh published");
        }

        if *shutdown.borrow() {
            break;
        }
    }
}
