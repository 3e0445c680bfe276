use super::{connection::ConnectionManager, subscription::SubscriptionManager};
use crate::cache::ValueCache;
use chrono::Utc;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one health check did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityReport {
    /// Environments whose session was found dead and dropped.
    pub lost: Vec<String>,
    /// Stale environments that were reconnected.
    pub reconnected: Vec<String>,
    /// Subscriptions recreated after a reconnect.
    pub recreated: usize,
    /// Failed environments a connect was retried for.
    pub retried: Vec<String>,
}

/// Periodic health check driving reconnects.
pub struct AvailabilityMonitor {
    connections: Arc<ConnectionManager>,
    subscriptions: Arc<SubscriptionManager>,
    cache: Arc<ValueCache>,
    threshold: Duration,
    period: Duration,
}

impl AvailabilityMonitor {
    pub fn new(
        connections: Arc<ConnectionManager>,
        subscriptions: Arc<SubscriptionManager>,
        cache: Arc<ValueCache>,
        threshold: Duration,
        period: Duration,
    ) -> Self {
        Self {
            connections,
            subscriptions,
            cache,
            threshold,
            period,
        }
    }

    fn is_stale(&self, env: &str) -> bool {
        Utc::now()
            .signed_duration_since(self.cache.staleness(env))
            .to_std()
            .map(|elapsed| elapsed > self.threshold)
            .unwrap_or(false)
    }

    /// One health check.
    ///
    /// A session whose connection is gone is dropped first and its environment
    /// joins the failed set. An environment with subscriptions and no accepted update within the
    /// threshold is reconnected once and all its subscriptions are recreated. Every
    /// environment in the failed set not already handled in this pass gets one more
    /// connect attempt.
    pub async fn check_availability(&self) -> AvailabilityReport {
        let mut report = AvailabilityReport::default();
        let mut attempted = HashSet::new();

        for env in self.connections.declared_names() {
            if !self.connections.has_lost_session(&env) {
                continue;
            }
            let guard = self.connections.lock(&env).await;
            if self.connections.drop_lost_session(&guard) {
                report.lost.push(env);
            }
        }

        for env in self.connections.declared_names() {
            if !self.subscriptions.has_subscriptions(&env) || !self.is_stale(&env) {
                continue;
            }
            let guard = self.connections.lock(&env).await;
            // a reconnect may have completed while waiting for the lock
            if !self.subscriptions.has_subscriptions(&env) || !self.is_stale(&env) {
                continue;
            }
            attempted.insert(env.clone());
            warn!(
                env = %env,
                last_update = %self.cache.staleness(&env),
                "No updates within threshold; reconnecting"
            );
            if self.connections.connect(&guard).await {
                report.recreated += self.subscriptions.recreate_all_locked(&guard).await;
                report.reconnected.push(env);
            } else {
                error!(env = %env, "Reconnect failed; will retry on next check");
            }
        }

        for env in self.connections.failed_envs() {
            if attempted.contains(&env) {
                continue;
            }
            let guard = self.connections.lock(&env).await;
            if !self.connections.is_failed(&env) {
                continue;
            }
            report.retried.push(env.clone());
            if self.connections.connect(&guard).await {
                info!(env = %env, "Failed environment reconnected");
                report.recreated += self.subscriptions.recreate_all_locked(&guard).await;
            }
        }

        debug!(?report, "Availability check done");
        report
    }

    /// Runs [`check_availability`](Self::check_availability) every period until
    /// cancelled. The first check happens one period after start.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = self.period.as_secs(), "Availability monitor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_availability().await;
                }
            }
        }
        info!("Availability monitor stopped");
    }
}
