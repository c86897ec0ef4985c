//! Prometheus counters for engine observability.

use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};

pub struct EngineMetrics {
    registry: Registry,
    pub sessions_created: IntCounter,
    pub sessions_settled: IntCounter,
    pub sessions_cancelled: IntCounter,
    pub sessions_expired: IntCounter,
    pub draws: IntCounter,
    pub forfeits: IntCounter,
    pub lamports_wagered: IntCounter,
    pub lamports_paid_out: IntCounter,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let sessions_created = Self::counter("fartduel_sessions_created_total", "Sessions created");
        let sessions_settled = Self::counter("fartduel_sessions_settled_total", "Sessions settled");
        let sessions_cancelled =
            Self::counter("fartduel_sessions_cancelled_total", "Sessions cancelled");
        let sessions_expired = Self::counter("fartduel_sessions_expired_total", "Sessions expired");
        let draws = Self::counter("fartduel_draws_total", "Duels resolved as draws");
        let forfeits = Self::counter("fartduel_forfeits_total", "Duels resolved by forfeit");
        let lamports_wagered =
            Self::counter("fartduel_lamports_wagered_total", "Total stakes escrowed");
        let lamports_paid_out =
            Self::counter("fartduel_lamports_paid_out_total", "Total prizes paid");

        for counter in [
            &sessions_created,
            &sessions_settled,
            &sessions_cancelled,
            &sessions_expired,
            &draws,
            &forfeits,
            &lamports_wagered,
            &lamports_paid_out,
        ] {
            // Registration only fails on duplicate names within this registry.
            let _ = registry.register(Box::new(counter.clone()));
        }

        Self {
            registry,
            sessions_created,
            sessions_settled,
            sessions_cancelled,
            sessions_expired,
            draws,
            forfeits,
            lamports_wagered,
            lamports_paid_out,
        }
    }

    fn counter(name: &str, help: &str) -> IntCounter {
        IntCounter::with_opts(Opts::new(name, help)).expect("static counter opts are valid")
    }

    /// Render all counters in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
