// Prometheus collectors for the custody node
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

pub static PROM_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static PROM_DEPOSITS_CREDITED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("custody_deposits_credited_total", "Deposits credited to user balances"),
        &["currency", "network"],
    )
    .expect("create deposits counter");
    // register, ignore error if already registered
    let _ = PROM_REGISTRY.register(Box::new(c.clone()));
    c
});

pub static PROM_WATCH_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("custody_watch_errors_total", "Deposit checks that failed"),
        &["network"],
    )
    .expect("create watch error counter");
    let _ = PROM_REGISTRY.register(Box::new(c.clone()));
    c
});

pub static PROM_SWEEP_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("custody_sweep_outcomes_total", "Sweep attempts by outcome"),
        &["status"],
    )
    .expect("create sweep counter");
    let _ = PROM_REGISTRY.register(Box::new(c.clone()));
    c
});

pub fn deposit_credited(currency: &str, network: &str) {
    PROM_DEPOSITS_CREDITED
        .with_label_values(&[currency, network])
        .inc();
}

pub fn watch_error(network: &str) {
    PROM_WATCH_ERRORS.with_label_values(&[network]).inc();
}

pub fn sweep_outcome(status: &str) {
    PROM_SWEEP_OUTCOMES.with_label_values(&[status]).inc();
}

/// Text exposition of every registered collector
pub fn render() -> String {
    // touch lazies so families show up before the first event
    Lazy::force(&PROM_DEPOSITS_CREDITED);
    Lazy::force(&PROM_WATCH_ERRORS);
    Lazy::force(&PROM_SWEEP_OUTCOMES);

    let encoder = TextEncoder::new();
    let metric_families = PROM_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).ok();
    String::from_utf8_lossy(&buffer).into_owned()
}
