//! Dispatcher counters, exposed in the Prometheus text format.

use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};

/// Counter set backed by a private registry. Clones share the counters.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// All incoming `/query` requests, counted before body decoding.
    pub requests_total: IntCounter,
    /// Sub-queries created: a pass-through adds one, an N-part split
    /// adds N.
    pub splits_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let requests_total = IntCounter::with_opts(Opts::new(
            "dispatcher_requests_total",
            "All incoming /query requests",
        ))?;
        let splits_total = IntCounter::with_opts(Opts::new(
            "dispatcher_splits_total",
            "Number of sub-queries created",
        ))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(splits_total.clone()))?;
        Ok(Metrics {
            registry,
            requests_total,
            splits_total,
        })
    }

    /// Renders every registered metric in the text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}
