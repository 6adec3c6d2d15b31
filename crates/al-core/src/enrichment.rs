//! Location enrichment.
//!
//! A second accumulator, fed with the distinct source addresses of every
//! successfully written primary batch. On flush it drops addresses already in
//! the cache, resolves the rest, caches each result (an address-only record
//! when resolution fails) and writes the new records in one batch.
//!
//! Two flushes close together can both see an address as unknown, so the
//! location table may hold more than one row per address.

use crate::accumulator::{
    Accumulator, AccumulatorError, AccumulatorStats, BatchHandler, BatchSettings, FlushError,
};
use crate::clock::Clock;
use al_common::LocationRecord;
use al_telemetry::record::LOCATION_KEY;
use al_telemetry::{BulkSink, Record, Row, TableSchema};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("lookup of {address} failed: {reason}")]
    Transport { address: String, reason: String },

    #[error("lookup of {address} returned an unreadable body: {reason}")]
    InvalidResponse { address: String, reason: String },
}

/// External geo-IP lookup. Normal misses return a partial record; only
/// transport-level failures are errors.
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, address: &str) -> Result<LocationRecord, ResolveError>;
}

// ── HTTP resolver ──────────────────────────────────────────────────────────

/// Fields accepted from a JSON lookup response.
#[derive(Debug, Default, Deserialize)]
struct GeoResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "lat")]
    latitude: Option<f64>,
    #[serde(default, alias = "lon")]
    longitude: Option<f64>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default, alias = "zip")]
    postal: Option<String>,
}

impl GeoResponse {
    fn into_record(self, address: &str) -> LocationRecord {
        if self.status.as_deref() == Some("fail") {
            return LocationRecord::unresolved(address);
        }
        LocationRecord {
            address: address.to_string(),
            latitude: self.latitude,
            longitude: self.longitude,
            isp: self.isp,
            city: self.city,
            country: self.country,
            postal: self.postal.filter(|p| !p.is_empty()),
        }
    }
}

/// Resolves addresses against a JSON endpoint; `{address}` in the template is
/// replaced with the address being looked up.
pub struct HttpGeoResolver {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpGeoResolver {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            endpoint: endpoint.into(),
        }
    }

    /// Only a parsed IP is ever substituted, so the template's path and query
    /// cannot be rewritten by the address.
    pub fn url_for(&self, address: IpAddr) -> String {
        self.endpoint.replace("{address}", &address.to_string())
    }
}

impl GeoResolver for HttpGeoResolver {
    fn resolve(&self, address: &str) -> Result<LocationRecord, ResolveError> {
        let Ok(ip) = address.parse::<IpAddr>() else {
            debug!(address, "not an IP address; skipping lookup");
            return Ok(LocationRecord::unresolved(address));
        };
        let url = self.url_for(ip);
        match self.agent.get(&url).call() {
            Ok(response) => {
                let body: GeoResponse =
                    response
                        .into_json()
                        .map_err(|e| ResolveError::InvalidResponse {
                            address: address.to_string(),
                            reason: e.to_string(),
                        })?;
                Ok(body.into_record(address))
            }
            Err(ureq::Error::Status(code, _)) if (400..500).contains(&code) => {
                debug!(address, status = code, "location lookup miss");
                Ok(LocationRecord::unresolved(address))
            }
            Err(ureq::Error::Status(code, _)) => Err(ResolveError::Transport {
                address: address.to_string(),
                reason: format!("HTTP {}", code),
            }),
            Err(ureq::Error::Transport(t)) => Err(ResolveError::Transport {
                address: address.to_string(),
                reason: t.to_string(),
            }),
        }
    }
}

// ── Static resolver ────────────────────────────────────────────────────────

/// Fixed lookup table. Unknown addresses resolve to address-only records.
#[derive(Default)]
pub struct StaticResolver {
    entries: HashMap<String, LocationRecord>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, record: LocationRecord) -> Self {
        self.entries.insert(record.address.clone(), record);
        self
    }

    /// Make lookups of `address` fail as a transport error would.
    pub fn with_failure(mut self, address: impl Into<String>) -> Self {
        self.failing.insert(address.into());
        self
    }

    /// Number of lookups performed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GeoResolver for StaticResolver {
    fn resolve(&self, address: &str) -> Result<LocationRecord, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(address) {
            return Err(ResolveError::Transport {
                address: address.to_string(),
                reason: "unreachable".to_string(),
            });
        }
        Ok(self
            .entries
            .get(address)
            .cloned()
            .unwrap_or_else(|| LocationRecord::unresolved(address)))
    }
}

// ── Cache ──────────────────────────────────────────────────────────────────

/// Addresses known to the process. Written only by the location flush.
#[derive(Debug, Default)]
pub struct LocationCache {
    known: RwLock<HashMap<String, LocationRecord>>,
}

impl LocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark addresses already present in the store as known. Their details
    /// stay in the store; the cache only keeps the address.
    pub fn warm<I>(&self, addresses: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut known = self.known.write();
        let before = known.len();
        for address in addresses {
            known
                .entry(address.clone())
                .or_insert_with(|| LocationRecord::unresolved(address));
        }
        known.len() - before
    }

    pub fn contains(&self, address: &str) -> bool {
        self.known.read().contains_key(address)
    }

    pub fn get(&self, address: &str) -> Option<LocationRecord> {
        self.known.read().get(address).cloned()
    }

    pub fn insert(&self, record: LocationRecord) {
        self.known.write().insert(record.address.clone(), record);
    }

    pub fn evict<'a, I>(&self, addresses: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut known = self.known.write();
        for address in addresses {
            known.remove(address);
        }
    }

    pub fn len(&self) -> usize {
        self.known.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.read().is_empty()
    }
}

// ── Pipe ───────────────────────────────────────────────────────────────────

struct LocationHandler {
    sink: Arc<dyn BulkSink>,
    schema: TableSchema,
    resolver: Arc<dyn GeoResolver>,
    cache: Arc<LocationCache>,
    /// Records resolved for a batch whose write failed; reused when the batch
    /// is retried or the address is seen again.
    unwritten: HashMap<String, LocationRecord>,
}

impl LocationHandler {
    fn lookup(&mut self, address: &str) -> LocationRecord {
        if let Some(record) = self.unwritten.remove(address) {
            return record;
        }
        if address.parse::<IpAddr>().is_err() {
            debug!(address, "not an IP address; storing address only");
            return LocationRecord::unresolved(address);
        }
        match self.resolver.resolve(address) {
            Ok(mut record) => {
                record.address = address.to_string();
                record
            }
            Err(e) => {
                warn!(address, error = %e, "location lookup failed; storing address only");
                LocationRecord::unresolved(address)
            }
        }
    }
}

impl BatchHandler<String> for LocationHandler {
    fn handle(&mut self, batch: &[String]) -> Result<(), FlushError> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for address in batch {
            let address = address.trim();
            if !seen.insert(address) || self.cache.contains(address) {
                continue;
            }
            let record = self.lookup(address);
            self.cache.insert(record.clone());
            records.push(record);
        }

        if records.is_empty() {
            return Ok(());
        }

        let rows: Vec<Row> = records.iter().map(Record::project).collect();
        if let Err(e) = self.sink.write_batch(&self.schema, &rows) {
            // Forget these so a later sighting writes them again.
            self.cache.evict(records.iter().map(|r| r.address.as_str()));
            self.unwritten
                .extend(records.into_iter().map(|r| (r.address.clone(), r)));
            return Err(e.into());
        }
        self.unwritten.clear();
        debug!(table = %self.schema.table, batch_size = records.len(), "stored locations");
        Ok(())
    }
}

/// Accumulator of addresses plus the cache it deduplicates against.
pub struct LocationPipe {
    accumulator: Accumulator<String>,
    cache: Arc<LocationCache>,
}

impl LocationPipe {
    /// Warm the cache from the location table and start the accumulator.
    pub fn start(
        sink: Arc<dyn BulkSink>,
        schema: TableSchema,
        resolver: Arc<dyn GeoResolver>,
        settings: BatchSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AccumulatorError> {
        let cache = Arc::new(LocationCache::new());
        match sink.distinct_values(&schema, LOCATION_KEY) {
            Ok(addresses) => {
                let loaded = cache.warm(addresses);
                info!(table = %schema.table, known = loaded, "loaded known addresses");
            }
            Err(e) => {
                warn!(table = %schema.table, error = %e, "could not load known addresses");
            }
        }

        let handler = LocationHandler {
            sink,
            schema,
            resolver,
            cache: Arc::clone(&cache),
            unwritten: HashMap::new(),
        };
        let accumulator = Accumulator::spawn("locations", settings, handler, clock)?;
        Ok(Self { accumulator, cache })
    }

    /// Queue addresses for resolution. Blank addresses are skipped.
    pub fn submit<'a, I>(&self, addresses: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let addresses: Vec<String> = addresses
            .into_iter()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        if let Err(e) = self.accumulator.append_many(addresses) {
            warn!(error = %e, "dropping addresses for enrichment");
        }
    }

    pub fn cache(&self) -> &Arc<LocationCache> {
        &self.cache
    }

    pub fn flush(&self) {
        self.accumulator.flush();
    }

    pub fn shutdown(&self) {
        self.accumulator.shutdown();
    }

    pub fn stats(&self) -> AccumulatorStats {
        self.accumulator.stats()
    }
}
