use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::OAuthSession;
use crate::module::Module;
use crate::payload;
use crate::plant::Plant;
use crate::Result;

/// Minimum ages before each data class is fetched again. Home metadata and
/// topology barely change; module status is the hot path.
#[derive(Debug, Clone, Copy)]
pub struct UpdateIntervals {
    pub plant_data: Duration,
    pub topology: Duration,
    pub module_status: Duration,
}

impl Default for UpdateIntervals {
    fn default() -> Self {
        Self {
            plant_data: Duration::from_secs(7200),
            topology: Duration::from_secs(3600),
            module_status: Duration::from_secs(300),
        }
    }
}

fn stale(last: Option<Instant>, interval: Duration) -> bool {
    match last {
        Some(at) => at.elapsed() >= interval,
        None => true,
    }
}

/// Top-level entry point: all homes of the account, refreshed lazily behind
/// per-data-class staleness timers.
///
/// [`get_modules`](HomesApi::get_modules) is the one call a consumer polls;
/// it decides internally which of the three data classes are due.
pub struct HomesApi {
    session: Arc<OAuthSession>,
    base_url: String,
    intervals: UpdateIntervals,
    homes: HashMap<String, Plant>,
    /// module id → home id, rebuilt after every refresh pass.
    module_index: HashMap<String, String>,
    /// Interactive modules that dropped out of the topology, kept until the
    /// consumer disposes of them (or the id reappears).
    removed: HashMap<String, Module>,
    last_plant_check: Option<Instant>,
    last_topology_check: Option<Instant>,
    last_status_check: Option<Instant>,
}

impl HomesApi {
    pub fn new(session: Arc<OAuthSession>) -> Self {
        Self::with_intervals(session, UpdateIntervals::default())
    }

    pub fn with_intervals(session: Arc<OAuthSession>, intervals: UpdateIntervals) -> Self {
        Self {
            session,
            base_url: payload::API_BASE_URL.to_string(),
            intervals,
            homes: HashMap::new(),
            module_index: HashMap::new(),
            removed: HashMap::new(),
            last_plant_check: None,
            last_topology_check: None,
            last_status_check: None,
        }
    }

    /// Point the client at a different API host.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn homes(&self) -> &HashMap<String, Plant> {
        &self.homes
    }

    pub fn home_mut(&mut self, id: &str) -> Option<&mut Plant> {
        self.homes.get_mut(id)
    }

    /// Modules evicted since the last time the consumer cleared them.
    pub fn removed_modules(&self) -> &HashMap<String, Module> {
        &self.removed
    }

    /// Mutable handle to a module anywhere in the account, for commands.
    pub fn module_mut(&mut self, id: &str) -> Option<&mut Module> {
        let home_id = self.module_index.get(id)?.clone();
        self.homes.get_mut(&home_id)?.module_mut(id)
    }

    /// Refresh whatever is stale and return the interactive modules of all
    /// homes, flattened by id.
    ///
    /// A failed homes listing propagates (nothing useful can be served
    /// without it on the first call). Per-home topology and status failures
    /// are contained to the home, which keeps its last known data.
    pub async fn get_modules(&mut self) -> Result<HashMap<String, &Module>> {
        if stale(self.last_plant_check, self.intervals.plant_data) {
            self.refresh_homes().await?;
            self.last_plant_check = Some(Instant::now());
        }
        if stale(self.last_topology_check, self.intervals.topology) {
            for plant in self.homes.values_mut() {
                for module in plant.refresh_topology().await {
                    if module.is_interactive() {
                        self.removed.insert(module.id.clone(), module);
                    }
                }
            }
            self.last_topology_check = Some(Instant::now());
        }
        if stale(self.last_status_check, self.intervals.module_status) {
            for plant in self.homes.values_mut() {
                plant.refresh_status().await;
            }
            self.last_status_check = Some(Instant::now());
        }

        self.reindex();

        let mut flat = HashMap::new();
        for plant in self.homes.values() {
            for (id, module) in plant.modules() {
                if module.is_interactive() {
                    flat.insert(id.clone(), module);
                }
            }
        }
        Ok(flat)
    }

    /// Fetch the homes listing and reconcile the plant map against it. New
    /// homes get their modules at the next topology pass; vanished homes are
    /// dropped and their interactive modules land in the removed map.
    async fn refresh_homes(&mut self) -> Result<()> {
        let url = format!("{}{}", self.base_url, payload::HOMES_DATA_PATH);
        let response = self.session.get_request(&url, &[]).await?;
        let raw: Value = response.json().await?;

        let listing = payload::homes_list(&raw);
        for home in listing {
            let Some(id) = home.get("id").and_then(Value::as_str) else {
                debug!("home entry without id skipped");
                continue;
            };
            match self.homes.get_mut(id) {
                Some(plant) => plant.absorb_metadata(home),
                None => {
                    info!(home = %id, "new home");
                    self.homes.insert(
                        id.to_string(),
                        Plant::new(id, home, self.session.clone(), &self.base_url),
                    );
                }
            }
        }

        let gone: Vec<String> = self
            .homes
            .keys()
            .filter(|id| !listing.iter().any(|h| h.get("id").and_then(Value::as_str) == Some(id)))
            .cloned()
            .collect();
        for id in gone {
            warn!(home = %id, "home no longer in account listing");
            if let Some(plant) = self.homes.remove(&id) {
                for (module_id, module) in plant.modules() {
                    if module.is_interactive() {
                        self.removed.insert(module_id.clone(), module.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Rebuild the module→home index and drop reappeared ids from the
    /// removed map.
    fn reindex(&mut self) {
        self.module_index.clear();
        for (home_id, plant) in &self.homes {
            for id in plant.modules().keys() {
                self.module_index.insert(id.clone(), home_id.clone());
                self.removed.remove(id);
            }
        }
    }
}
