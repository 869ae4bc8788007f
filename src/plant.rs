use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::OAuthSession;
use crate::module::{DeviceCategory, Module};
use crate::payload;

/// One home ("plant"): the authoritative module map plus the raw topology and
/// status snapshots it was built from.
///
/// The plant owns its modules exclusively. Refreshes update entries in place;
/// an entry is only removed when a successful topology snapshot no longer
/// carries its id.
pub struct Plant {
    pub id: String,
    pub name: String,
    pub country: String,
    modules: HashMap<String, Module>,
    topology: Value,
    status: Value,
    session: Arc<OAuthSession>,
    base_url: String,
}

impl Plant {
    pub fn new(id: &str, home: &Value, session: Arc<OAuthSession>, base_url: &str) -> Self {
        let mut plant = Self {
            id: id.to_string(),
            name: String::new(),
            country: String::new(),
            modules: HashMap::new(),
            topology: Value::Null,
            status: Value::Null,
            session,
            base_url: base_url.to_string(),
        };
        plant.absorb_metadata(home);
        plant
    }

    /// Overwrite mutable home metadata in place. The plant instance itself is
    /// never replaced across refreshes.
    pub(crate) fn absorb_metadata(&mut self, home: &Value) {
        if let Some(name) = home.get("name").and_then(Value::as_str) {
            self.name = name.to_string();
        }
        if let Some(country) = home.get("country").and_then(Value::as_str) {
            self.country = country.to_string();
        }
    }

    pub fn modules(&self) -> &HashMap<String, Module> {
        &self.modules
    }

    pub fn module(&self, id: &str) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn module_mut(&mut self, id: &str) -> Option<&mut Module> {
        self.modules.get_mut(id)
    }

    /// Fetch the topology snapshot and reconcile the module map against it.
    /// Returns the modules evicted by the diff.
    ///
    /// Transport errors are logged and leave the map and the cached snapshot
    /// at their last known value.
    pub async fn refresh_topology(&mut self) -> Vec<Module> {
        let url = format!("{}{}", self.base_url, payload::HOMES_DATA_PATH);
        let Some(raw) = self.fetch(&url).await else {
            return Vec::new();
        };
        let evicted = self.reconcile_topology(&raw);
        self.topology = raw;
        evicted
    }

    /// Fetch the module status snapshot and absorb it into the known modules.
    pub async fn refresh_status(&mut self) {
        let url = format!("{}{}", self.base_url, payload::HOME_STATUS_PATH);
        let Some(raw) = self.fetch(&url).await else {
            return;
        };
        self.reconcile_status(&raw);
        self.status = raw;
    }

    /// Topology first, then status: the only order that fully populates both
    /// structure and live state.
    pub async fn update_topology_and_modules(&mut self) -> Vec<Module> {
        let evicted = self.refresh_topology().await;
        self.refresh_status().await;
        evicted
    }

    /// Diff the module map against a topology snapshot:
    /// unknown id → create; known id → update in place (or replace when the
    /// device category changed); id gone from the snapshot → remove.
    pub fn reconcile_topology(&mut self, raw: &Value) -> Vec<Module> {
        let home = payload::home_payload(raw);
        let flat = payload::flatten_topology_modules(home);

        for (id, descriptor) in &flat {
            let category = DeviceCategory::for_descriptor(descriptor);
            let replace = match self.modules.get(id.as_str()) {
                None => true,
                Some(existing) if existing.device != category => {
                    // Provider data error more often than a real hardware swap.
                    // The old instance and its accumulated state are dropped.
                    warn!(
                        home = %self.id,
                        module = %id,
                        old = existing.device.as_str(),
                        new = category.as_str(),
                        "device category changed, replacing module instance"
                    );
                    true
                }
                Some(_) => false,
            };
            if replace {
                if let Some(fresh) =
                    Module::from_descriptor(descriptor, &self.id, &self.base_url, self.session.clone())
                {
                    self.modules.insert(id.clone(), fresh);
                }
            } else if let Some(existing) = self.modules.get_mut(id.as_str()) {
                existing.absorb_descriptor(descriptor);
            }
        }

        let gone: Vec<String> = self
            .modules
            .keys()
            .filter(|id| !flat.contains_key(id.as_str()))
            .cloned()
            .collect();
        let mut evicted = Vec::with_capacity(gone.len());
        for id in gone {
            debug!(home = %self.id, module = %id, "module no longer in topology");
            if let Some(module) = self.modules.remove(&id) {
                evicted.push(module);
            }
        }
        evicted
    }

    /// Absorb a status snapshot. Records for unknown ids are dropped, never
    /// buffered; known modules with no record this pass are presumed offline
    /// and flipped to unreachable, but stay in the map.
    pub fn reconcile_status(&mut self, raw: &Value) {
        let mut seen: HashSet<String> = HashSet::new();
        for record in payload::flatten_status_records(raw) {
            let Some(id) = payload::status_record_id(record) else {
                continue;
            };
            match self.modules.get_mut(id) {
                Some(module) => {
                    module.absorb_status(record);
                    seen.insert(id.to_string());
                }
                None => debug!(home = %self.id, module = %id, "status for unknown module dropped"),
            }
        }
        for (id, module) in &mut self.modules {
            if !seen.contains(id) {
                module.reachable = false;
            }
        }
    }

    async fn fetch(&self, url: &str) -> Option<Value> {
        let response = match self
            .session
            .get_request(url, &[("home_id", &self.id)])
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(home = %self.id, error = %e, "refresh failed, keeping last known data");
                return None;
            }
        };
        match response.json().await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(home = %self.id, error = %e, "refresh response was not valid JSON");
                None
            }
        }
    }
}
