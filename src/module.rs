use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::OAuthSession;
use crate::payload;

/// Capability class of a module, decided once at creation time from the
/// descriptor's device field (legacy API) or hardware type code (current API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCategory {
    Plug,
    Light,
    Automation,
    Remote,
    Gateway,
    Unknown,
}

impl DeviceCategory {
    /// Fixed product-type table mapping hardware type codes to categories.
    pub fn from_hw_type(code: &str) -> Self {
        match code {
            "NLG" | "NLGS" => DeviceCategory::Gateway,
            "NLP" | "NLPM" | "NLPBS" => DeviceCategory::Plug,
            "NLF" | "NLFN" | "NLM" | "NLL" | "NLPT" => DeviceCategory::Light,
            "NBR" | "NBO" | "NBS" => DeviceCategory::Automation,
            "NLT" => DeviceCategory::Remote,
            _ => DeviceCategory::Unknown,
        }
    }

    pub fn from_device_str(device: &str) -> Self {
        match device {
            "plug" => DeviceCategory::Plug,
            "light" => DeviceCategory::Light,
            "automation" => DeviceCategory::Automation,
            "remote" => DeviceCategory::Remote,
            "gateway" => DeviceCategory::Gateway,
            _ => DeviceCategory::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceCategory::Plug => "plug",
            DeviceCategory::Light => "light",
            DeviceCategory::Automation => "automation",
            DeviceCategory::Remote => "remote",
            DeviceCategory::Gateway => "gateway",
            DeviceCategory::Unknown => "unknown",
        }
    }

    pub(crate) fn for_descriptor(descriptor: &Value) -> Self {
        if let Some(device) = descriptor.get("device").and_then(Value::as_str) {
            return Self::from_device_str(device);
        }
        let code = descriptor
            .get("type")
            .or_else(|| descriptor.get("hw_type"))
            .and_then(Value::as_str)
            .unwrap_or("");
        Self::from_hw_type(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchState::On => "on",
            SwitchState::Off => "off",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "on" => Some(SwitchState::On),
            "off" => Some(SwitchState::Off),
            _ => None,
        }
    }
}

/// Variant-specific state. The variant is fixed by the module's category at
/// creation time and never migrates.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleKind {
    Base,
    Interactive {
        status: Option<SwitchState>,
        power: f64,
    },
    Automation {
        level: Option<i64>,
    },
    Remote {
        battery_state: String,
        battery_level: i64,
    },
}

impl ModuleKind {
    fn for_category(category: DeviceCategory) -> Self {
        match category {
            DeviceCategory::Plug | DeviceCategory::Light => ModuleKind::Interactive {
                status: None,
                power: 0.0,
            },
            DeviceCategory::Automation => ModuleKind::Automation { level: None },
            DeviceCategory::Remote => ModuleKind::Remote {
                battery_state: String::new(),
                battery_level: 0,
            },
            DeviceCategory::Gateway | DeviceCategory::Unknown => ModuleKind::Base,
        }
    }
}

/// One controllable or monitorable device of a home.
///
/// Holds a shared handle to the home's OAuth session purely to reach the
/// authenticated façade for commands; the owning [`Plant`](crate::Plant)
/// keeps the module alive, not the other way around.
#[derive(Clone)]
pub struct Module {
    pub id: String,
    pub name: String,
    pub hw_type: String,
    pub device: DeviceCategory,
    pub bridge: Option<String>,
    pub appliance_type: Option<String>,
    pub firmware: Option<i64>,
    pub reachable: bool,
    pub kind: ModuleKind,
    home_id: String,
    base_url: String,
    session: Arc<OAuthSession>,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("hw_type", &self.hw_type)
            .field("device", &self.device)
            .field("bridge", &self.bridge)
            .field("appliance_type", &self.appliance_type)
            .field("firmware", &self.firmware)
            .field("reachable", &self.reachable)
            .field("kind", &self.kind)
            .field("home_id", &self.home_id)
            .finish_non_exhaustive()
    }
}

/// Clamp a requested automation level into the provider range, letting the
/// stop sentinel through untouched.
fn clamp_level(desired: i64) -> i64 {
    if desired > Module::OPEN_FULL {
        Module::OPEN_FULL
    } else if desired < 0 && desired != Module::STOP_MOTION {
        Module::CLOSED_FULL
    } else {
        desired
    }
}

impl Module {
    /// Level of a fully open cover.
    pub const OPEN_FULL: i64 = 100;
    /// Level of a fully closed cover.
    pub const CLOSED_FULL: i64 = 0;
    /// Sentinel level that stops the motion instead of targeting a position.
    pub const STOP_MOTION: i64 = -1;

    pub(crate) fn from_descriptor(
        descriptor: &Value,
        home_id: &str,
        base_url: &str,
        session: Arc<OAuthSession>,
    ) -> Option<Self> {
        let id = descriptor.get("id").and_then(Value::as_str)?;
        let category = DeviceCategory::for_descriptor(descriptor);
        let mut module = Self {
            id: id.to_string(),
            name: String::new(),
            hw_type: String::new(),
            device: category,
            bridge: None,
            appliance_type: None,
            firmware: None,
            reachable: false,
            kind: ModuleKind::for_category(category),
            home_id: home_id.to_string(),
            base_url: base_url.to_string(),
            session,
        };
        module.absorb_descriptor(descriptor);
        Some(module)
    }

    /// Overwrite topology metadata from a descriptor, in place. Status fields
    /// and object identity are untouched.
    pub(crate) fn absorb_descriptor(&mut self, descriptor: &Value) {
        if let Some(name) = descriptor.get("name").and_then(Value::as_str) {
            self.name = name.to_string();
        }
        if let Some(hw) = descriptor
            .get("type")
            .or_else(|| descriptor.get("hw_type"))
            .and_then(Value::as_str)
        {
            self.hw_type = hw.to_string();
        }
        if let Some(bridge) = descriptor.get("bridge").and_then(Value::as_str) {
            self.bridge = Some(bridge.to_string());
        }
        if let Some(appliance) = descriptor.get("appliance_type").and_then(Value::as_str) {
            self.appliance_type = Some(appliance.to_string());
        }
    }

    /// Absorb a status record. Missing optional fields fall back to defaults
    /// (`reachable = false`, `power = 0`) instead of erroring.
    pub(crate) fn absorb_status(&mut self, record: &Value) {
        self.reachable = record
            .get("reachable")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if let Some(fw) = record
            .get("firmware_revision")
            .or_else(|| record.get("fw"))
            .and_then(Value::as_i64)
        {
            self.firmware = Some(fw);
        }

        match &mut self.kind {
            ModuleKind::Interactive { status, power } => {
                if let Some(on) = record.get("on").and_then(Value::as_bool) {
                    *status = Some(if on { SwitchState::On } else { SwitchState::Off });
                } else if let Some(s) = record
                    .get("status")
                    .and_then(Value::as_str)
                    .and_then(SwitchState::from_str)
                {
                    *status = Some(s);
                }
                *power = record.get("power").and_then(Value::as_f64).unwrap_or(0.0);
            }
            ModuleKind::Automation { level } => {
                if let Some(position) = record.get("current_position").and_then(Value::as_i64) {
                    *level = Some(position);
                }
            }
            ModuleKind::Remote {
                battery_state,
                battery_level,
            } => {
                if let Some(state) = record
                    .get("battery_state")
                    .or_else(|| record.get("battery"))
                    .and_then(Value::as_str)
                {
                    *battery_state = state.to_string();
                }
                if let Some(level) = record.get("battery_level").and_then(Value::as_i64) {
                    *battery_level = level;
                }
            }
            ModuleKind::Base => {}
        }
    }

    /// True for modules that accept on/off or level commands.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self.kind,
            ModuleKind::Interactive { .. } | ModuleKind::Automation { .. }
        )
    }

    pub fn status(&self) -> Option<SwitchState> {
        match self.kind {
            ModuleKind::Interactive { status, .. } => status,
            _ => None,
        }
    }

    pub fn power(&self) -> f64 {
        match self.kind {
            ModuleKind::Interactive { power, .. } => power,
            _ => 0.0,
        }
    }

    pub fn level(&self) -> Option<i64> {
        match self.kind {
            ModuleKind::Automation { level } => level,
            _ => None,
        }
    }

    pub fn battery_state(&self) -> Option<&str> {
        match &self.kind {
            ModuleKind::Remote { battery_state, .. } => Some(battery_state.as_str()),
            _ => None,
        }
    }

    pub fn battery_level(&self) -> Option<i64> {
        match self.kind {
            ModuleKind::Remote { battery_level, .. } => Some(battery_level),
            _ => None,
        }
    }

    // -- Commands --

    pub async fn turn_on(&mut self) -> bool {
        self.send_switch(SwitchState::On).await
    }

    pub async fn turn_off(&mut self) -> bool {
        self.send_switch(SwitchState::Off).await
    }

    pub async fn toggle(&mut self) -> bool {
        let target = match self.status() {
            Some(SwitchState::On) => SwitchState::Off,
            _ => SwitchState::On,
        };
        self.send_switch(target).await
    }

    /// Drive the automation towards `desired`, clamped to the provider range.
    /// The stop sentinel leaves the true level unknown, so on success it is
    /// read back from the status endpoint instead of assumed.
    ///
    /// Returns false (and leaves local state unchanged) when the command
    /// POST fails; the caller can retry at the next poll.
    pub async fn set_level(&mut self, desired: i64) -> bool {
        if !matches!(self.kind, ModuleKind::Automation { .. }) {
            warn!(id = %self.id, device = self.device.as_str(), "module accepts no level commands");
            return false;
        }
        let target = clamp_level(desired);
        let body =
            payload::set_position_data(&self.home_id, &self.id, self.bridge.as_deref(), target);
        let url = format!("{}{}", self.base_url, payload::SET_STATE_PATH);
        match self.session.clone().post_request(&url, &body).await {
            Ok(_) => {
                if target == Self::STOP_MOTION {
                    if !self.refresh_state().await {
                        debug!(id = %self.id, "level unknown after stop, keeping last value");
                    }
                } else if let ModuleKind::Automation { level } = &mut self.kind {
                    *level = Some(target);
                }
                true
            }
            Err(e) => {
                warn!(id = %self.id, error = %e, "position command failed");
                false
            }
        }
    }

    pub async fn open(&mut self) -> bool {
        self.set_level(Self::OPEN_FULL).await
    }

    pub async fn close(&mut self) -> bool {
        self.set_level(Self::CLOSED_FULL).await
    }

    pub async fn stop(&mut self) -> bool {
        self.set_level(Self::STOP_MOTION).await
    }

    /// Re-read this module's own status record from the status endpoint.
    pub async fn refresh_state(&mut self) -> bool {
        let url = format!("{}{}", self.base_url, payload::HOME_STATUS_PATH);
        let home_id = self.home_id.clone();
        let session = self.session.clone();
        let response = match session.get_request(&url, &[("home_id", &home_id)]).await {
            Ok(r) => r,
            Err(e) => {
                warn!(id = %self.id, error = %e, "status re-read failed");
                return false;
            }
        };
        let raw: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(id = %self.id, error = %e, "status re-read returned invalid JSON");
                return false;
            }
        };
        let record = payload::flatten_status_records(&raw)
            .into_iter()
            .find(|r| payload::status_record_id(r) == Some(self.id.as_str()));
        match record {
            Some(record) => {
                self.absorb_status(record);
                true
            }
            None => {
                debug!(id = %self.id, "no status record for module");
                false
            }
        }
    }

    async fn send_switch(&mut self, target: SwitchState) -> bool {
        if !matches!(self.kind, ModuleKind::Interactive { .. }) {
            warn!(id = %self.id, device = self.device.as_str(), "module accepts no on/off commands");
            return false;
        }
        let body = payload::set_switch_data(
            &self.home_id,
            &self.id,
            self.bridge.as_deref(),
            target == SwitchState::On,
        );
        let url = format!("{}{}", self.base_url, payload::SET_STATE_PATH);
        match self.session.clone().post_request(&url, &body).await {
            Ok(_) => {
                if let ModuleKind::Interactive { status, .. } = &mut self.kind {
                    *status = Some(target);
                }
                true
            }
            Err(e) => {
                warn!(id = %self.id, error = %e, "switch command failed");
                false
            }
        }
    }
}
