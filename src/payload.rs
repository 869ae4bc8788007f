use std::collections::HashMap;

use serde_json::{json, Map, Value};

pub const API_BASE_URL: &str = "https://api.netatmo.com/api";

pub(crate) const HOMES_DATA_PATH: &str = "/homesdata";
pub(crate) const HOME_STATUS_PATH: &str = "/homestatus";
pub(crate) const SET_STATE_PATH: &str = "/setstate";

/// Locate the home object inside a topology response. Handles both provider
/// generations: `body.homes[0]` (current), `plant` (legacy), or an already
/// unwrapped home object.
pub(crate) fn home_payload(raw: &Value) -> &Value {
    for path in ["/body/homes/0", "/body/home", "/plant"] {
        if let Some(home) = raw.pointer(path) {
            return home;
        }
    }
    raw
}

/// All home objects of a homes-data listing.
pub(crate) fn homes_list(raw: &Value) -> &[Value] {
    for path in ["/body/homes", "/homes", "/plants"] {
        if let Some(Value::Array(homes)) = raw.pointer(path) {
            return homes;
        }
    }
    &[]
}

fn absorb_list<'a>(flat: &mut HashMap<String, &'a Value>, list: Option<&'a Value>) {
    let Some(Value::Array(items)) = list else {
        return;
    };
    for item in items {
        if let Some(id) = item.get("id").and_then(Value::as_str) {
            flat.insert(id.to_string(), item);
        }
    }
}

/// Merge module descriptors nested under rooms/ambients with the home's flat
/// module list into one id-keyed map. Ids are globally unique across the
/// nesting; when the same id shows up in more than one place the flat-list
/// descriptor wins (it carries the full field set).
pub(crate) fn flatten_topology_modules(home: &Value) -> HashMap<String, &Value> {
    let mut flat = HashMap::new();
    for group_key in ["ambients", "rooms"] {
        if let Some(Value::Array(groups)) = home.get(group_key) {
            for group in groups {
                absorb_list(&mut flat, group.get("modules"));
            }
        }
    }
    absorb_list(&mut flat, home.get("modules"));
    flat
}

/// All module status records of a status response, across both generations:
/// a flat `body.home.modules` array, or the legacy per-device-class object
/// `modules.{lights,plugs,remotes,...}`.
pub(crate) fn flatten_status_records(raw: &Value) -> Vec<&Value> {
    for path in ["/body/home/modules", "/home/modules"] {
        if let Some(Value::Array(records)) = raw.pointer(path) {
            return records.iter().collect();
        }
    }
    match raw.get("modules") {
        Some(Value::Array(records)) => records.iter().collect(),
        Some(Value::Object(groups)) => groups
            .values()
            .filter_map(Value::as_array)
            .flatten()
            .collect(),
        _ => Vec::new(),
    }
}

/// Target module id of a status record: flat `id` (current API) or the
/// nested sender path (legacy API). Selected by shape, not by version flag.
pub(crate) fn status_record_id(record: &Value) -> Option<&str> {
    record
        .get("id")
        .and_then(Value::as_str)
        .or_else(|| record.pointer("/sender/plant/module/id").and_then(Value::as_str))
}

fn command_module(module_id: &str, bridge: Option<&str>, field: &str, value: Value) -> Value {
    let mut module = Map::new();
    module.insert("id".to_string(), json!(module_id));
    module.insert(field.to_string(), value);
    if let Some(bridge) = bridge {
        module.insert("bridge".to_string(), json!(bridge));
    }
    Value::Object(module)
}

pub(crate) fn set_switch_data(
    home_id: &str,
    module_id: &str,
    bridge: Option<&str>,
    on: bool,
) -> Value {
    json!({
        "home": {
            "id": home_id,
            "modules": [command_module(module_id, bridge, "on", json!(on))]
        }
    })
}

pub(crate) fn set_position_data(
    home_id: &str,
    module_id: &str,
    bridge: Option<&str>,
    target: i64,
) -> Value {
    json!({
        "home": {
            "id": home_id,
            "modules": [command_module(module_id, bridge, "target_position", json!(target))]
        }
    })
}
