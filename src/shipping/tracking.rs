//! Tracking payload normalization.
//!
//! Shiprocket's tracking endpoints answer in several shapes: fields at the
//! top level, the whole payload keyed under the numeric shipment id, or a
//! `tracking_data` object that is sometimes a one-element array and may
//! carry a `shipment_track` array with the interesting fields. Each output
//! field is resolved through a prioritized rule list over the possible
//! containers, so supporting another shape means adding a rule, not
//! another conditional chain.

use serde::Serialize;
use serde_json::Value;

const TRACK_PAGE: &str = "https://shiprocket.in/shipment-tracking";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingInfo {
    pub awb_code: Option<String>,
    pub courier_name: Option<String>,
    pub current_status: Option<String>,
    pub delivered_date: Option<String>,
    pub scan: Vec<ScanEvent>,
    pub track_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanEvent {
    pub date: String,
    pub time: String,
    pub activity: String,
    pub location: String,
}

/// Where to look for a field, in priority order.
#[derive(Debug, Clone, Copy)]
enum Source {
    /// Top level of the (unwrapped) payload.
    Root(&'static str),
    /// Inside `tracking_data` (first element when it is an array).
    Data(&'static str),
    /// Inside the first `shipment_track` entry.
    Track(&'static str),
}

use Source::{Data, Root, Track};

const AWB_RULES: &[Source] = &[Track("awb_code"), Root("awb_code"), Data("awb_code")];
const COURIER_RULES: &[Source] = &[
    Track("courier_name"),
    Root("courier_name"),
    Data("courier_company_name"),
];
const DELIVERED_RULES: &[Source] = &[
    Track("delivered_date"),
    Root("delivered_date"),
    Data("delivered_date"),
];
const STATUS_TEXT_RULES: &[Source] = &[
    Track("current_status"),
    Root("current_status"),
    Data("current_status"),
];
const STATUS_CODE_RULES: &[Source] = &[
    Data("track_status"),
    Root("track_status"),
    Data("shipment_status"),
];
const SCAN_RULES: &[Source] = &[
    Root("scan"),
    Data("scan"),
    Data("shipment_track_activities"),
    Data("shipment_track"),
];

struct Containers<'a> {
    root: &'a Value,
    data: Option<&'a Value>,
    track: Option<&'a Value>,
}

impl<'a> Containers<'a> {
    fn resolve(root: &'a Value) -> Self {
        let data = match root.get("tracking_data") {
            Some(Value::Array(items)) => items.first(),
            Some(value) => Some(value),
            None => None,
        };
        let track = data
            .and_then(|d| d.get("shipment_track"))
            .and_then(Value::as_array)
            .and_then(|entries| entries.first());

        Self { root, data, track }
    }

    fn get(&self, source: Source) -> Option<&'a Value> {
        match source {
            Root(key) => self.root.get(key),
            Data(key) => self.data?.get(key),
            Track(key) => self.track?.get(key),
        }
    }

    /// First present value wins; a present-but-blank string resolves to
    /// nothing rather than falling through to a lower-priority container.
    fn pick_str(&self, rules: &[Source]) -> Option<String> {
        let value = rules.iter().find_map(|source| self.get(*source))?;
        let text = value.as_str()?;
        if text.trim().is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }

    fn pick_i64(&self, rules: &[Source]) -> Option<i64> {
        rules
            .iter()
            .find_map(|source| self.get(*source))
            .and_then(Value::as_i64)
    }

    fn pick_array(&self, rules: &[Source]) -> &'a [Value] {
        rules
            .iter()
            .find_map(|source| self.get(*source))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Normalizes a raw tracking payload. Pure; never fails. A payload that
/// carries none of the known fields yields an all-empty record with the
/// bare tracking page URL.
pub fn normalize(raw: &Value) -> TrackingInfo {
    let root = unwrap_shipment_key(raw);
    let containers = Containers::resolve(root);

    let awb_code = containers.pick_str(AWB_RULES);
    let current_status = containers.pick_str(STATUS_TEXT_RULES).or_else(|| {
        containers
            .pick_i64(STATUS_CODE_RULES)
            .map(ship_status_text)
    });

    let scan = containers
        .pick_array(SCAN_RULES)
        .iter()
        .filter_map(Value::as_object)
        .map(|entry| ScanEvent {
            date: scan_field(entry, &["date", "Date", "updated_time_stamp"]),
            time: scan_field(entry, &["time", "Time"]),
            activity: scan_field(entry, &["activity", "status", "description", "current_status"]),
            location: scan_field(entry, &["location", "city", "origin", "destination"]),
        })
        .collect();

    let track_url = match &awb_code {
        Some(awb) => format!("{TRACK_PAGE}?awb={awb}"),
        None => TRACK_PAGE.to_string(),
    };

    TrackingInfo {
        awb_code,
        courier_name: containers.pick_str(COURIER_RULES),
        current_status,
        delivered_date: containers.pick_str(DELIVERED_RULES),
        scan,
        track_url,
    }
}

/// Unwraps the `{ "<shipment id>": payload }` variant.
fn unwrap_shipment_key(raw: &Value) -> &Value {
    if let Some(map) = raw.as_object() {
        if map.len() == 1 {
            if let Some((key, inner)) = map.iter().next() {
                if !key.is_empty() && key.chars().all(|c| c.is_ascii_digit()) && inner.is_object()
                {
                    return inner;
                }
            }
        }
    }
    raw
}

fn scan_field(entry: &serde_json::Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| entry.get(*key).and_then(text_of))
        .unwrap_or_default()
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn ship_status_text(code: i64) -> String {
    match code {
        0 => "Not dispatched".into(),
        1 => "Dispatched".into(),
        2 => "In transit".into(),
        3 => "Out for delivery".into(),
        4 => "Delivered".into(),
        5 => "Cancelled".into(),
        6 => "RTO".into(),
        7 => "Undelivered".into(),
        other => format!("Status {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat_shape() -> Value {
        json!({
            "awb_code": "AWB123456",
            "courier_name": "Delhivery",
            "current_status": "In Transit",
            "scan": [
                {"date": "2025-03-02", "time": "10:20", "activity": "Picked up", "location": "Mumbai"},
                {"date": "2025-03-03", "time": "08:05", "activity": "In transit", "location": "Pune"}
            ]
        })
    }

    fn shipment_keyed_shape() -> Value {
        json!({ "4521009": flat_shape() })
    }

    fn tracking_data_array_shape() -> Value {
        json!({
            "tracking_data": [{
                "shipment_track": [{
                    "awb_code": "AWB123456",
                    "courier_name": "Delhivery",
                    "current_status": "In Transit"
                }],
                "shipment_track_activities": [
                    {"date": "2025-03-02", "time": "10:20", "activity": "Picked up", "location": "Mumbai"},
                    {"date": "2025-03-03", "time": "08:05", "activity": "In transit", "location": "Pune"}
                ]
            }]
        })
    }

    #[test]
    fn equivalent_shapes_normalize_identically() {
        let from_flat = normalize(&flat_shape());
        let from_keyed = normalize(&shipment_keyed_shape());
        let from_array = normalize(&tracking_data_array_shape());

        assert_eq!(from_flat, from_keyed);
        assert_eq!(from_flat, from_array);

        assert_eq!(from_flat.awb_code.as_deref(), Some("AWB123456"));
        assert_eq!(from_flat.courier_name.as_deref(), Some("Delhivery"));
        assert_eq!(from_flat.current_status.as_deref(), Some("In Transit"));
        assert_eq!(from_flat.scan.len(), 2);
        assert_eq!(from_flat.scan[0].location, "Mumbai");
        assert_eq!(
            from_flat.track_url,
            "https://shiprocket.in/shipment-tracking?awb=AWB123456"
        );
    }

    #[test]
    fn numeric_status_code_maps_to_text() {
        let raw = json!({"tracking_data": {"track_status": 4, "awb_code": "AWB9"}});
        let info = normalize(&raw);
        assert_eq!(info.current_status.as_deref(), Some("Delivered"));
        assert_eq!(info.awb_code.as_deref(), Some("AWB9"));
    }

    #[test]
    fn unknown_status_code_falls_back_to_generic_text() {
        let raw = json!({"tracking_data": {"shipment_status": 9}});
        let info = normalize(&raw);
        assert_eq!(info.current_status.as_deref(), Some("Status 9"));
    }

    #[test]
    fn status_text_beats_status_code() {
        let raw = json!({
            "current_status": "Out for delivery",
            "tracking_data": {"track_status": 2}
        });
        let info = normalize(&raw);
        assert_eq!(info.current_status.as_deref(), Some("Out for delivery"));
    }

    #[test]
    fn empty_payload_yields_all_empty_record_with_bare_url() {
        let info = normalize(&json!({}));
        assert_eq!(info.awb_code, None);
        assert_eq!(info.courier_name, None);
        assert_eq!(info.current_status, None);
        assert_eq!(info.delivered_date, None);
        assert!(info.scan.is_empty());
        assert_eq!(info.track_url, "https://shiprocket.in/shipment-tracking");
    }

    #[test]
    fn blank_awb_does_not_parameterize_the_url() {
        let info = normalize(&json!({"awb_code": "   "}));
        assert_eq!(info.awb_code, None);
        assert_eq!(info.track_url, "https://shiprocket.in/shipment-tracking");
    }

    #[test]
    fn scan_entries_accept_alternate_field_names() {
        let raw = json!({
            "scan": [
                {"Date": "2025-03-02", "Time": "10:20", "status": "Shipped", "city": "Jaipur"},
                {"updated_time_stamp": "2025-03-03 08:10", "description": "Arrived at hub", "origin": "Delhi"}
            ]
        });
        let info = normalize(&raw);
        assert_eq!(info.scan.len(), 2);
        assert_eq!(info.scan[0].date, "2025-03-02");
        assert_eq!(info.scan[0].activity, "Shipped");
        assert_eq!(info.scan[0].location, "Jaipur");
        assert_eq!(info.scan[1].date, "2025-03-03 08:10");
        assert_eq!(info.scan[1].time, "");
        assert_eq!(info.scan[1].location, "Delhi");
    }

    #[test]
    fn delivered_date_is_carried_through() {
        let raw = json!({
            "tracking_data": {
                "shipment_track": [{"delivered_date": "2025-03-05 14:32:00"}]
            }
        });
        let info = normalize(&raw);
        assert_eq!(info.delivered_date.as_deref(), Some("2025-03-05 14:32:00"));
    }

    #[test]
    fn non_numeric_single_key_is_not_unwrapped() {
        let raw = json!({"message": "no data"});
        let info = normalize(&raw);
        assert_eq!(info.awb_code, None);
        assert!(info.scan.is_empty());
    }
}
