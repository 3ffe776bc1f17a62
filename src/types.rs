use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// HVAC mode accepted by the thermostat `settings.hvacMode` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ModeCommand {
    Heat,
    Off,
    AuxHeatOnly,
    Cool,
    Auto,
}

impl ModeCommand {
    pub const ALL: [ModeCommand; 5] = [
        ModeCommand::Heat,
        ModeCommand::Off,
        ModeCommand::AuxHeatOnly,
        ModeCommand::Cool,
        ModeCommand::Auto,
    ];

    pub fn as_api_str(&self) -> &'static str {
        match self {
            ModeCommand::Heat => "heat",
            ModeCommand::Off => "off",
            ModeCommand::AuxHeatOnly => "auxHeatOnly",
            ModeCommand::Cool => "cool",
            ModeCommand::Auto => "auto",
        }
    }
}

impl fmt::Display for ModeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_str())
    }
}

impl FromStr for ModeCommand {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "heat" => Ok(ModeCommand::Heat),
            "off" => Ok(ModeCommand::Off),
            "cool" => Ok(ModeCommand::Cool),
            "auto" => Ok(ModeCommand::Auto),
            "aux" | "auxheat" | "auxheatonly" | "aux-heat-only" | "emergency" => {
                Ok(ModeCommand::AuxHeatOnly)
            }
            _ => Err(Error::Usage(format!(
                "Unknown mode '{}'. Expected one of: heat, cool, off, auto, aux",
                input
            ))),
        }
    }
}

/// The API's selection object: which thermostat(s) a request targets.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub selection_type: String,
    pub selection_match: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub include_settings: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub include_runtime: bool,
}

impl Selection {
    pub fn thermostat(identifier: &str) -> Self {
        Self {
            selection_type: "thermostats".to_string(),
            selection_match: identifier.to_string(),
            include_settings: false,
            include_runtime: false,
        }
    }

    pub fn registered() -> Self {
        Self {
            selection_type: "registered".to_string(),
            selection_match: String::new(),
            include_settings: false,
            include_runtime: false,
        }
    }

    fn with_details(mut self) -> Self {
        self.include_settings = true;
        self.include_runtime = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub hvac_mode: ModeCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThermostatPatch {
    pub settings: SettingsPatch,
}

/// Body of the POST that changes the HVAC mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeUpdate {
    pub selection: Selection,
    pub thermostat: ThermostatPatch,
}

impl ModeUpdate {
    pub fn new(thermostat_id: &str, mode: ModeCommand) -> Self {
        Self {
            selection: Selection::thermostat(thermostat_id),
            thermostat: ThermostatPatch {
                settings: SettingsPatch { hvac_mode: mode },
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ReadQuery<'a> {
    selection: &'a Selection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}

/// One unit of work handed to the session.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
    /// `None` targets every thermostat registered to the account.
    pub target: Option<String>,
    pub payload: Option<ModeUpdate>,
    /// Only write operations may save refreshed tokens; diagnostics leave the
    /// credential file untouched.
    pub allow_persist_refresh: bool,
}

impl Operation {
    pub fn set_mode(thermostat_id: &str, mode: ModeCommand) -> Self {
        Self {
            kind: OperationKind::Write,
            target: Some(thermostat_id.to_string()),
            payload: Some(ModeUpdate::new(thermostat_id, mode)),
            allow_persist_refresh: true,
        }
    }

    pub fn read_thermostat(thermostat_id: &str) -> Self {
        Self {
            kind: OperationKind::Read,
            target: Some(thermostat_id.to_string()),
            payload: None,
            allow_persist_refresh: false,
        }
    }

    pub fn list_thermostats() -> Self {
        Self {
            kind: OperationKind::Read,
            target: None,
            payload: None,
            allow_persist_refresh: false,
        }
    }

    fn selection(&self) -> Selection {
        match &self.target {
            Some(id) => Selection::thermostat(id),
            None => Selection::registered(),
        }
    }

    /// Builds and serializes the HTTP request without touching the network.
    /// Dry runs print exactly this; live runs send exactly this.
    pub fn prepare(&self, api_base: &str) -> Result<PreparedRequest> {
        let endpoint = format!("{}/1/thermostat", api_base.trim_end_matches('/'));

        match self.kind {
            OperationKind::Write => {
                let payload = self.payload.as_ref().ok_or_else(|| {
                    Error::Usage("Write operation requires a payload".to_string())
                })?;
                let url = Url::parse_with_params(&endpoint, &[("format", "json")])
                    .map_err(|e| Error::Usage(format!("Invalid API URL '{}': {}", api_base, e)))?;
                Ok(PreparedRequest {
                    method: Method::POST,
                    url,
                    body: Some(serde_json::to_string(payload)?),
                })
            }
            OperationKind::Read => {
                let selection = self.selection().with_details();
                let query = serde_json::to_string(&ReadQuery {
                    selection: &selection,
                })?;
                let url = Url::parse_with_params(&endpoint, &[("json", query.as_str())])
                    .map_err(|e| Error::Usage(format!("Invalid API URL '{}': {}", api_base, e)))?;
                Ok(PreparedRequest {
                    method: Method::GET,
                    url,
                    body: None,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<String>,
}

/// Status code and body of one HTTP exchange, whatever the status.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Final response of one operation, after at most one refresh-and-retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub http_status: u16,
    pub body: String,
    pub api_status_code: Option<i64>,
    pub refreshed: bool,
}

impl RequestOutcome {
    pub fn new(response: RawResponse, refreshed: bool) -> Self {
        let api_status_code = serde_json::from_str::<Envelope>(&response.body)
            .ok()
            .and_then(|envelope| envelope.status)
            .map(|status| status.code);

        Self {
            http_status: response.status,
            body: response.body,
            api_status_code,
            refreshed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiStatus {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Top-level object every API response is wrapped in.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub status: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermostatResponse {
    #[serde(default)]
    pub thermostat_list: Vec<Thermostat>,
    pub status: Option<ApiStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thermostat {
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    pub settings: Option<ThermostatSettings>,
    pub runtime: Option<ThermostatRuntime>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermostatSettings {
    pub hvac_mode: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermostatRuntime {
    #[serde(default)]
    pub connected: bool,
    /// Tenths of a degree Fahrenheit.
    pub actual_temperature: Option<i64>,
    pub actual_humidity: Option<i64>,
}

impl Thermostat {
    pub fn hvac_mode(&self) -> &str {
        self.settings
            .as_ref()
            .map(|s| s.hvac_mode.as_str())
            .unwrap_or("unknown")
    }

    pub fn temperature_display(&self) -> String {
        match self.runtime.as_ref().and_then(|r| r.actual_temperature) {
            Some(tenths) => format!("{:.1}°F", tenths as f64 / 10.0),
            None => "-".to_string(),
        }
    }

    pub fn humidity_display(&self) -> String {
        match self.runtime.as_ref().and_then(|r| r.actual_humidity) {
            Some(pct) => format!("{}%", pct),
            None => "-".to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.runtime.as_ref().map(|r| r.connected).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing_is_case_insensitive() {
        assert_eq!("HEAT".parse::<ModeCommand>().unwrap(), ModeCommand::Heat);
        assert_eq!("Cool".parse::<ModeCommand>().unwrap(), ModeCommand::Cool);
        assert_eq!("off".parse::<ModeCommand>().unwrap(), ModeCommand::Off);
        assert_eq!(" auto ".parse::<ModeCommand>().unwrap(), ModeCommand::Auto);
        assert_eq!("AUX".parse::<ModeCommand>().unwrap(), ModeCommand::AuxHeatOnly);
        assert_eq!(
            "auxHeatOnly".parse::<ModeCommand>().unwrap(),
            ModeCommand::AuxHeatOnly
        );
    }

    #[test]
    fn test_unknown_mode_is_a_usage_error() {
        for input in ["", "warm", "heatcool", "aux heat"] {
            let err = input.parse::<ModeCommand>().unwrap_err();
            assert_eq!(err.exit_code(), 2, "input {:?}", input);
        }
    }

    #[test]
    fn test_canonical_values_round_trip_through_parser() {
        for mode in ModeCommand::ALL {
            assert_eq!(mode.as_api_str().parse::<ModeCommand>().unwrap(), mode);
            assert_eq!(
                serde_json::to_value(mode).unwrap(),
                serde_json::Value::String(mode.as_api_str().to_string())
            );
        }
    }

    #[test]
    fn test_mode_update_serialization() {
        let update = ModeUpdate::new("311000000001", ModeCommand::AuxHeatOnly);
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "selection": {
                    "selectionType": "thermostats",
                    "selectionMatch": "311000000001"
                },
                "thermostat": {
                    "settings": { "hvacMode": "auxHeatOnly" }
                }
            })
        );
    }

    #[test]
    fn test_prepare_write_request() {
        let op = Operation::set_mode("311000000001", ModeCommand::Heat);
        let request = op.prepare("https://api.ecobee.com/").unwrap();

        assert_eq!(request.method, Method::POST);
        assert_eq!(
            request.url.as_str(),
            "https://api.ecobee.com/1/thermostat?format=json"
        );
        let body: serde_json::Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["thermostat"]["settings"]["hvacMode"], "heat");
        assert!(op.allow_persist_refresh);
    }

    #[test]
    fn test_prepare_read_request_has_no_body() {
        let op = Operation::read_thermostat("311000000001");
        let request = op.prepare("https://api.ecobee.com").unwrap();

        assert_eq!(request.method, Method::GET);
        assert!(request.body.is_none());
        assert!(!op.allow_persist_refresh);

        let query = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "json")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let query: serde_json::Value = serde_json::from_str(&query).unwrap();
        assert_eq!(query["selection"]["selectionMatch"], "311000000001");
        assert_eq!(query["selection"]["includeSettings"], true);
        assert_eq!(query["selection"]["includeRuntime"], true);
    }

    #[test]
    fn test_list_selects_registered_thermostats() {
        let request = Operation::list_thermostats()
            .prepare("https://api.ecobee.com")
            .unwrap();
        let query = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "json")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(query.contains(r#""selectionType":"registered""#));
    }

    #[test]
    fn test_invalid_api_base_is_rejected() {
        let err = Operation::list_thermostats().prepare("not a url").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_outcome_extracts_nested_status_code() {
        let outcome = RequestOutcome::new(
            RawResponse {
                status: 200,
                body: r#"{"status":{"code":0,"message":""}}"#.to_string(),
            },
            false,
        );
        assert_eq!(outcome.api_status_code, Some(0));

        let outcome = RequestOutcome::new(
            RawResponse {
                status: 502,
                body: "<html>Bad Gateway</html>".to_string(),
            },
            true,
        );
        assert_eq!(outcome.api_status_code, None);
        assert!(outcome.refreshed);
    }

    #[test]
    fn test_thermostat_response_parsing() {
        let json = r#"{
            "page": {"page": 1, "totalPages": 1, "pageSize": 1, "total": 1},
            "thermostatList": [{
                "identifier": "311000000001",
                "name": "Hallway",
                "settings": {"hvacMode": "heat"},
                "runtime": {"connected": true, "actualTemperature": 685, "actualHumidity": 41}
            }],
            "status": {"code": 0, "message": ""}
        }"#;

        let response: ThermostatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.thermostat_list.len(), 1);
        let thermostat = &response.thermostat_list[0];
        assert_eq!(thermostat.name, "Hallway");
        assert_eq!(thermostat.hvac_mode(), "heat");
        assert_eq!(thermostat.temperature_display(), "68.5°F");
        assert_eq!(thermostat.humidity_display(), "41%");
        assert!(thermostat.is_connected());
    }
}
