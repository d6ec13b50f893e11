//! SSAP wire format.
//!
//! Outbound frames are `{id, type, uri?, payload?}` JSON objects. Inbound frames
//! carry a `type` discriminator, but their payloads mix unrelated fields, so
//! they are inspected by key presence and converted into [`PayloadFields`]
//! here. Untyped JSON does not leave this module.

use serde::Serialize;
use serde_json::json;
use serde_json::Value;

use super::commands::TvCommand;

/// Permissions requested during registration.
const PERMISSIONS: &[&str] = &[
    "LAUNCH",
    "LAUNCH_WEBAPP",
    "APP_TO_APP",
    "CLOSE",
    "TEST_OPEN",
    "TEST_PROTECTED",
    "CONTROL_AUDIO",
    "CONTROL_DISPLAY",
    "CONTROL_INPUT_JOYSTICK",
    "CONTROL_INPUT_MEDIA_RECORDING",
    "CONTROL_INPUT_MEDIA_PLAYBACK",
    "CONTROL_INPUT_TV",
    "CONTROL_POWER",
    "CONTROL_TV_SCREEN",
    "READ_APP_STATUS",
    "READ_CURRENT_CHANNEL",
    "READ_INPUT_DEVICE_LIST",
    "READ_NETWORK_STATE",
    "READ_RUNNING_APPS",
    "READ_TV_CHANNEL_LIST",
    "READ_SETTINGS",
    "WRITE_SETTINGS",
    "WRITE_NOTIFICATION_TOAST",
    "READ_POWER_STATE",
    "READ_COUNTRY_INFO",
];

/// Covered by the manifest signature; must not be edited.
const SIGNED_PERMISSIONS: &[&str] = &[
    "TEST_SECURE",
    "CONTROL_INPUT_TEXT",
    "CONTROL_MOUSE_AND_KEYBOARD",
    "READ_INSTALLED_APPS",
    "READ_LGE_SDX",
    "READ_NOTIFICATIONS",
    "SEARCH",
    "WRITE_SETTINGS",
    "WRITE_NOTIFICATION_ALERT",
    "CONTROL_POWER",
    "READ_CURRENT_CHANNEL",
    "READ_RUNNING_APPS",
    "READ_UPDATE_INFO",
    "UPDATE_FROM_REMOTE_APP",
    "READ_LGE_TV_INPUT_EVENTS",
    "READ_TV_CURRENT_TIME",
];

const MANIFEST_SIGNATURE: &str = "eyJhbGdvcml0aG0iOiJSU0EtU0hBMjU2Iiwia2V5SWQiOiJ0ZXN0LXNpZ25pbmctY2VydCIsInNpZ25hdHVyZVZlcnNpb24iOjF9.hrVRgjCwXVvE2OOSpDZ58hR+59aFNwYDyjQgKk3auukd7pcegmE2CzPCa0bJ0ZsRAcKkCTJrWo5iDzNhMBWRyaMOv5zWSrthlf7G128qvIlpMT0YNY+n/FaOHE73uLrS/g7swl3/qH/BGFG2Hu4RlL48eb3lLKqTt2xKHdCs6Cd4RMfJPYnzgvI4BNrFUKsjkcu+WD4OO2A27Pq1n50cMchmcaXadJhGrOqH5YmHdOCj5NSHzJYrsW0HPlpuAx/ECMeIZYDh6RMqaFM2DXzdKX9NmmyqzJ3o/0lkk/N97gfVRLW5hA29yeAwaCViZNCP8iC9aO0q9fQojoa7NQnAtw==";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,
}

/// How an outbound request is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// One reply.
    Request,
    /// A reply now and another every time the value changes.
    Subscribe,
}

impl RequestKind {
    fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Request => "request",
            RequestKind::Subscribe => "subscribe",
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    uri: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

/// Encode a command as a request or subscription frame.
pub fn encode_request(id: &str, kind: RequestKind, command: &TvCommand) -> String {
    let envelope = Envelope {
        id,
        kind: kind.as_str(),
        uri: Some(command.uri()),
        payload: command.payload(),
    };
    // Serializing a struct of strings and a Value cannot fail.
    serde_json::to_string(&envelope).unwrap_or_default()
}

/// Encode the registration frame. `client_key` skips the pairing prompt.
pub fn encode_register(id: &str, client_key: Option<&str>) -> String {
    let mut payload = json!({
        "forcePairing": false,
        "pairingType": "PROMPT",
        "manifest": {
            "manifestVersion": 1,
            "appVersion": "1.1",
            "signed": {
                "created": "20140509",
                "appId": "com.lge.test",
                "vendorId": "com.lge",
                "localizedAppNames": {
                    "": "LG Remote App",
                },
                "localizedVendorNames": {
                    "": "LG Electronics",
                },
                "permissions": SIGNED_PERMISSIONS,
                "serial": "2f930e2d2cfe083771f68e4fe7bb07",
            },
            "permissions": PERMISSIONS,
            "signatures": [
                {
                    "signatureVersion": 1,
                    "signature": MANIFEST_SIGNATURE,
                }
            ],
        },
    });

    if let Some(key) = client_key {
        payload["client-key"] = Value::String(key.to_string());
    }

    let envelope = Envelope {
        id,
        kind: "register",
        uri: None,
        payload: Some(payload),
    };
    serde_json::to_string(&envelope).unwrap_or_default()
}

/// Declared type of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Registered,
    Response,
    Push,
    Error,
    Other(String),
}

impl MessageType {
    fn from_wire(value: &str) -> Self {
        match value {
            "registered" => MessageType::Registered,
            "response" => MessageType::Response,
            "push" => MessageType::Push,
            "error" => MessageType::Error,
            other => MessageType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Registered => "registered",
            MessageType::Response => "response",
            MessageType::Push => "push",
            MessageType::Error => "error",
            MessageType::Other(other) => other,
        }
    }
}

/// Volume as reported by the TV. `muted` is absent in some payload shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStatus {
    pub volume: u8,
    pub muted: Option<bool>,
}

/// One entry of the TV's input list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    pub id: String,
    pub label: Option<String>,
    pub icon: Option<String>,
}

/// Recognised fields of an inbound payload. Every field is optional; several
/// may be present in the same frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadFields {
    pub volume: Option<VolumeStatus>,
    pub app_id: Option<String>,
    pub devices: Option<Vec<InputDevice>>,
    pub sound_output: Option<String>,
    pub client_key: Option<String>,
    pub pairing_type: Option<String>,
    pub return_value: Option<bool>,
    pub error_text: Option<String>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub kind: MessageType,
    pub id: Option<String>,
    /// Top-level `error` text of an error envelope.
    pub error: Option<String>,
    pub fields: PayloadFields,
}

impl Inbound {
    /// Failure text if this frame reports one for a request.
    pub fn failure(&self) -> Option<String> {
        if self.kind == MessageType::Error {
            return Some(
                self.error
                    .clone()
                    .or_else(|| self.fields.error_text.clone())
                    .unwrap_or_else(|| "unknown error".to_string()),
            );
        }
        if self.fields.return_value == Some(false) {
            return Some(
                self.fields
                    .error_text
                    .clone()
                    .unwrap_or_else(|| "returnValue false".to_string()),
            );
        }
        None
    }
}

/// Decode an inbound text frame.
pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

    let kind = MessageType::from_wire(object.get("type").and_then(Value::as_str).unwrap_or(""));
    let id = object.get("id").and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let error = object
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string);
    let fields = object
        .get("payload")
        .map(payload_fields)
        .unwrap_or_default();

    Ok(Inbound {
        kind,
        id,
        error,
        fields,
    })
}

fn payload_fields(payload: &Value) -> PayloadFields {
    let text = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);

    PayloadFields {
        volume: volume_status(payload),
        app_id: text("appId"),
        devices: payload
            .get("devices")
            .and_then(Value::as_array)
            .map(|devices| devices.iter().filter_map(input_device).collect()),
        sound_output: text("soundOutput"),
        client_key: text("client-key"),
        pairing_type: text("pairingType"),
        return_value: payload.get("returnValue").and_then(Value::as_bool),
        error_text: text("errorText"),
    }
}

fn volume_status(payload: &Value) -> Option<VolumeStatus> {
    // Newer firmware nests the values under `volumeStatus`.
    if let Some(status) = payload.get("volumeStatus") {
        let volume = status.get("volume").and_then(Value::as_u64)?;
        return Some(VolumeStatus {
            volume: volume.min(100) as u8,
            muted: status.get("muteStatus").and_then(Value::as_bool),
        });
    }

    let volume = payload.get("volume").and_then(Value::as_u64)?;
    Some(VolumeStatus {
        volume: volume.min(100) as u8,
        muted: payload
            .get("muted")
            .or_else(|| payload.get("mute"))
            .and_then(Value::as_bool),
    })
}

fn input_device(device: &Value) -> Option<InputDevice> {
    let id = device.get("id").and_then(Value::as_str)?;
    Some(InputDevice {
        id: id.to_string(),
        label: device.get("label").and_then(Value::as_str).map(str::to_string),
        icon: device.get("icon").and_then(Value::as_str).map(str::to_string),
    })
}
