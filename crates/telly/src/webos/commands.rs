//! Commands the client can send and their SSAP encoding.

use serde_json::json;
use serde_json::Value;

use super::inputs::SoundOutput;
use super::inputs::TvInput;

/// A request the TV understands.
///
/// Each command maps to exactly one SSAP URI plus an optional payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TvCommand {
    PowerOff,
    ScreenOn,
    ScreenOff,
    VolumeUp,
    VolumeDown,
    SetVolume(u8),
    GetVolume,
    Mute,
    Unmute,
    SetInput(TvInput),
    GetInputList,
    /// Relabel an input; used to put an HDMI port into PC mode.
    SetDeviceInfo {
        input: TvInput,
        icon: String,
        label: String,
    },
    GetForegroundApp,
    GetSoundOutput,
    SetSoundOutput(SoundOutput),
}

impl TvCommand {
    /// Relabel `input` as a PC.
    pub fn pc_mode(input: TvInput) -> Self {
        TvCommand::SetDeviceInfo {
            input,
            icon: "pc.png".to_string(),
            label: "PC".to_string(),
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            TvCommand::PowerOff => "ssap://system/turnOff",
            TvCommand::ScreenOn => "ssap://com.webos.service.tvpower/power/turnOnScreen",
            TvCommand::ScreenOff => "ssap://com.webos.service.tvpower/power/turnOffScreen",
            TvCommand::VolumeUp => "ssap://audio/volumeUp",
            TvCommand::VolumeDown => "ssap://audio/volumeDown",
            TvCommand::SetVolume(_) => "ssap://audio/setVolume",
            TvCommand::GetVolume => "ssap://audio/getVolume",
            TvCommand::Mute => "ssap://audio/mute",
            TvCommand::Unmute => "ssap://audio/unmute",
            TvCommand::SetInput(_) => "ssap://tv/switchInput",
            TvCommand::GetInputList => "ssap://tv/getInputList",
            TvCommand::SetDeviceInfo { .. } => "ssap://com.webos.service.eim/setDeviceInfo",
            TvCommand::GetForegroundApp => {
                "ssap://com.webos.applicationManager/getForegroundAppInfo"
            }
            TvCommand::GetSoundOutput => {
                "ssap://com.webos.service.apiadapter/audio/getSoundOutput"
            }
            TvCommand::SetSoundOutput(_) => {
                "ssap://com.webos.service.apiadapter/audio/changeSoundOutput"
            }
        }
    }

    pub fn payload(&self) -> Option<Value> {
        match self {
            TvCommand::SetVolume(level) => Some(json!({ "volume": level })),
            TvCommand::SetInput(input) => Some(json!({ "inputId": input.wire_id() })),
            TvCommand::SetDeviceInfo { input, icon, label } => Some(json!({
                "id": input.wire_id(),
                "icon": icon,
                "label": label,
            })),
            TvCommand::SetSoundOutput(output) => Some(json!({ "output": output.wire_id() })),
            _ => None,
        }
    }
}
