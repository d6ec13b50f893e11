//! Physical inputs and sound outputs known to the TV.
//!
//! Both sets are closed. Mapping between wire identifiers, app identifiers and
//! display names is pure; nothing here is stored state.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use strum::AsRefStr;
use strum::EnumIter;
use strum::EnumString;
use strum::IntoEnumIterator;

/// A physical input on the TV.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumIter, EnumString, Serialize, Deserialize,
)]
pub enum TvInput {
    #[strum(serialize = "HDMI_1")]
    #[serde(rename = "HDMI_1")]
    Hdmi1,
    #[strum(serialize = "HDMI_2")]
    #[serde(rename = "HDMI_2")]
    Hdmi2,
    #[strum(serialize = "HDMI_3")]
    #[serde(rename = "HDMI_3")]
    Hdmi3,
    #[strum(serialize = "HDMI_4")]
    #[serde(rename = "HDMI_4")]
    Hdmi4,
    #[strum(serialize = "DP_1")]
    #[serde(rename = "DP_1")]
    DisplayPort1,
    #[strum(serialize = "DP_2")]
    #[serde(rename = "DP_2")]
    DisplayPort2,
    #[strum(serialize = "USBC_1")]
    #[serde(rename = "USBC_1")]
    UsbC1,
    #[strum(serialize = "USBC_2")]
    #[serde(rename = "USBC_2")]
    UsbC2,
}

impl TvInput {
    /// Identifier used in `tv/switchInput` and the input list.
    pub fn wire_id(&self) -> &'static str {
        match self {
            TvInput::Hdmi1 => "HDMI_1",
            TvInput::Hdmi2 => "HDMI_2",
            TvInput::Hdmi3 => "HDMI_3",
            TvInput::Hdmi4 => "HDMI_4",
            TvInput::DisplayPort1 => "DP_1",
            TvInput::DisplayPort2 => "DP_2",
            TvInput::UsbC1 => "USBC_1",
            TvInput::UsbC2 => "USBC_2",
        }
    }

    /// App that the TV reports in the foreground while this input is showing.
    pub fn app_id(&self) -> &'static str {
        match self {
            TvInput::Hdmi1 => "com.webos.app.hdmi1",
            TvInput::Hdmi2 => "com.webos.app.hdmi2",
            TvInput::Hdmi3 => "com.webos.app.hdmi3",
            TvInput::Hdmi4 => "com.webos.app.hdmi4",
            TvInput::DisplayPort1 => "com.webos.app.dp1",
            TvInput::DisplayPort2 => "com.webos.app.dp2",
            TvInput::UsbC1 => "com.webos.app.usbc1",
            TvInput::UsbC2 => "com.webos.app.usbc2",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TvInput::Hdmi1 => "HDMI 1",
            TvInput::Hdmi2 => "HDMI 2",
            TvInput::Hdmi3 => "HDMI 3",
            TvInput::Hdmi4 => "HDMI 4",
            TvInput::DisplayPort1 => "DisplayPort 1",
            TvInput::DisplayPort2 => "DisplayPort 2",
            TvInput::UsbC1 => "USB-C 1",
            TvInput::UsbC2 => "USB-C 2",
        }
    }

    /// Map a foreground app identifier onto an input.
    ///
    /// Exact matches against the known app ids win. Otherwise the id is
    /// searched for an HDMI, USB-C or DisplayPort marker followed by a slot
    /// number, which covers firmware variants such as
    /// `com.webos.app.externalinput.hdmi2`.
    pub fn from_app_id(app_id: &str) -> Option<TvInput> {
        if let Some(input) = TvInput::iter().find(|i| i.app_id() == app_id) {
            return Some(input);
        }

        let lower = app_id.to_ascii_lowercase();
        let slot = |marker: &str| -> Option<u32> {
            let start = lower.find(marker)? + marker.len();
            lower[start..]
                .trim_start_matches(['_', '-', '.'])
                .chars()
                .next()
                .and_then(|c| c.to_digit(10))
        };

        if let Some(n) = slot("hdmi") {
            return match n {
                1 => Some(TvInput::Hdmi1),
                2 => Some(TvInput::Hdmi2),
                3 => Some(TvInput::Hdmi3),
                4 => Some(TvInput::Hdmi4),
                _ => None,
            };
        }
        if let Some(n) = slot("usbc").or_else(|| slot("usb-c")).or_else(|| slot("typec")) {
            return match n {
                1 => Some(TvInput::UsbC1),
                2 => Some(TvInput::UsbC2),
                _ => None,
            };
        }
        if let Some(n) = slot("displayport").or_else(|| slot("dp")) {
            return match n {
                1 => Some(TvInput::DisplayPort1),
                2 => Some(TvInput::DisplayPort2),
                _ => None,
            };
        }
        None
    }
}

impl fmt::Display for TvInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Where the TV is sending its audio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, AsRefStr, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SoundOutput {
    TvSpeaker,
    #[strum(serialize = "external_arc")]
    Arc,
    #[strum(serialize = "external_optical")]
    Optical,
    Headphone,
    #[default]
    Unknown,
}

impl SoundOutput {
    /// Decode a wire value. Anything outside the known set is `Unknown`.
    pub fn from_wire(value: &str) -> SoundOutput {
        value.parse().unwrap_or(SoundOutput::Unknown)
    }

    pub fn wire_id(&self) -> &str {
        self.as_ref()
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SoundOutput::TvSpeaker => "TV Speaker",
            SoundOutput::Arc => "HDMI ARC",
            SoundOutput::Optical => "Optical",
            SoundOutput::Headphone => "Headphones",
            SoundOutput::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SoundOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// What the TV is currently showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForegroundSource {
    /// One of the physical inputs.
    Input(TvInput),
    /// Any other app (streaming apps, the home screen, ...).
    App(String),
}

impl ForegroundSource {
    /// Classify a foreground app id. An empty id carries no information.
    pub fn from_app_id(app_id: &str) -> Option<ForegroundSource> {
        let app_id = app_id.trim();
        if app_id.is_empty() {
            return None;
        }
        Some(match TvInput::from_app_id(app_id) {
            Some(input) => ForegroundSource::Input(input),
            None => ForegroundSource::App(app_id.to_string()),
        })
    }
}

impl fmt::Display for ForegroundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForegroundSource::Input(input) => write!(f, "{}", input),
            ForegroundSource::App(app_id) => write!(f, "app {}", app_id),
        }
    }
}
