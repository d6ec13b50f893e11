use std::net::IpAddr;

use serde::Deserialize;
use serde::Serialize;

use crate::webos::TvInput;

/// The TV this controller drives, plus the user's automation choices.
///
/// Replaced wholesale on save; nothing mutates it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TvConfiguration {
    /// Human-readable name
    pub name: String,

    /// Address of the TV on the local network
    pub ip_address: IpAddr,

    /// Hardware address used for wake packets
    pub mac_address: String,

    /// Input the host computer is plugged into
    pub preferred_input: TvInput,

    /// Connect when the daemon starts
    #[serde(default)]
    pub auto_connect: bool,

    /// Turn the TV on when the host wakes
    #[serde(default)]
    pub wake_with_host: bool,

    /// Turn the TV off when the host sleeps
    #[serde(default)]
    pub sleep_with_host: bool,

    /// Switch to `preferred_input` after waking the TV
    #[serde(default)]
    pub switch_input_on_wake: bool,

    /// Label `preferred_input` as a PC so the TV uses PC picture processing
    #[serde(default)]
    pub enable_pc_mode: bool,
}

impl TvConfiguration {
    pub fn new(name: impl Into<String>, ip_address: IpAddr, mac_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip_address,
            mac_address: mac_address.into(),
            preferred_input: TvInput::Hdmi1,
            auto_connect: false,
            wake_with_host: false,
            sleep_with_host: false,
            switch_input_on_wake: false,
            enable_pc_mode: false,
        }
    }

    /// Key under which the pairing key for this TV is stored.
    pub fn key_address(&self) -> String {
        self.ip_address.to_string()
    }
}
