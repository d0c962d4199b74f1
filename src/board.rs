//! Static description of the target board: which pins exist and how the generated code refers to them.

use alloc::collections::BTreeMap;
use alloc::string::String;

use compact_str::CompactString;
use num_derive::FromPrimitive;

#[cfg(feature = "serde")]
use serde::{Serialize, Deserialize};

use crate::value::is_identifier;

/// The direction/peripheral a pin is currently configured for on the device.
///
/// The discriminants are the codes stored in the device's `cfg.p` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum PinMode {
    Output = 0,
    Input = 1,
    Pwm = 2,
    Analog = 3,
}
impl PinMode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Maps the pin numbers printed on the board to the names lua-rtos uses for them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct Pinout {
    /// Digital outputs, referenced as `pio.<name>`.
    pub digital_output: BTreeMap<u32, CompactString>,
    /// Digital inputs, referenced as `pio.<name>`.
    pub digital_input: BTreeMap<u32, CompactString>,
    /// Analog inputs, given as an adc channel number.
    pub analog_input: BTreeMap<u32, CompactString>,
    /// PWM-capable outputs, referenced as `pio.<name>`.
    pub analog_output: BTreeMap<u32, CompactString>,
}
impl Pinout {
    /// Checks if `pin` is exposed as a digital pin in either direction.
    pub fn is_digital(&self, pin: u32) -> bool {
        self.digital_output.contains_key(&pin) || self.digital_input.contains_key(&pin)
    }
}

/// Connection details of the MQTT broker used by the messaging blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Broker {
    pub url: CompactString,
    #[cfg_attr(feature = "serde", serde(default = "default_port"))]
    pub port: u16,
    #[cfg_attr(feature = "serde", serde(alias = "deviceID"))]
    pub device_id: CompactString,
    #[cfg_attr(feature = "serde", serde(default))]
    pub username: CompactString,
    #[cfg_attr(feature = "serde", serde(default))]
    pub password: CompactString,
}
#[cfg(feature = "serde")]
fn default_port() -> u16 { 1883 }

/// Everything the compiler needs to know about the board it targets.
///
/// A missing pinout or broker is not an error: the blocks that need them compile to nothing and are reported once.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoardConfig {
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: CompactString,
    #[cfg_attr(feature = "serde", serde(default))]
    pub pinout: Option<Pinout>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub broker: Option<Broker>,
}

#[derive(Debug)]
pub enum BoardConfigError {
    Json { error: serde_json::Error },
    BadPinName { pin: u32, name: CompactString },
}
impl From<serde_json::Error> for BoardConfigError { fn from(error: serde_json::Error) -> Self { Self::Json { error } } }
impl core::fmt::Display for BoardConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            BoardConfigError::Json { error } => write!(f, "invalid board config: {error}"),
            BoardConfigError::BadPinName { pin, name } => write!(f, "pin {pin} has a name that is not a lua identifier: {name:?}"),
        }
    }
}

impl BoardConfig {
    /// Loads a board description in the same json layout the editor ships its boards in.
    #[cfg(feature = "serde")]
    pub fn from_json(content: &str) -> Result<Self, BoardConfigError> {
        let res: Self = serde_json::from_str(content)?;
        res.validate()?;
        Ok(res)
    }
    /// Makes sure every pin name can be spliced into generated code as-is.
    pub fn validate(&self) -> Result<(), BoardConfigError> {
        let pinout = match &self.pinout {
            Some(x) => x,
            None => return Ok(()),
        };
        let named = pinout.digital_output.iter().chain(&pinout.digital_input).chain(&pinout.analog_output);
        for (pin, name) in named {
            if !is_identifier(name) {
                return Err(BoardConfigError::BadPinName { pin: *pin, name: name.clone() });
            }
        }
        for (pin, channel) in pinout.analog_input.iter() {
            if channel.is_empty() || !channel.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.') {
                return Err(BoardConfigError::BadPinName { pin: *pin, name: channel.clone() });
            }
        }
        Ok(())
    }
    /// The lua statement that connects the shared MQTT client if it is not connected yet.
    pub fn mqtt_connection_code(&self) -> Option<String> {
        use crate::value::quote;
        self.broker.as_ref().map(|broker| format!(
            "if cfg.m == nil then cfg.m = mqtt.client({}, {}, {}, false) cfg.m:connect({}, {}) end",
            quote(&broker.device_id), quote(&broker.url), broker.port, quote(&broker.username), quote(&broker.password),
        ))
    }
}

#[test]
fn test_pin_mode_codes() {
    use num_traits::FromPrimitive;
    assert_eq!(PinMode::from_u8(0), Some(PinMode::Output));
    assert_eq!(PinMode::from_u8(1), Some(PinMode::Input));
    assert_eq!(PinMode::from_u8(3), Some(PinMode::Analog));
    assert_eq!(PinMode::from_u8(9), None);
    assert_eq!(PinMode::Pwm.code(), 2);
}

#[test]
fn test_mqtt_connection_code() {
    let mut board = BoardConfig::default();
    assert_eq!(board.mqtt_connection_code(), None);
    board.broker = Some(Broker { url: "whitecatboard.org".into(), port: 1883, device_id: "cat-1".into(), username: "".into(), password: "".into() });
    assert_eq!(board.mqtt_connection_code().unwrap(), r#"if cfg.m == nil then cfg.m = mqtt.client("cat-1", "whitecatboard.org", 1883, false) cfg.m:connect("", "") end"#);
}
