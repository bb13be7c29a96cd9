//! SwitchBot device identity and model table

use std::fmt;

/// Known SwitchBot models, keyed by the model code carried in advertisements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Bot,
    Meter,
    Humidifier,
    Curtain,
    MotionSensor,
    ContactSensor,
    Unknown(char),
}

impl Model {
    pub fn from_code(code: char) -> Self {
        match code {
            'H' => Self::Bot,
            'T' => Self::Meter,
            'e' => Self::Humidifier,
            'c' => Self::Curtain,
            's' => Self::MotionSensor,
            'd' => Self::ContactSensor,
            other => Self::Unknown(other),
        }
    }

    /// Reads the model from advertised service data. The low seven bits of
    /// the first byte hold the model code.
    pub fn from_service_data(data: &[u8]) -> Option<Self> {
        data.first().map(|byte| Self::from_code(char::from(byte & 0x7f)))
    }

    pub fn code(&self) -> char {
        match self {
            Self::Bot => 'H',
            Self::Meter => 'T',
            Self::Humidifier => 'e',
            Self::Curtain => 'c',
            Self::MotionSensor => 's',
            Self::ContactSensor => 'd',
            Self::Unknown(code) => *code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bot => "WoHand",
            Self::Meter => "WoSensorTH",
            Self::Humidifier => "WoHumi",
            Self::Curtain => "WoCurtain",
            Self::MotionSensor => "WoPresence",
            Self::ContactSensor => "WoContact",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Identity of one physical device, captured once from its advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    id: String,
    address: String,
    model: Model,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>, address: impl Into<String>, model: Model) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            model,
        }
    }

    /// Platform-specific identifier of the device
    pub fn id(&self) -> &str {
        &self.id
    }

    /// MAC address, or "N/A" on platforms that hide it
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn model_code(&self) -> char {
        self.model.code()
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }
}
