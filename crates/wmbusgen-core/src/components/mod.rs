//! Component domains: top-level configuration sections and their rules
//!
//! Each domain module provides `validate`, turning a raw section into its
//! typed config, and `emit`, turning the typed config into operations.

pub mod action;
pub mod common;
pub mod external;
pub mod gateway_gui;
pub mod meter;
pub mod radio;
pub mod reader;
pub mod sensor;

use std::fmt;
use toml::Value;

use crate::declaration::{ComponentKind, DeclarationBody};
use crate::plan::Emitter;
use crate::registry::RegistryError;
use crate::schema::{Context, Outcome};
use sensor::SensorClass;

/// A top-level section of the configuration tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    WmbusCommon,
    WmbusRadio,
    WmbusMeter,
    Sensor,
    TextSensor,
    WmbusGatewayGui,
    WmbusReader,
    Display,
    BinarySensor,
    Mqtt,
}

impl Domain {
    pub const ALL: [Domain; 10] = [
        Domain::WmbusCommon,
        Domain::WmbusRadio,
        Domain::WmbusMeter,
        Domain::Sensor,
        Domain::TextSensor,
        Domain::WmbusGatewayGui,
        Domain::WmbusReader,
        Domain::Display,
        Domain::BinarySensor,
        Domain::Mqtt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Domain::WmbusCommon => "wmbus_common",
            Domain::WmbusRadio => "wmbus_radio",
            Domain::WmbusMeter => "wmbus_meter",
            Domain::Sensor => "sensor",
            Domain::TextSensor => "text_sensor",
            Domain::WmbusGatewayGui => "wmbus_gateway_gui",
            Domain::WmbusReader => "wmbus_reader",
            Domain::Display => "display",
            Domain::BinarySensor => "binary_sensor",
            Domain::Mqtt => "mqtt",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }

    /// Whether the section may hold more than one declaration
    pub fn multi_conf(self) -> bool {
        !matches!(
            self,
            Domain::WmbusCommon | Domain::WmbusGatewayGui | Domain::WmbusReader | Domain::Mqtt
        )
    }

    /// Sections that must be present for this one to be valid
    pub fn dependencies(self) -> &'static [Domain] {
        match self {
            Domain::WmbusMeter => &[Domain::WmbusRadio],
            Domain::Sensor | Domain::TextSensor => &[Domain::WmbusMeter],
            _ => &[],
        }
    }

    /// Whether a section pulls in `wmbus_common` when it is absent
    pub fn loads_common(self) -> bool {
        matches!(self, Domain::WmbusRadio | Domain::WmbusMeter)
    }

    /// Validate one declaration of this domain
    pub fn validate(self, value: &Value, cx: &mut Context<'_>) -> Outcome<DeclarationBody> {
        let body = match self {
            Domain::WmbusCommon => DeclarationBody::Common(common::validate(value, cx)?),
            Domain::WmbusRadio => DeclarationBody::Radio(radio::validate(value, cx)?),
            Domain::WmbusMeter => DeclarationBody::Meter(meter::validate(value, cx)?),
            Domain::Sensor => {
                DeclarationBody::Sensor(sensor::validate(value, cx, SensorClass::Numeric)?)
            }
            Domain::TextSensor => {
                DeclarationBody::Sensor(sensor::validate(value, cx, SensorClass::Text)?)
            }
            Domain::WmbusGatewayGui => {
                DeclarationBody::DisplayManager(gateway_gui::validate(value, cx)?)
            }
            Domain::WmbusReader => DeclarationBody::ScreenManager(reader::validate(value, cx)?),
            Domain::Display => {
                DeclarationBody::External(external::validate(value, cx, ComponentKind::Display)?)
            }
            Domain::BinarySensor => DeclarationBody::External(external::validate(
                value,
                cx,
                ComponentKind::BinarySensor,
            )?),
            Domain::Mqtt => {
                DeclarationBody::External(external::validate(value, cx, ComponentKind::MqttClient)?)
            }
        };
        Ok(body)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Emit the operations of one validated declaration
pub fn emit(body: &DeclarationBody, emitter: &mut Emitter<'_>) -> Result<(), RegistryError> {
    match body {
        DeclarationBody::Common(config) => common::emit(config, emitter),
        DeclarationBody::Radio(config) => radio::emit(config, emitter),
        DeclarationBody::Meter(config) => meter::emit(config, emitter),
        DeclarationBody::Sensor(config) => sensor::emit(config, emitter),
        DeclarationBody::DisplayManager(config) => gateway_gui::emit(config, emitter),
        DeclarationBody::ScreenManager(config) => reader::emit(config, emitter),
        DeclarationBody::External(config) => external::emit(config, emitter),
    }
}

/// Compile-time defines identifying the firmware project
pub(crate) fn project_defines(emitter: &mut Emitter<'_>, project: &str) {
    use crate::plan::Arg;

    emitter.define("ESPHOME_PROJECT_NAME", Some(Arg::Str(project.to_string())));
    emitter.define("ESPHOME_PROJECT_VERSION", Some(Arg::Str(PROJECT_VERSION.to_string())));
    emitter.define("ESPHOME_PROJECT_VERSION_30", Some(Arg::Str(PROJECT_VERSION.to_string())));
}

const PROJECT_VERSION: &str = "1.0.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_names_round_trip() {
        for domain in Domain::ALL {
            assert_eq!(Domain::parse(domain.name()), Some(domain));
        }
        assert_eq!(Domain::parse("wmbus"), None);
    }

    #[test]
    fn test_single_instance_domains() {
        assert!(!Domain::WmbusCommon.multi_conf());
        assert!(!Domain::WmbusGatewayGui.multi_conf());
        assert!(Domain::WmbusMeter.multi_conf());
        assert!(Domain::Sensor.multi_conf());
    }
}
