//! Declaration types: validated component instances and the kinds they are registered under

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use toml::{Table, Value};

use crate::components::action::ActionConfig;
use crate::components::common::CommonConfig;
use crate::components::external::ExternalConfig;
use crate::components::gateway_gui::GatewayConfig;
use crate::components::meter::MeterConfig;
use crate::components::radio::RadioConfig;
use crate::components::reader::ReaderConfig;
use crate::components::sensor::SensorConfig;

/// Identifiers the generated program reserves for itself
const RESERVED_IDS: &[&str] = &["App", "it", "x", "meter", "this", "auto", "class", "new", "delete"];

/// A declared component identifier (a C++ variable name in the generated program)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Parse a user supplied identifier
    ///
    /// Identifiers must start with a letter or underscore and contain only
    /// ASCII letters, digits and underscores.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let Some(first) = raw.chars().next() else {
            return Err("ID must not be empty".to_string());
        };
        if first.is_ascii_digit() {
            return Err(format!("First character of ID '{}' cannot be a digit", raw));
        }
        if let Some(bad) = raw.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
            return Err(format!(
                "IDs must only consist of upper/lowercase characters, the underscore and numbers, '{}' is not allowed in '{}'",
                bad, raw
            ));
        }
        if RESERVED_IDS.contains(&raw) {
            return Err(format!("ID '{}' is reserved internally and cannot be used", raw));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of an emitted object, as seen by the reference registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    WmbusCommon,
    Radio,
    Meter,
    /// Abstract base of every meter-derived sensor
    BaseSensor,
    Sensor,
    TextSensor,
    DisplayManager,
    ScreenManager,
    TelegramTrigger,
    Automation,
    MqttPublishAction,
    /// Host-provided components
    Display,
    Ssd1306,
    BinarySensor,
    MqttClient,
}

impl ComponentKind {
    /// Fully qualified class constructed for this kind
    pub fn class_name(self) -> &'static str {
        match self {
            Self::WmbusCommon => "wmbus_common::WMBusCommon",
            Self::Radio => "wmbus_radio::Radio",
            Self::Meter => "wmbus_meter::Meter",
            Self::BaseSensor => "wmbus_meter::BaseSensor",
            Self::Sensor => "wmbus_meter::Sensor",
            Self::TextSensor => "wmbus_meter::TextSensor",
            Self::DisplayManager => "wmbus_gateway_gui::DisplayManager",
            Self::ScreenManager => "wmbus_reader::DisplayScreenManager",
            Self::TelegramTrigger => "wmbus_meter::TelegramTrigger",
            Self::Automation => "Automation<wmbus_meter::Meter &>",
            Self::MqttPublishAction => "mqtt::MQTTPublishAction<wmbus_meter::Meter &>",
            Self::Display => "display::Display",
            Self::Ssd1306 => "ssd1306_base::SSD1306",
            Self::BinarySensor => "binary_sensor::BinarySensor",
            Self::MqttClient => "mqtt::MQTTClientComponent",
        }
    }

    /// Stem used for generated identifiers (`meter_id`, `meter_id_2`, ...)
    pub fn id_base(self) -> &'static str {
        match self {
            Self::WmbusCommon => "wmbus_common",
            Self::Radio => "radio",
            Self::Meter => "meter",
            Self::BaseSensor => "base_sensor",
            Self::Sensor => "sensor",
            Self::TextSensor => "text_sensor",
            Self::DisplayManager => "display_manager",
            Self::ScreenManager => "display_screen_manager",
            Self::TelegramTrigger => "telegram_trigger",
            Self::Automation => "automation",
            Self::MqttPublishAction => "mqtt_publish_action",
            Self::Display => "display",
            Self::Ssd1306 => "ssd1306",
            Self::BinarySensor => "binary_sensor",
            Self::MqttClient => "mqtt_client",
        }
    }

    /// Whether an object of this kind can stand in where `expected` is required
    pub fn is_a(self, expected: ComponentKind) -> bool {
        self == expected
            || matches!(
                (self, expected),
                (Self::Sensor | Self::TextSensor, Self::BaseSensor) | (Self::Ssd1306, Self::Display)
            )
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class_name())
    }
}

/// Target of a reference field
///
/// `Default` means the field was left out and resolves to the single
/// registered instance of the expected kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdRef {
    #[default]
    Default,
    Explicit(Identifier),
}

/// A reference from one declaration to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Field the reference came from (`radio_id`, `pages`, ...)
    pub role: &'static str,
    pub target: IdRef,
    pub kind: ComponentKind,
}

/// Typed fields of a declaration, one variant per declaration kind
#[derive(Debug, Clone, PartialEq)]
pub enum DeclarationBody {
    Common(CommonConfig),
    Radio(RadioConfig),
    Meter(MeterConfig),
    Sensor(SensorConfig),
    DisplayManager(GatewayConfig),
    ScreenManager(ReaderConfig),
    External(ExternalConfig),
}

/// One validated unit of the configuration tree
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    /// Top-level section the declaration came from
    pub domain: String,
    /// Position within that section
    pub index: usize,
    pub body: DeclarationBody,
}

impl Declaration {
    pub fn id(&self) -> &Identifier {
        match &self.body {
            DeclarationBody::Common(c) => &c.id,
            DeclarationBody::Radio(c) => &c.id,
            DeclarationBody::Meter(c) => &c.id,
            DeclarationBody::Sensor(c) => &c.id,
            DeclarationBody::DisplayManager(c) => &c.id,
            DeclarationBody::ScreenManager(c) => &c.manager_id,
            DeclarationBody::External(c) => &c.id,
        }
    }

    pub fn kind(&self) -> ComponentKind {
        match &self.body {
            DeclarationBody::Common(_) => ComponentKind::WmbusCommon,
            DeclarationBody::Radio(_) => ComponentKind::Radio,
            DeclarationBody::Meter(_) => ComponentKind::Meter,
            DeclarationBody::Sensor(c) => c.class.kind(),
            DeclarationBody::DisplayManager(_) => ComponentKind::DisplayManager,
            DeclarationBody::ScreenManager(_) => ComponentKind::ScreenManager,
            DeclarationBody::External(c) => c.kind,
        }
    }

    /// Ordered references this declaration makes to other declarations
    pub fn references(&self) -> Vec<Reference> {
        match &self.body {
            DeclarationBody::Common(_) | DeclarationBody::External(_) => Vec::new(),
            DeclarationBody::Radio(_) => Vec::new(),
            DeclarationBody::Meter(c) => {
                let mut refs = vec![Reference {
                    role: "radio_id",
                    target: c.radio.clone(),
                    kind: ComponentKind::Radio,
                }];
                for automation in &c.on_telegram {
                    refs.extend(automation.actions.iter().map(|action: &ActionConfig| Reference {
                        role: "id",
                        target: action.client.clone(),
                        kind: ComponentKind::MqttClient,
                    }));
                }
                refs
            }
            DeclarationBody::Sensor(c) => vec![Reference {
                role: "parent_id",
                target: c.parent.clone(),
                kind: ComponentKind::Meter,
            }],
            DeclarationBody::DisplayManager(c) => {
                let mut refs = vec![
                    Reference {
                        role: "display_id",
                        target: c.display.clone(),
                        kind: ComponentKind::Ssd1306,
                    },
                    Reference {
                        role: "button_id",
                        target: c.button.clone(),
                        kind: ComponentKind::BinarySensor,
                    },
                ];
                refs.extend(page_references(c.pages.explicit()));
                refs
            }
            DeclarationBody::ScreenManager(c) => {
                let mut refs = vec![Reference {
                    role: "display_id",
                    target: c.display.clone(),
                    kind: ComponentKind::Display,
                }];
                refs.extend(page_references(&c.pages));
                refs
            }
        }
    }

    /// Human readable location, e.g. `wmbus_meter[1]`
    pub fn location(&self) -> String {
        format!("{}[{}]", self.domain, self.index)
    }
}

fn page_references(pages: &[Identifier]) -> impl Iterator<Item = Reference> + '_ {
    pages.iter().map(|page| Reference {
        role: "pages",
        target: IdRef::Explicit(page.clone()),
        kind: ComponentKind::BaseSensor,
    })
}

/// Hands out identifiers for declarations that did not name themselves
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    taken: BTreeSet<String>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an identifier as used so it is never generated
    pub fn reserve(&mut self, id: &str) {
        self.taken.insert(id.to_string());
    }

    /// Reserve every identifier-like string in a configuration tree
    ///
    /// Values of keys named `id` or ending in `_id` are reserved, whether
    /// they declare or reference an object.
    pub fn reserve_tree(&mut self, tree: &Table) {
        for (key, value) in tree {
            self.reserve_value(key, value);
        }
    }

    fn reserve_value(&mut self, key: &str, value: &Value) {
        match value {
            Value::String(s) if key == "id" || key.ends_with("_id") => self.reserve(s),
            Value::Table(table) => self.reserve_tree(table),
            Value::Array(items) => {
                for item in items {
                    self.reserve_value(key, item);
                }
            }
            _ => {}
        }
    }

    /// Generate a fresh identifier for an object of `kind`
    pub fn generate(&mut self, kind: ComponentKind) -> Identifier {
        let base = kind.id_base();
        let mut candidate = format!("{}_id", base);
        let mut counter = 2;
        while self.taken.contains(&candidate) {
            candidate = format!("{}_id_{}", base, counter);
            counter += 1;
        }
        self.taken.insert(candidate.clone());
        Identifier(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_rules() {
        assert!(Identifier::parse("water_meter_1").is_ok());
        assert!(Identifier::parse("_hidden").is_ok());
        assert!(Identifier::parse("").is_err());
        assert!(Identifier::parse("1meter").is_err());
        assert!(Identifier::parse("water-meter").is_err());
        assert!(Identifier::parse("meter").is_err());
    }

    #[test]
    fn test_kind_hierarchy() {
        assert!(ComponentKind::Sensor.is_a(ComponentKind::BaseSensor));
        assert!(ComponentKind::TextSensor.is_a(ComponentKind::BaseSensor));
        assert!(ComponentKind::Ssd1306.is_a(ComponentKind::Display));
        assert!(!ComponentKind::Display.is_a(ComponentKind::Ssd1306));
        assert!(!ComponentKind::Meter.is_a(ComponentKind::Radio));
    }

    #[test]
    fn test_generated_ids_skip_reserved() {
        let tree: Table = toml::from_str(
            r#"
[[wmbus_meter]]
id = "meter_id"
radio_id = "radio_id_2"
"#,
        )
        .unwrap();

        let mut ids = IdGenerator::new();
        ids.reserve_tree(&tree);

        assert_eq!(ids.generate(ComponentKind::Meter).as_str(), "meter_id_2");
        assert_eq!(ids.generate(ComponentKind::Radio).as_str(), "radio_id");
        assert_eq!(ids.generate(ComponentKind::Radio).as_str(), "radio_id_3");
    }
}
