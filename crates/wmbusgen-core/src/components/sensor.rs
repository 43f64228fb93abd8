//! `sensor` / `text_sensor` platform `wmbus_meter`: one field of a meter's telegrams

use toml::Value;

use crate::declaration::{ComponentKind, IdRef, Identifier};
use crate::plan::{Arg, Emitter};
use crate::registry::RegistryError;
use crate::schema::{boolean, int_range, one_of, string, string_strict, Context, Fields, Outcome};

/// Platform name under `sensor:` and `text_sensor:`
pub const PLATFORM: &str = "wmbus_meter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorClass {
    Numeric,
    Text,
}

impl SensorClass {
    pub fn kind(self) -> ComponentKind {
        match self {
            SensorClass::Numeric => ComponentKind::Sensor,
            SensorClass::Text => ComponentKind::TextSensor,
        }
    }

    fn define(self) -> &'static str {
        match self {
            SensorClass::Numeric => "USE_WMBUS_METER_SENSOR",
            SensorClass::Text => "USE_WMBUS_METER_TEXT_SENSOR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub id: Identifier,
    pub class: SensorClass,
    pub parent: IdRef,
    /// Meter field the sensor publishes
    pub field: String,
    pub name: Option<String>,
    pub icon: Option<String>,
    pub internal: Option<bool>,
    /// Numeric sensors only; defaults from the field name's unit suffix
    pub unit_of_measurement: Option<String>,
    pub accuracy_decimals: Option<i64>,
    pub device_class: Option<String>,
    pub state_class: Option<String>,
}

pub fn validate(value: &Value, cx: &mut Context<'_>, class: SensorClass) -> Outcome<SensorConfig> {
    let mut fields = Fields::new(value, cx)?;
    fields.required(cx, "platform", one_of([PLATFORM]).lower());
    let id = fields.declare_id(cx, "id", class.kind());
    let parent = fields.use_id(cx, "parent_id");
    let field = fields.required(cx, "field", string_strict());
    let name = fields.optional(cx, "name", string());
    let icon = fields.optional(cx, "icon", string_strict());
    let internal = fields.optional(cx, "internal", boolean());

    let mut config = SensorConfig {
        id,
        class,
        parent,
        field,
        name,
        icon,
        internal,
        unit_of_measurement: None,
        accuracy_decimals: None,
        device_class: None,
        state_class: None,
    };
    if class == SensorClass::Numeric {
        config.unit_of_measurement = fields
            .optional(cx, "unit_of_measurement", string())
            .or_else(|| Some(cx.units().for_field(&config.field)));
        config.accuracy_decimals = fields.optional(cx, "accuracy_decimals", int_range(0, 10));
        config.device_class = fields.optional(cx, "device_class", string_strict());
        config.state_class = fields.optional(
            cx,
            "state_class",
            one_of(["measurement", "total", "total_increasing"]).lower(),
        );
    }
    fields.finish(cx)?;

    cx.stage_display_page(&config.id);
    Ok(config)
}

pub fn emit(config: &SensorConfig, emitter: &mut Emitter<'_>) -> Result<(), RegistryError> {
    let meter = emitter.resolve(&config.parent, ComponentKind::Meter, "parent_id")?;
    emitter.define(config.class.define(), None);

    let sensor = emitter.construct(&config.id, config.class.kind(), Vec::new())?;
    let optional_strings = [
        ("set_name", &config.name),
        ("set_icon", &config.icon),
        ("set_unit_of_measurement", &config.unit_of_measurement),
        ("set_device_class", &config.device_class),
        ("set_state_class", &config.state_class),
    ];
    for (setter, value) in optional_strings {
        if let Some(value) = value {
            emitter.set(&sensor, setter, Arg::Str(value.clone()));
        }
    }
    if let Some(internal) = config.internal {
        emitter.set(&sensor, "set_internal", Arg::Bool(internal));
    }
    if config.class == SensorClass::Numeric {
        if let Some(decimals) = config.accuracy_decimals {
            emitter.set(&sensor, "set_accuracy_decimals", Arg::Int(decimals));
        }
        emitter.set(
            &sensor,
            "set_dynamic_decimals",
            Arg::Bool(config.accuracy_decimals.is_none()),
        );
    }
    emitter.register_component(&sensor);

    emitter.set(&sensor, "set_field_name", Arg::Str(config.field.clone()));
    emitter.set(&sensor, "set_parent", Arg::Handle(meter));
    Ok(())
}
