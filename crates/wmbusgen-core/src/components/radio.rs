//! `wmbus_radio`: the receiving transceiver

use toml::Value;

use crate::declaration::{ComponentKind, Identifier};
use crate::plan::{Arg, Emitter};
use crate::registry::RegistryError;
use crate::schema::{one_of, string, Context, Fields, Outcome};

pub const RADIO_TYPES: [&str; 2] = ["sx1262", "sx1276"];

#[derive(Debug, Clone, PartialEq)]
pub struct RadioConfig {
    pub id: Identifier,
    pub radio_type: String,
    pub reset_pin: Option<String>,
    pub irq_pin: Option<String>,
}

pub fn validate(value: &Value, cx: &mut Context<'_>) -> Outcome<RadioConfig> {
    let mut fields = Fields::new(value, cx)?;
    let id = fields.declare_id(cx, "id", ComponentKind::Radio);
    let radio_type = fields.required(cx, "radio_type", one_of(RADIO_TYPES).lower());
    let reset_pin = fields.optional(cx, "reset_pin", string());
    let irq_pin = fields.optional(cx, "irq_pin", string());
    fields.finish(cx)?;

    Ok(RadioConfig {
        id,
        radio_type,
        reset_pin,
        irq_pin,
    })
}

pub fn emit(config: &RadioConfig, emitter: &mut Emitter<'_>) -> Result<(), RegistryError> {
    let radio = emitter.construct(&config.id, ComponentKind::Radio, Vec::new())?;
    emitter.set(&radio, "set_radio_type", Arg::Str(config.radio_type.clone()));
    if let Some(pin) = &config.reset_pin {
        emitter.set(&radio, "set_reset_pin", Arg::Str(pin.clone()));
    }
    if let Some(pin) = &config.irq_pin {
        emitter.set(&radio, "set_irq_pin", Arg::Str(pin.clone()));
    }
    emitter.register_component(&radio);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::IdGenerator;
    use crate::schema::{FieldPath, ValidationErrorKind};

    fn run(src: &str) -> Outcome<RadioConfig> {
        let mut ids = IdGenerator::new();
        let mut cx = Context::new(FieldPath::root().key("wmbus_radio"), &[], &mut ids);
        validate(&Value::Table(toml::from_str(src).unwrap()), &mut cx)
    }

    #[test]
    fn test_radio_type_case_insensitive() {
        let config = run("radio_type = \"SX1276\"\nreset_pin = 5").unwrap();
        assert_eq!(config.radio_type, "sx1276");
        assert_eq!(config.reset_pin.as_deref(), Some("5"));
        assert_eq!(config.id.as_str(), "radio_id");
    }

    #[test]
    fn test_missing_radio_type() {
        let errors = run("irq_pin = \"GPIO3\"").unwrap_err();
        assert_eq!(
            errors.kinds().collect::<Vec<_>>(),
            vec![&ValidationErrorKind::MissingField]
        );
    }
}
