//! Host components referenced by the wM-Bus components
//!
//! Displays, binary sensors and the MQTT client are built by the host
//! framework. Only their identifiers and kinds matter here, so everything
//! but `id` and `platform` is passed through unchecked.

use toml::Value;

use crate::declaration::{ComponentKind, Identifier};
use crate::plan::Emitter;
use crate::registry::RegistryError;
use crate::schema::{string, Context, Fields, Outcome};

/// Display platforms driving an SSD1306 controller
pub const SSD1306_PLATFORMS: [&str; 2] = ["ssd1306_i2c", "ssd1306_spi"];

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalConfig {
    pub id: Identifier,
    pub kind: ComponentKind,
}

pub fn validate(value: &Value, cx: &mut Context<'_>, kind: ComponentKind) -> Outcome<ExternalConfig> {
    let mut fields = Fields::new(value, cx)?;
    let platform = fields.optional(cx, "platform", string());
    let kind = match platform.as_deref() {
        Some(p) if kind == ComponentKind::Display && SSD1306_PLATFORMS.contains(&p) => {
            ComponentKind::Ssd1306
        }
        _ => kind,
    };
    let id = fields.declare_id(cx, "id", kind);
    fields.ignore_rest();
    fields.finish(cx)?;

    Ok(ExternalConfig { id, kind })
}

pub fn emit(config: &ExternalConfig, emitter: &mut Emitter<'_>) -> Result<(), RegistryError> {
    emitter.adopt(&config.id, config.kind)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::IdGenerator;
    use crate::schema::FieldPath;

    fn run(src: &str, kind: ComponentKind) -> ExternalConfig {
        let mut ids = IdGenerator::new();
        let mut cx = Context::new(FieldPath::root().key("display").index(0), &[], &mut ids);
        validate(&Value::Table(toml::from_str(src).unwrap()), &mut cx, kind).unwrap()
    }

    #[test]
    fn test_ssd1306_platform_refines_kind() {
        let config = run(
            "platform = \"ssd1306_i2c\"\nid = \"oled\"\nmodel = \"SSD1306 128x64\"",
            ComponentKind::Display,
        );
        assert_eq!(config.kind, ComponentKind::Ssd1306);
        assert_eq!(config.id.as_str(), "oled");
    }

    #[test]
    fn test_other_display_stays_generic() {
        let config = run("platform = \"st7789v\"", ComponentKind::Display);
        assert_eq!(config.kind, ComponentKind::Display);
        assert_eq!(config.id.as_str(), "display_id");
    }
}
