//! `wmbus_common`: the vendored meter library and its driver selection

use toml::Value;

use crate::declaration::{ComponentKind, Identifier};
use crate::plan::{Arg, Emitter};
use crate::registry::RegistryError;
use crate::schema::{from_fn, list_of, one_of, Context, Fields, Outcome, Validator};

/// Define carrying the vendored library version
pub const VERSION_TAG_DEFINE: &str = "WMBUSMETERS_TAG";

#[derive(Debug, Clone, PartialEq)]
pub struct CommonConfig {
    pub id: Identifier,
    /// Drivers requested explicitly, beyond those meters select
    pub drivers: Vec<String>,
}

/// A driver name from the catalog; selecting it marks it used
pub struct Driver;

impl Validator for Driver {
    type Output = String;

    fn validate(&self, value: &Value, cx: &mut Context<'_>) -> Outcome<String> {
        let name = one_of(cx.drivers().to_vec())
            .lower()
            .space("_")
            .validate(value, cx)?;
        cx.stage_driver(&name);
        Ok(name)
    }
}

pub fn driver() -> Driver {
    Driver
}

/// `"all"` or a list of drivers
fn drivers(value: &Value, cx: &mut Context<'_>) -> Outcome<Vec<String>> {
    if value.as_str() == Some("all") {
        let all = cx.drivers().to_vec();
        for name in &all {
            cx.stage_driver(name);
        }
        return Ok(all);
    }
    list_of(driver()).validate(value, cx)
}

pub fn validate(value: &Value, cx: &mut Context<'_>) -> Outcome<CommonConfig> {
    let mut fields = Fields::new(value, cx)?;
    let id = fields.declare_id(cx, "id", ComponentKind::WmbusCommon);
    let drivers = fields
        .optional(cx, "drivers", from_fn(drivers))
        .unwrap_or_default();
    fields.finish(cx)?;

    Ok(CommonConfig { id, drivers })
}

pub fn emit(config: &CommonConfig, emitter: &mut Emitter<'_>) -> Result<(), RegistryError> {
    if let Some(tag) = emitter.env().version_tag.clone() {
        emitter.define(VERSION_TAG_DEFINE, Some(Arg::Str(tag)));
    }
    let handle = emitter.construct(&config.id, ComponentKind::WmbusCommon, Vec::new())?;
    emitter.register_component(&handle);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::IdGenerator;
    use crate::schema::{FieldPath, ValidationErrorKind};

    fn catalog() -> Vec<String> {
        vec!["apatoreitn40".to_string(), "multical21".to_string()]
    }

    fn value(src: &str) -> Value {
        Value::Table(toml::from_str(src).unwrap())
    }

    #[test]
    fn test_all_selects_every_driver() {
        let drivers = catalog();
        let mut ids = IdGenerator::new();
        let mut cx = Context::new(FieldPath::root().key("wmbus_common"), &drivers, &mut ids);

        let config = validate(&value(r#"drivers = "all""#), &mut cx).unwrap();
        assert_eq!(config.drivers, drivers);
        assert_eq!(config.id.as_str(), "wmbus_common_id");
        assert_eq!(cx.into_staged().drivers.len(), 2);
    }

    #[test]
    fn test_driver_names_normalized() {
        let drivers = catalog();
        let mut ids = IdGenerator::new();
        let mut cx = Context::new(FieldPath::root().key("wmbus_common"), &drivers, &mut ids);

        let config = validate(&value(r#"drivers = ["MultiCal21"]"#), &mut cx).unwrap();
        assert_eq!(config.drivers, vec!["multical21"]);
    }

    #[test]
    fn test_unknown_driver_lists_allowed() {
        let drivers = catalog();
        let mut ids = IdGenerator::new();
        let mut cx = Context::new(FieldPath::root().key("wmbus_common"), &drivers, &mut ids);

        let errors = validate(&value(r#"drivers = ["izar"]"#), &mut cx).unwrap_err();
        let error = errors.iter().next().unwrap();
        assert_eq!(error.path.to_string(), "wmbus_common.drivers[0]");
        assert_eq!(
            error.kind,
            ValidationErrorKind::InvalidEnumValue {
                field: "drivers".to_string(),
                value: "izar".to_string(),
                allowed: drivers.clone(),
            }
        );
    }
}
