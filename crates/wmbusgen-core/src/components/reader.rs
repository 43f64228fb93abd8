//! `wmbus_reader`: screen manager of a handheld reader

use toml::Value;

use super::gateway_gui::pages;
use crate::declaration::{ComponentKind, IdRef, Identifier};
use crate::plan::{Arg, Emitter};
use crate::registry::RegistryError;
use crate::schema::{Context, Fields, Outcome};

pub const PROJECT_NAME: &str = "IoTLabs.wM-Bus Reader";

#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    pub manager_id: Identifier,
    pub display: IdRef,
    pub pages: Vec<Identifier>,
}

pub fn validate(value: &Value, cx: &mut Context<'_>) -> Outcome<ReaderConfig> {
    let mut fields = Fields::new(value, cx)?;
    let manager_id = fields.declare_id(cx, "manager_id", ComponentKind::ScreenManager);
    let display = fields.use_id(cx, "display_id");
    let pages = fields.optional(cx, "pages", pages()).unwrap_or_default();
    fields.finish(cx)?;

    Ok(ReaderConfig {
        manager_id,
        display,
        pages,
    })
}

/// Pages must already be emitted; the manager syncs its screens once all
/// of them are added.
pub fn emit(config: &ReaderConfig, emitter: &mut Emitter<'_>) -> Result<(), RegistryError> {
    super::project_defines(emitter, PROJECT_NAME);

    let display = emitter.resolve(&config.display, ComponentKind::Display, "display_id")?;
    let mut sensors = Vec::with_capacity(config.pages.len());
    for page in &config.pages {
        let target = IdRef::Explicit(page.clone());
        sensors.push(emitter.resolve(&target, ComponentKind::BaseSensor, "pages")?);
    }

    let manager = emitter.construct(
        &config.manager_id,
        ComponentKind::ScreenManager,
        vec![Arg::Handle(display)],
    )?;
    for sensor in sensors {
        emitter.attach(&manager, "add_sensor", sensor);
    }
    emitter.call(&manager, "sync", Vec::new());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::IdGenerator;
    use crate::schema::FieldPath;

    #[test]
    fn test_defaults() {
        let mut ids = IdGenerator::new();
        let mut cx = Context::new(FieldPath::root().key("wmbus_reader"), &[], &mut ids);
        let config = validate(&Value::Table(toml::Table::new()), &mut cx).unwrap();
        assert_eq!(config.manager_id.as_str(), "display_screen_manager_id");
        assert!(config.pages.is_empty());
        assert_eq!(config.display, IdRef::Default);
    }
}
