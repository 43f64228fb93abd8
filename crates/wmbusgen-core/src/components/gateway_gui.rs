//! `wmbus_gateway_gui`: OLED page carousel of a gateway, cycled with a button

use toml::Value;

use crate::declaration::{ComponentKind, IdRef, Identifier};
use crate::plan::{Arg, Emitter};
use crate::registry::RegistryError;
use crate::schema::{declare_id, list_of, Context, DeclareId, Fields, ListOf, Outcome};

pub const PROJECT_NAME: &str = "IoTLabs.wM-Bus Gateway";

/// Sensors shown as display pages
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Pages {
    /// Every meter sensor declared anywhere in the configuration
    #[default]
    Registered,
    Explicit(Vec<Identifier>),
}

impl Pages {
    /// Pages named in the declaration itself
    pub fn explicit(&self) -> &[Identifier] {
        match self {
            Pages::Registered => &[],
            Pages::Explicit(pages) => pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub id: Identifier,
    pub display: IdRef,
    pub button: IdRef,
    pub pages: Pages,
}

/// A list of sensor identifiers
pub(crate) fn pages() -> ListOf<DeclareId> {
    list_of(declare_id())
}

pub fn validate(value: &Value, cx: &mut Context<'_>) -> Outcome<GatewayConfig> {
    let mut fields = Fields::new(value, cx)?;
    let id = fields.declare_id(cx, "id", ComponentKind::DisplayManager);
    let display = fields.use_id(cx, "display_id");
    let button = fields.use_id(cx, "button_id");
    let pages = fields
        .optional(cx, "pages", pages())
        .map(Pages::Explicit)
        .unwrap_or_default();
    fields.finish(cx)?;

    Ok(GatewayConfig {
        id,
        display,
        button,
        pages,
    })
}

/// Pages are wired as they become available: a sensor declared after the
/// manager is attached once it has been emitted.
pub fn emit(config: &GatewayConfig, emitter: &mut Emitter<'_>) -> Result<(), RegistryError> {
    super::project_defines(emitter, PROJECT_NAME);

    let display = emitter.resolve(&config.display, ComponentKind::Ssd1306, "display_id")?;
    let button = emitter.resolve(&config.button, ComponentKind::BinarySensor, "button_id")?;
    let manager = emitter.construct(
        &config.id,
        ComponentKind::DisplayManager,
        vec![Arg::Handle(display), Arg::Handle(button)],
    )?;

    let pages = match &config.pages {
        Pages::Registered => emitter.env().display_pages.clone(),
        Pages::Explicit(pages) => pages.clone(),
    };
    for page in &pages {
        emitter.attach_deferred(&manager, "add_sensor", page, ComponentKind::BaseSensor)?;
    }
    emitter.register_component(&manager);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::IdGenerator;
    use crate::schema::FieldPath;

    fn run(src: &str) -> Outcome<GatewayConfig> {
        let mut ids = IdGenerator::new();
        let mut cx = Context::new(FieldPath::root().key("wmbus_gateway_gui"), &[], &mut ids);
        validate(&Value::Table(toml::from_str(src).unwrap()), &mut cx)
    }

    #[test]
    fn test_pages_default_to_registered() {
        let config = run("").unwrap();
        assert_eq!(config.pages, Pages::Registered);
        assert!(config.pages.explicit().is_empty());
        assert_eq!(config.display, IdRef::Default);
    }

    #[test]
    fn test_explicit_pages() {
        let config = run("display_id = \"oled\"\npages = [\"water\", \"heat\"]").unwrap();
        let names: Vec<&str> = config.pages.explicit().iter().map(|p| p.as_str()).collect();
        assert_eq!(names, vec!["water", "heat"]);
    }

    #[test]
    fn test_invalid_page_id() {
        let errors = run("pages = [\"1st\"]").unwrap_err();
        assert_eq!(errors.iter().next().unwrap().path.to_string(), "wmbus_gateway_gui.pages[0]");
    }
}
