//! Build session: one configuration tree from validation to build plan
//!
//! The session owns all state shared between declarations: the driver
//! selection, the display page collection and the identifier generator. Its
//! lifecycle is fixed: [`BuildSession::validate`] once, then
//! [`BuildSession::emit`] and [`BuildSession::list_build_resources`], which
//! both require a fully validated tree.

use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use toml::{Table, Value};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogError, ResourceProvider, ResourceRef};
use crate::components::Domain;
use crate::declaration::{Declaration, DeclarationBody, IdGenerator, Identifier};
use crate::plan::{BuildPlan, EmissionPlanner, EmitEnv, EmitError};
use crate::schema::{
    Context, FieldPath, ValidationError, ValidationErrorKind, ValidationErrors,
};
use crate::selection::SelectionTracker;
use crate::units::UnitTable;
use crate::version_tag::{VersionTagError, VersionTagResolver};

/// Every emission failure of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitErrors(pub Vec<EmitError>);

impl fmt::Display for EmitErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Invalid configuration:\n{0}")]
    Validation(ValidationErrors),
    #[error("Failed to wire components:\n{0}")]
    Emission(EmitErrors),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Version tag error: {0}")]
    VersionTag(#[from] VersionTagError),
    #[error("Build session misuse: {0}")]
    Lifecycle(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fresh,
    Validated,
    Failed,
}

pub struct BuildSession {
    catalog: Catalog,
    /// Drivers a declaration may select
    selectable: Vec<String>,
    selection: SelectionTracker,
    units: UnitTable,
    ids: IdGenerator,
    display_pages: Vec<Identifier>,
    declarations: Vec<Declaration>,
    version_tag: VersionTagResolver,
    phase: Phase,
}

impl BuildSession {
    pub fn new<S>(catalog: Catalog, sentinels: S, version_tag: VersionTagResolver) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
    {
        let sentinels: BTreeSet<String> = sentinels.into_iter().map(Into::into).collect();
        let selectable = catalog.selectable(&sentinels);
        let selection = SelectionTracker::new(catalog.names(), sentinels);
        Self {
            catalog,
            selectable,
            selection,
            units: UnitTable::empty(),
            ids: IdGenerator::new(),
            display_pages: Vec::new(),
            declarations: Vec::new(),
            version_tag,
            phase: Phase::Fresh,
        }
    }

    /// Use the vendored library's unit list for derived units
    pub fn with_units(mut self, units: UnitTable) -> Self {
        self.units = units;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn units(&self) -> &UnitTable {
        &self.units
    }

    pub fn selection(&self) -> &SelectionTracker {
        &self.selection
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn display_pages(&self) -> &[Identifier] {
        &self.display_pages
    }

    pub fn version_tag(&self) -> &VersionTagResolver {
        &self.version_tag
    }

    /// Validate the whole configuration tree
    ///
    /// Every declaration is validated even after a failure so all errors
    /// are reported together. Side effects of a declaration (selected
    /// drivers, display pages) are only applied if it is valid.
    pub fn validate(&mut self, tree: &Table) -> Result<&[Declaration], CompileError> {
        if self.phase != Phase::Fresh {
            return Err(CompileError::Lifecycle("the tree has already been validated"));
        }
        self.ids.reserve_tree(tree);

        let mut errors = ValidationErrors::new();
        let mut sections = Vec::new();
        for (name, value) in tree {
            let path = FieldPath::root().key(name);
            match Domain::parse(name) {
                Some(domain) => sections.push((domain, value)),
                None => errors.push(ValidationError {
                    path,
                    kind: ValidationErrorKind::Invalid(format!("Component not found: {}", name)),
                }),
            }
        }

        let present: BTreeSet<Domain> = sections.iter().map(|(d, _)| *d).collect();
        for domain in &present {
            for dependency in domain.dependencies() {
                if !present.contains(dependency) {
                    errors.push(ValidationError {
                        path: FieldPath::root().key(domain.name()),
                        kind: ValidationErrorKind::Invalid(format!(
                            "Component {} requires component {}",
                            domain, dependency
                        )),
                    });
                }
            }
        }

        let auto_common = Value::Table(Table::new());
        if !present.contains(&Domain::WmbusCommon) && present.iter().any(|d| d.loads_common()) {
            debug!("Loading wmbus_common implicitly");
            sections.insert(0, (Domain::WmbusCommon, &auto_common));
        }

        for (domain, value) in sections {
            let section = FieldPath::root().key(domain.name());
            let items: Vec<(usize, FieldPath, &Value)> = match value {
                Value::Array(items) if domain.multi_conf() || items.len() == 1 => items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| (i, section.index(i), item))
                    .collect(),
                Value::Array(_) => {
                    errors.push(ValidationError {
                        path: section,
                        kind: ValidationErrorKind::Invalid(format!(
                            "Component {} cannot be declared more than once",
                            domain
                        )),
                    });
                    continue;
                }
                single => vec![(0, section, single)],
            };

            for (index, path, item) in items {
                match self.validate_declaration(domain, index, path, item) {
                    Ok(declaration) => self.declarations.push(declaration),
                    Err(e) => errors.extend(e),
                }
            }
        }

        if !errors.is_empty() {
            self.phase = Phase::Failed;
            warn!(errors = errors.len(), "Configuration is invalid");
            return Err(CompileError::Validation(errors));
        }

        self.phase = Phase::Validated;
        info!(
            declarations = self.declarations.len(),
            drivers = self.selection.used().len(),
            "Configuration validated"
        );
        Ok(&self.declarations)
    }

    fn validate_declaration(
        &mut self,
        domain: Domain,
        index: usize,
        path: FieldPath,
        value: &Value,
    ) -> Result<Declaration, ValidationErrors> {
        let mut cx = Context::new(path, &self.selectable, &mut self.ids).with_units(&self.units);
        let body = domain.validate(value, &mut cx)?;
        let staged = cx.into_staged();

        for driver in &staged.drivers {
            self.selection.mark_used(driver);
        }
        self.display_pages.extend(staged.display_pages);

        Ok(Declaration {
            domain: domain.name().to_string(),
            index,
            body,
        })
    }

    /// Emit every declaration in order
    ///
    /// The version tag is resolved only when `wmbus_common` is part of the
    /// build. A declaration failing to emit does not stop the others.
    pub fn emit(&self) -> Result<BuildPlan, CompileError> {
        self.require_validated()?;

        let needs_tag = self
            .declarations
            .iter()
            .any(|d| matches!(d.body, DeclarationBody::Common(_)));
        let version_tag = if needs_tag {
            Some(self.version_tag.tag()?.to_string())
        } else {
            None
        };

        let mut planner = EmissionPlanner::new(EmitEnv {
            version_tag,
            display_pages: self.display_pages.clone(),
        });
        let mut errors = Vec::new();
        for declaration in &self.declarations {
            if let Err(e) = planner.emit(declaration) {
                warn!(error = %e, "Declaration not emitted");
                errors.push(e);
            }
        }

        match planner.finish() {
            Ok(plan) if errors.is_empty() => Ok(plan),
            Ok(_) => Err(CompileError::Emission(EmitErrors(errors))),
            Err(pending) => {
                errors.extend(pending);
                Err(CompileError::Emission(EmitErrors(errors)))
            }
        }
    }

    /// Catalog entries to leave out of the build
    pub fn excluded_drivers(&self) -> Result<BTreeSet<String>, CompileError> {
        self.require_validated()?;
        Ok(self.selection.finalize())
    }

    /// Resources of the component, without the drivers nobody selected
    pub fn list_build_resources(
        &self,
        provider: &dyn ResourceProvider,
    ) -> Result<Vec<ResourceRef>, CompileError> {
        let excluded = self.excluded_drivers()?;
        let resources = provider.list_resources(&excluded)?;
        info!(
            resources = resources.len(),
            excluded = excluded.len(),
            "Listed build resources"
        );
        Ok(resources)
    }

    /// Validate, emit and list resources in one go
    pub fn compile(
        &mut self,
        tree: &Table,
        provider: &dyn ResourceProvider,
    ) -> Result<BuildPlan, CompileError> {
        self.validate(tree)?;
        let mut plan = self.emit()?;
        plan.resources = self.list_build_resources(provider)?;
        plan.excluded_drivers = self.excluded_drivers()?.into_iter().collect();
        Ok(plan)
    }

    fn require_validated(&self) -> Result<(), CompileError> {
        match self.phase {
            Phase::Validated => Ok(()),
            Phase::Fresh => Err(CompileError::Lifecycle("the tree has not been validated yet")),
            Phase::Failed => Err(CompileError::Lifecycle("the tree failed validation")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ComponentManifest, NamePattern};
    use crate::plan::{Arg, Operation};
    use crate::registry::{Handle, RegistryError};
    use crate::selection::DEFAULT_SENTINELS;
    use crate::units::{SAMPLE_HEADER, UNITS_HEADER};
    use tempfile::TempDir;

    const GATEWAY: &str = r#"
[mqtt]
id = "broker"
broker = "10.0.0.2"

[[wmbus_radio]]
id = "radio_1"
radio_type = "sx1262"

[[wmbus_meter]]
id = "water"
meter_id = "1a2b3c"
type = "multical21"
key = "00112233445566778899aabbccddeeff"

[[wmbus_meter.on_telegram]]
then = [{ "wmbus_meter.send_telegram_with_mqtt" = { topic = "wmbus/water" } }]

[[display]]
platform = "ssd1306_i2c"
id = "oled"

[[binary_sensor]]
platform = "gpio"
id = "next_page"

[wmbus_gateway_gui]

[[sensor]]
platform = "wmbus_meter"
id = "water_total"
parent_id = "water"
field = "total_m3"

[[text_sensor]]
platform = "wmbus_meter"
id = "water_status"
parent_id = "water"
field = "current_status"
"#;

    fn component_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in [
            "driver_apatoreitn40.cc",
            "driver_multical21.cc",
            "driver_auto.cc",
            "driver_unknown.cc",
            "component.cpp",
            "component.h",
        ] {
            std::fs::write(dir.path().join(file), "// source\n").unwrap();
        }
        std::fs::write(dir.path().join(UNITS_HEADER), SAMPLE_HEADER).unwrap();
        dir
    }

    fn session(dir: &TempDir) -> BuildSession {
        let catalog = Catalog::load(dir.path(), NamePattern::default()).unwrap();
        let units = UnitTable::load(&dir.path().join(UNITS_HEADER)).unwrap();
        BuildSession::new(catalog, DEFAULT_SENTINELS, VersionTagResolver::fixed("1.19.0"))
            .with_units(units)
    }

    fn tree(src: &str) -> Table {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn test_compile_gateway() {
        let dir = component_dir();
        let mut session = session(&dir);
        let manifest = ComponentManifest::new(dir.path(), NamePattern::default());

        let plan = session.compile(&tree(GATEWAY), &manifest).unwrap();

        assert_eq!(plan.version_tag.as_deref(), Some("1.19.0"));
        assert_eq!(plan.excluded_drivers, vec!["apatoreitn40", "auto", "unknown"]);
        let resources: Vec<&str> = plan.resources.iter().map(|r| r.resource.as_str()).collect();
        assert_eq!(
            resources,
            vec!["component.cpp", "component.h", "driver_multical21.cc", "units.h"]
        );
        assert!(plan.operations.contains(&Operation::SetField {
            handle: Handle("water_total".to_string()),
            setter: "set_unit_of_measurement".to_string(),
            value: Arg::Str("m³".to_string()),
        }));

        assert!(plan.operations.contains(&Operation::Define {
            name: "WMBUSMETERS_TAG".to_string(),
            value: Some(Arg::Str("1.19.0".to_string())),
        }));
        assert!(plan.operations.contains(&Operation::Call {
            handle: Handle("water".to_string()),
            method: "set_meter_params".to_string(),
            args: vec![
                Arg::Str("001A2B3C".to_string()),
                Arg::Str("multical21".to_string()),
                Arg::Str("00112233445566778899AABBCCDDEEFF".to_string()),
            ],
        }));
        assert!(plan.operations.contains(&Operation::SetField {
            handle: Handle("mqtt_publish_action_id".to_string()),
            setter: "set_payload".to_string(),
            value: Arg::Lambda("return meter.as_json();".to_string()),
        }));

        // Sensors declared after the display manager are wired once emitted
        let attached: Vec<&str> = plan
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Attach {
                    target,
                    method,
                    item,
                } if target.as_str() == "display_manager_id" && method == "add_sensor" => {
                    Some(item.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(attached, vec!["water_total", "water_status"]);

        // Deferred attaches follow the manager's registration
        let position = |wanted: &Operation| plan.operations.iter().position(|op| op == wanted);
        let registered = position(&Operation::RegisterAsComponent {
            handle: Handle("display_manager_id".to_string()),
        });
        let first_page = position(&Operation::Attach {
            target: Handle("display_manager_id".to_string()),
            method: "add_sensor".to_string(),
            item: Handle("water_total".to_string()),
        });
        assert!(registered.is_some() && registered < first_page);
    }

    #[test]
    fn test_wmbus_common_emitted_first() {
        let dir = component_dir();
        let mut session = session(&dir);
        session.validate(&tree(GATEWAY)).unwrap();

        let first = &session.declarations()[0];
        assert_eq!(first.domain, "wmbus_common");
        assert_eq!(first.id().as_str(), "wmbus_common_id");
    }

    #[test]
    fn test_no_drivers_selected_keeps_only_fallback() {
        let dir = component_dir();
        let mut session = session(&dir);
        session.validate(&tree("[mqtt]\nid = \"broker\"")).unwrap();

        let excluded: Vec<String> = session.excluded_drivers().unwrap().into_iter().collect();
        assert_eq!(excluded, vec!["apatoreitn40", "auto", "multical21"]);
        let manifest = ComponentManifest::new(dir.path(), NamePattern::default());
        let resources: Vec<String> = session
            .list_build_resources(&manifest)
            .unwrap()
            .into_iter()
            .map(|r| r.resource)
            .collect();
        assert_eq!(
            resources,
            vec!["component.cpp", "component.h", "driver_unknown.cc", "units.h"]
        );
        // Without wM-Bus components there is no tag to resolve
        assert_eq!(session.emit().unwrap().version_tag, None);
    }

    #[test]
    fn test_invalid_declaration_has_no_side_effects() {
        let dir = component_dir();
        let mut session = session(&dir);
        let err = session
            .validate(&tree(
                r#"
[[wmbus_radio]]
radio_type = "sx1262"

[[wmbus_meter]]
meter_id = "1"
type = "apatoreitn40"
on_telegram = { then = { "wmbus_meter.send_telegram_with_mqtt" = { topic = "t", payload = "p" } } }
"#,
            ))
            .unwrap_err();

        let CompileError::Validation(errors) = err else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors.kinds().next(),
            Some(ValidationErrorKind::MutuallyExclusiveFields { .. })
        ));
        assert!(session.selection().used().is_empty());
        assert!(matches!(
            session.excluded_drivers(),
            Err(CompileError::Lifecycle(_))
        ));
    }

    #[test]
    fn test_reference_before_declaration_fails() {
        let dir = component_dir();
        let mut session = session(&dir);
        session
            .validate(&tree(
                r#"
[[wmbus_meter]]
radio_id = "radio_1"
meter_id = "1"
type = "apatoreitn40"

[[wmbus_radio]]
id = "radio_1"
radio_type = "sx1276"
"#,
            ))
            .unwrap();

        let CompileError::Emission(EmitErrors(errors)) = session.emit().unwrap_err() else {
            panic!("expected emission errors");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].location, "wmbus_meter[0]");
        assert!(matches!(
            errors[0].source,
            RegistryError::UnknownIdentifier { .. }
        ));
    }

    #[test]
    fn test_duplicate_identifier_across_kinds() {
        let dir = component_dir();
        let mut session = session(&dir);
        session
            .validate(&tree(
                r#"
[[wmbus_radio]]
id = "shared"
radio_type = "sx1262"

[[binary_sensor]]
platform = "gpio"
id = "shared"
"#,
            ))
            .unwrap();

        let CompileError::Emission(EmitErrors(errors)) = session.emit().unwrap_err() else {
            panic!("expected emission errors");
        };
        assert_eq!(errors[0].location, "binary_sensor[0]");
        assert!(matches!(
            errors[0].source,
            RegistryError::DuplicateIdentifier { .. }
        ));
    }

    #[test]
    fn test_page_of_wrong_kind_fails_display_manager() {
        let dir = component_dir();
        let mut session = session(&dir);
        session
            .validate(&tree(
                r#"
[[display]]
platform = "ssd1306_i2c"
id = "oled"

[[binary_sensor]]
platform = "gpio"
id = "next_page"

[wmbus_gateway_gui]
pages = ["broker"]

[mqtt]
id = "broker"
"#,
            ))
            .unwrap();

        let CompileError::Emission(EmitErrors(errors)) = session.emit().unwrap_err() else {
            panic!("expected emission errors");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].location, "wmbus_gateway_gui[0]");
        assert!(matches!(
            &errors[0].source,
            RegistryError::KindMismatch { id, .. } if id.as_str() == "broker"
        ));
    }

    #[test]
    fn test_unknown_domain_and_missing_dependency() {
        let dir = component_dir();
        let mut session = session(&dir);
        let err = session
            .validate(&tree(
                r#"
[wifi]
ssid = "x"

[[wmbus_meter]]
meter_id = "1"
type = "apatoreitn40"
"#,
            ))
            .unwrap_err();

        let CompileError::Validation(errors) = err else {
            panic!("expected validation errors");
        };
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert!(messages.contains(&"wifi: Component not found: wifi".to_string()));
        assert!(messages
            .contains(&"wmbus_meter: Component wmbus_meter requires component wmbus_radio".to_string()));
    }

    #[test]
    fn test_single_instance_domain_rejects_many() {
        let dir = component_dir();
        let mut session = session(&dir);
        let err = session
            .validate(&tree("[[wmbus_reader]]\n[[wmbus_reader]]\n"))
            .unwrap_err();
        assert!(matches!(err, CompileError::Validation(_)));
    }

    #[test]
    fn test_validate_only_once() {
        let dir = component_dir();
        let mut session = session(&dir);
        session.validate(&Table::new()).unwrap();
        assert!(matches!(
            session.validate(&Table::new()),
            Err(CompileError::Lifecycle(_))
        ));
    }
}
