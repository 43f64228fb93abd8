//! wmbusgen Core - validation, reference resolution and build planning
//!
//! This crate turns a declarative wM-Bus component configuration into a
//! build plan for the downstream code generator:
//! - Driver catalog loading and per-build driver selection
//! - Composable schema validation with aggregated field errors
//! - Identifier registry with strict, single pass reference resolution
//! - Ordered emission of construction and wiring operations
//! - Vendored library version lookup from repository history

pub mod catalog;
pub mod components;
pub mod declaration;
pub mod plan;
pub mod registry;
pub mod schema;
pub mod selection;
pub mod session;
pub mod units;
pub mod version_tag;

pub use catalog::{Catalog, CatalogEntry, CatalogError, ComponentManifest, NamePattern, ResourceProvider, ResourceRef};
pub use components::Domain;
pub use declaration::{ComponentKind, Declaration, DeclarationBody, IdRef, Identifier};
pub use plan::{Arg, BuildPlan, EmissionPlanner, EmitError, Operation};
pub use registry::{Handle, ReferenceRegistry, RegistryError};
pub use schema::{FieldPath, ValidationError, ValidationErrorKind, ValidationErrors, Validator};
pub use selection::{SelectionTracker, DEFAULT_SENTINELS};
pub use session::{BuildSession, CompileError, EmitErrors};
pub use units::{UnitTable, UnitsError, UNITS_HEADER};
pub use version_tag::{TagSource, VersionTagError, VersionTagResolver, DEFAULT_VENDOR};
