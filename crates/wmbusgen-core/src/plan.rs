//! Emission planning: turning validated declarations into ordered operations
//!
//! Declarations are emitted one at a time, in declaration order. Each
//! emission is staged in an [`Emitter`] and committed to the
//! [`EmissionPlanner`] only if the whole declaration emitted cleanly, so a
//! failing declaration leaves neither operations nor registry entries
//! behind.
//!
//! Items of accumulate-then-consume collections (display pages) may be
//! wired before they exist: the [`Operation::Attach`] is held back until
//! the item is emitted, and anything still pending when the plan is
//! finished is reported as an unknown identifier. An item emitted with the
//! wrong kind is reported against the declaration that asked for it; the
//! item itself is still committed.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::ResourceRef;
use crate::components;
use crate::declaration::{ComponentKind, Declaration, IdRef, Identifier};
use crate::registry::{Handle, ReferenceRegistry, RegistryEntry, RegistryError};

/// Argument of a constructor, setter or call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Arg {
    Handle(Handle),
    Str(String),
    Int(i64),
    Bool(bool),
    /// Code evaluated by the generated program
    Lambda(String),
}

/// One step of the build plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Instantiate `class` as `handle`
    Construct {
        handle: Handle,
        class: String,
        args: Vec<Arg>,
    },
    /// Single-argument setter
    SetField {
        handle: Handle,
        setter: String,
        value: Arg,
    },
    /// Method call with any number of arguments
    Call {
        handle: Handle,
        method: String,
        args: Vec<Arg>,
    },
    /// Add `item` to a collection owned by `target`
    ///
    /// A deferred attach is placed right after the item's own operations,
    /// so it may follow the target's `RegisterAsComponent`.
    Attach {
        target: Handle,
        method: String,
        item: Handle,
    },
    /// Hand the object to the host's component lifecycle
    RegisterAsComponent { handle: Handle },
    /// Compile-time define
    Define { name: String, value: Option<Arg> },
}

/// An emission failure, located at the declaration that caused it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{location}: {source}")]
pub struct EmitError {
    pub location: String,
    #[source]
    pub source: RegistryError,
}

/// Data the planner needs beyond the declarations themselves
#[derive(Debug, Clone, Default)]
pub struct EmitEnv {
    /// Vendored library version, needed by `wmbus_common`
    pub version_tag: Option<String>,
    /// Objects that registered themselves as display pages during validation
    pub display_pages: Vec<Identifier>,
}

/// An attach waiting for its item to be emitted
#[derive(Debug, Clone)]
struct PendingAttach {
    origin: String,
    target: Handle,
    method: &'static str,
    item: Identifier,
    kind: ComponentKind,
}

/// The finished plan handed to the downstream code generator
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildPlan {
    pub version_tag: Option<String>,
    pub operations: Vec<Operation>,
    /// Every emitted object, in emission order
    pub objects: Vec<RegistryEntry>,
    /// Source files to compile
    pub resources: Vec<ResourceRef>,
    /// Catalog entries left out of the build
    pub excluded_drivers: Vec<String>,
}

impl BuildPlan {
    pub fn to_json(&self, pretty: bool) -> serde_json::Result<String> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}

/// Emits declarations in order, owning the reference registry
#[derive(Debug, Default)]
pub struct EmissionPlanner {
    env: EmitEnv,
    registry: ReferenceRegistry,
    operations: Vec<Operation>,
    defines: BTreeMap<String, Option<Arg>>,
    pending: Vec<PendingAttach>,
    /// Errors found while releasing deferred attaches
    rejected: Vec<EmitError>,
}

impl EmissionPlanner {
    pub fn new(env: EmitEnv) -> Self {
        Self {
            env,
            ..Self::default()
        }
    }

    pub fn registry(&self) -> &ReferenceRegistry {
        &self.registry
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Emit one declaration, returning the operations it committed
    ///
    /// Attaches that were waiting on objects declared here are released
    /// as part of the same call.
    pub fn emit(&mut self, declaration: &Declaration) -> Result<&[Operation], EmitError> {
        let location = declaration.location();
        let at = |source| EmitError {
            location: location.clone(),
            source,
        };

        let mut emitter = Emitter::new(self, &location);
        components::emit(&declaration.body, &mut emitter).map_err(at)?;
        let staged = emitter.into_staged();

        let start = self.operations.len();
        for (id, kind, handle) in staged.registrations {
            self.registry.register(id, kind, handle).map_err(at)?;
        }
        for operation in staged.operations {
            self.push(operation);
        }
        self.pending.extend(staged.pending);
        self.release_pending();

        debug!(
            declaration = %location,
            operations = self.operations.len() - start,
            "Emitted declaration"
        );
        Ok(&self.operations[start..])
    }

    /// Wire every pending attach whose item is now registered
    ///
    /// An item of the wrong kind drops the attach and fails the declaration
    /// that requested it.
    fn release_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for attach in pending {
            match self.registry.resolve(&attach.item, attach.kind) {
                Ok(item) => {
                    debug!(item = %attach.item, target = %attach.target, "Wiring deferred attach");
                    let operation = Operation::Attach {
                        target: attach.target.clone(),
                        method: attach.method.to_string(),
                        item: item.clone(),
                    };
                    self.operations.push(operation);
                }
                Err(RegistryError::UnknownIdentifier { .. }) => self.pending.push(attach),
                Err(source) => {
                    warn!(item = %attach.item, origin = %attach.origin, "Deferred attach rejected");
                    self.rejected.push(EmitError {
                        location: attach.origin,
                        source,
                    });
                }
            }
        }
    }

    /// Append an operation, dropping defines already present
    fn push(&mut self, operation: Operation) {
        if let Operation::Define { name, value } = &operation {
            if let Some(existing) = self.defines.get(name) {
                if existing != value {
                    warn!(
                        define = %name,
                        kept = ?existing,
                        ignored = ?value,
                        "Conflicting define, keeping the first value"
                    );
                }
                return;
            }
            self.defines.insert(name.clone(), value.clone());
        }
        self.operations.push(operation);
    }

    /// Close the plan; rejected attaches and attaches still waiting on an
    /// item are errors
    pub fn finish(self) -> Result<BuildPlan, Vec<EmitError>> {
        let mut errors = self.rejected;
        errors.extend(self.pending.iter().map(|attach| EmitError {
            location: attach.origin.clone(),
            source: RegistryError::UnknownIdentifier {
                id: attach.item.clone(),
                expected: attach.kind,
            },
        }));
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(BuildPlan {
            version_tag: self.env.version_tag,
            objects: self.registry.iter().cloned().collect(),
            operations: self.operations,
            resources: Vec::new(),
            excluded_drivers: Vec::new(),
        })
    }
}

/// Operations and registrations of one declaration, not yet committed
#[derive(Debug, Default)]
struct Staged {
    registrations: Vec<(Identifier, ComponentKind, Handle)>,
    operations: Vec<Operation>,
    pending: Vec<PendingAttach>,
}

/// Staging area handed to a component while it emits one declaration
pub struct Emitter<'p> {
    planner: &'p EmissionPlanner,
    location: &'p str,
    staged: Staged,
}

impl<'p> Emitter<'p> {
    fn new(planner: &'p EmissionPlanner, location: &'p str) -> Self {
        Self {
            planner,
            location,
            staged: Staged::default(),
        }
    }

    fn into_staged(self) -> Staged {
        self.staged
    }

    pub fn env(&self) -> &EmitEnv {
        &self.planner.env
    }

    /// Claim `id` for an object of `kind` and return its handle
    pub fn declare(&mut self, id: &Identifier, kind: ComponentKind) -> Result<Handle, RegistryError> {
        self.planner.registry.check_available(id)?;
        if let Some((_, existing, _)) = self.staged.registrations.iter().find(|(i, _, _)| i == id) {
            return Err(RegistryError::DuplicateIdentifier {
                id: id.clone(),
                existing: *existing,
            });
        }
        let handle = Handle::for_id(id);
        self.staged.registrations.push((id.clone(), kind, handle.clone()));
        Ok(handle)
    }

    /// Declare `id` and construct it in one go
    pub fn construct(
        &mut self,
        id: &Identifier,
        kind: ComponentKind,
        args: Vec<Arg>,
    ) -> Result<Handle, RegistryError> {
        let handle = self.declare(id, kind)?;
        self.staged.operations.push(Operation::Construct {
            handle: handle.clone(),
            class: kind.class_name().to_string(),
            args,
        });
        Ok(handle)
    }

    /// Register an object the host constructs itself
    pub fn adopt(&mut self, id: &Identifier, kind: ComponentKind) -> Result<Handle, RegistryError> {
        self.declare(id, kind)
    }

    /// Resolve a reference against everything emitted so far
    pub fn resolve(
        &self,
        target: &IdRef,
        kind: ComponentKind,
        role: &'static str,
    ) -> Result<Handle, RegistryError> {
        self.planner
            .registry
            .resolve_ref(target, kind, role)
            .cloned()
    }

    pub fn set(&mut self, handle: &Handle, setter: &str, value: Arg) {
        self.staged.operations.push(Operation::SetField {
            handle: handle.clone(),
            setter: setter.to_string(),
            value,
        });
    }

    pub fn call(&mut self, handle: &Handle, method: &str, args: Vec<Arg>) {
        self.staged.operations.push(Operation::Call {
            handle: handle.clone(),
            method: method.to_string(),
            args,
        });
    }

    /// Attach an already emitted object to `target`
    pub fn attach(&mut self, target: &Handle, method: &str, item: Handle) {
        self.staged.operations.push(Operation::Attach {
            target: target.clone(),
            method: method.to_string(),
            item,
        });
    }

    /// Attach `item` now if it was emitted, otherwise once it is
    pub fn attach_deferred(
        &mut self,
        target: &Handle,
        method: &'static str,
        item: &Identifier,
        kind: ComponentKind,
    ) -> Result<(), RegistryError> {
        if self.planner.registry.contains(item) {
            let handle = self.planner.registry.resolve(item, kind)?.clone();
            self.attach(target, method, handle);
            return Ok(());
        }
        debug!(item = %item, target = %target, "Deferring attach until item is emitted");
        self.staged.pending.push(PendingAttach {
            origin: self.location.to_string(),
            target: target.clone(),
            method,
            item: item.clone(),
            kind,
        });
        Ok(())
    }

    pub fn register_component(&mut self, handle: &Handle) {
        self.staged.operations.push(Operation::RegisterAsComponent {
            handle: handle.clone(),
        });
    }

    pub fn define(&mut self, name: &str, value: Option<Arg>) {
        self.staged.operations.push(Operation::Define {
            name: name.to_string(),
            value,
        });
    }
}
