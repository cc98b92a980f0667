//! Tool bindings, parameter schemas and catalog suggestions.

pub mod binding;
pub mod schema;
pub mod suggest;

pub use binding::{BindingTarget, DispatchRefusal, ToolBinding, ToolBindingManager, ToolOrigin};
pub use schema::{ParamSchema, SchemaViolation};
pub use suggest::{CatalogEntry, suggest};
