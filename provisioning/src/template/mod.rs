//! Folder templates: model, loading, token expansion and planning.

pub mod bundled;
pub mod loader;
pub mod model;
pub mod planner;
pub mod tokens;

pub use loader::{LoadedTemplate, load};
pub use model::{FolderNode, FolderTemplate, NodeKind};
pub use planner::{FolderPlan, PlanItem, plan, plan_into};
pub use tokens::ProvisioningTokens;
