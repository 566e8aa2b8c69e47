//! Namespace model
//!
//! The controller's belief about what exists on the storage under test.
//! Owned by the controller loop; nothing here is shared across tasks.

pub mod directory;
pub mod file;
pub mod names;
pub mod tree;

pub use directory::Directory;
pub use file::File;
pub use names::{random_name, NamePool};
pub use tree::{ModelLimits, NamespaceModel};
