// ── Domain model ──
//
// Transport-neutral value and path types shared by the tree, the adapters
// and the models.

pub mod path;
pub mod value;

pub use path::{ItemPath, PathPattern};
pub use value::{Format, Value};
