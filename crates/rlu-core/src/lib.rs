pub mod context;
pub mod error;
pub mod ids;
pub mod manifest;
pub mod model;
pub mod revision;
pub mod update;
pub mod util;

pub use context::*;
pub use error::*;
pub use ids::*;
pub use manifest::*;
pub use model::*;
pub use revision::*;
pub use update::*;
pub use util::*;
