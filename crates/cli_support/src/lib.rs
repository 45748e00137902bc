pub mod common;
pub mod logging;

pub use common::{DatasetArgs, ModelShapeArgs};
pub use logging::init_tracing;
