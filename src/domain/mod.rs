// Domain layer - Pure data model and algorithms
pub mod error;
pub mod frame;
pub mod functions;
pub mod pattern;
pub mod record;
pub mod target;
