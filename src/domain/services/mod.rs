mod bulk_builder;
mod dispatch_rotation;

pub use bulk_builder::BulkBuilder;
pub use dispatch_rotation::DispatchRotation;
