pub mod transform;

pub use transform::{call_infallible, call_typed, duplicates, lookup, names, Transform, TransformFn};
