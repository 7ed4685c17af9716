pub mod model;

pub use model::ProductRecord;
