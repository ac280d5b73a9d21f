pub mod attributes;
pub mod document;
pub mod live_range;
pub mod position;
pub mod range;
pub mod selection;
