pub mod constants;
pub mod mapping;
pub mod request;
pub mod settings;
pub mod value;
pub mod web;

pub use mapping::{MappingDesc, ModelKey, ModelMeta};
pub use value::TagValue;
