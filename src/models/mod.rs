mod item;

pub use item::{Item, PERMALINK_PREFIX};
