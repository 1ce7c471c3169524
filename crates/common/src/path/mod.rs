pub mod normalize;

pub use normalize::{join_relative, normalize_relative, PathError};
