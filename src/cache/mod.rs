mod path_cache;
pub use path_cache::*;
