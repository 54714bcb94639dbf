pub mod path_lock;
pub mod validation;
