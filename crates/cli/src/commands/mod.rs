pub mod nodes;
pub mod status;
