pub mod constants;
pub mod protocol;
