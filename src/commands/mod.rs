pub mod check;
pub mod flush;
