pub mod check;
pub mod detect;
pub mod query;
