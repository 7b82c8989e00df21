pub mod engine;
pub mod precheck;
