pub mod runs;
pub mod submit;
