pub mod sync;
pub mod text;
