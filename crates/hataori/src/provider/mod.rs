//! Built-in activity providers.

mod engine;
mod function;

pub use engine::EngineProvider;
pub use function::FunctionProvider;
