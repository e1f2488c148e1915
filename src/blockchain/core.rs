// core.rs splits responsibilities into submodules for easier maintenance.
pub mod chain;
pub mod reorg;
pub mod saver;
pub mod validation;

pub use chain::*;
pub use reorg::*;
pub use saver::*;
pub use validation::*;
