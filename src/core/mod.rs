// Composition engine and command dispatch

pub mod compose;
pub mod dispatcher;

mod integration_tests;

pub use compose::*;
pub use dispatcher::*;
