//! Model description, validation and compilation

pub mod compiled;
pub mod operation;
pub mod validation;

pub use compiled::{CompiledModel, CompiledOperation};
pub use operation::{operand, parameter, Model, Operation, Parameters, Tensor};
pub use validation::validate_model;
