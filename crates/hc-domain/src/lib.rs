pub mod error;
pub mod types;

#[cfg(test)]
mod tests;

pub use error::DomainError;
pub use types::{
    Access, Appliance, Command, Execution, OperationState, Option, Program, Status,
};
