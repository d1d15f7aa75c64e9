pub mod chain;
pub mod decision;
pub mod role;
