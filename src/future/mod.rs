// src/future/mod.rs

//! Single-assignment result containers and their composition operators.

pub mod composite;
pub mod promise;

pub use self::composite::{all, any, join};
pub use self::promise::{Future, Promise};
