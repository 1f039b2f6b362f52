//! Hardware initialisation for the pulse inputs.

pub mod hw_init;
