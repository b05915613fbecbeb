//! Platform thread helpers.

pub mod task_pin;
