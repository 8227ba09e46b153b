//! Background workers

pub mod advancer;
