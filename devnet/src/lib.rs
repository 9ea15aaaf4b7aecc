//! Devices, simulations and the command line front end for `devnet-core`.

pub mod applications;
pub mod cli;
pub mod simulation;
pub mod simulations;
