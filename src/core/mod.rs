//! Core primitives shared by the simulation and the server.

pub mod rng;

pub use rng::{derive_round_seed, GameRng};
