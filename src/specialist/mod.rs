//! Client for the external specialist network that serves forwarded
//! operations.

pub mod client;

pub use client::{
    DispatchOutcome, HttpSpecialist, SpecialistError, SpecialistNetwork, SpecialistRequest,
};
