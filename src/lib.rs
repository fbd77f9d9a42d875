// src/lib.rs

//! Fold-display-mode management for foldable devices.
//!
//! The crate decides which panel configuration a foldable device presents
//! ([`types::FoldDisplayMode`]) from the physical hinge state
//! ([`types::FoldStatus`]) and drives the transition between configurations:
//! panel power sequencing, scene-graph membership, calibrated geometry, and
//! the fold-crease region apps are told to avoid.
//!
//! Embedders construct a [`policy::FoldDisplayPolicy`] for their device
//! [`policy::Topology`], hand it the hardware seams ([`power::PowerController`],
//! [`session::SceneGraph`]) and a [`registry::SessionRegistry`], then feed it
//! sensor results. Everything else is internal plumbing.

pub mod config;
pub mod crease;
pub mod geometry;
pub mod policy;
pub mod power;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod telemetry;
pub mod types;

pub use config::FoldPolicyConfig;
pub use crease::FoldCreaseRegion;
pub use policy::{FoldDisplayPolicy, Topology};
pub use types::{DisplayModeChangeReason, FoldDisplayMode, FoldStatus, PanelId};
