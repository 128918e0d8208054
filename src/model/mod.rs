//! Data models for the signaling relay
//!
//! This module contains the core data structures used throughout the relay
//! for identifying connections, encoding signaling events and describing what
//! gets propagated between room members.

pub mod connection;
pub mod message;
pub mod propagated;
