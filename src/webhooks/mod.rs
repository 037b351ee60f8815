//! Inbound callbacks from third parties.

pub mod whatsapp;
