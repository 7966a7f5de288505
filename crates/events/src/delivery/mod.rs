//! External delivery channels for command lifecycle notifications.

pub mod webhook;
