//! Read-side consumers of the published fact stream.

pub mod notifications;
