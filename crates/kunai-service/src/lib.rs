pub mod address;
pub mod delivery;
pub mod directory;
pub mod dkim;
pub mod error;
pub mod net;
pub mod registry;
pub mod scheduling;
