pub mod events;
pub mod system;
pub mod ws;
