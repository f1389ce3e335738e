pub mod handler;
pub mod rooms;

pub use rooms::RoomManager;
