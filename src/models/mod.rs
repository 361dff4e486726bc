pub mod chat;
pub mod reply;
pub mod websocket;
