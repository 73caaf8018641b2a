pub mod corruptions;
pub mod health;
pub mod scans;
pub mod webhook;
pub mod websocket;
