pub mod health;
pub mod oauth;
pub mod rooms;
pub mod transactions;
pub mod webhook;
