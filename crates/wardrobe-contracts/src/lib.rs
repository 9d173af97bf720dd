pub mod accounts;
pub mod closet;
pub mod events;
pub mod models;
pub mod store;
pub mod tiers;
