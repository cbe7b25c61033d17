pub mod api;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod realtime;
pub mod schema;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
