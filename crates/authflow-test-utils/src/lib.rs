//! In-memory fakes for every authflow collaborator.

pub mod clock;
pub mod database;
pub mod fixtures;
pub mod kv;
pub mod world;

pub use clock::FakeClock;
pub use database::FakeDatabase;
pub use fixtures::{config_from_toml, test_config, write_config};
pub use kv::FakeKv;
pub use world::{totp_code, FakeWorld, WorldState};
