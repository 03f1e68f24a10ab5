/// Live game store contract and its in-memory and MongoDB backends.
pub mod game_store;
/// Canonical document schema shared by every backend.
pub mod models;
/// Backend-independent storage errors.
pub mod storage;
