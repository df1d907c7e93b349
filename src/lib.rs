pub mod db;
pub mod error;
pub mod hot_cache;
pub mod llm_wrapper;
pub mod matching;
pub mod middleware;
pub mod relay;
pub mod routes;
pub mod schemas;
pub mod settings;
pub mod state;
pub mod stream;
