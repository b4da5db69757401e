use std::sync::Arc;

use serde::Deserialize;

use crate::backend;
use crate::config::Config;
use crate::hooks::Client;
use crate::query::{QueryClient, QueryOptions};
use crate::session::Session;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub client: Client,
    pub session: Session,
}

impl AppState {
    /// Connects the backend and mounts the session; needs a running runtime.
    pub fn new(config: Config) -> Self {
        let backend = backend::connect(&config);
        let queries = Arc::new(QueryClient::new(QueryOptions::from(&config)));
        AppState {
            session: Session::mount(Arc::clone(&backend)),
            client: Client::new(backend, queries),
            config,
        }
    }
}
