pub mod app;
pub mod constants;
pub mod errors;

pub mod mcp {
    pub mod aliases;
    pub mod catalog;
    pub mod envelope;
    pub mod protocol;
    pub mod server;
}

pub mod managers {
    pub mod discovery;
    pub mod raw_api;
}

pub mod services {
    pub mod config;
    pub mod coordinator;
    pub mod credentials;
    pub mod dispatch;
    pub mod endpoint;
    pub mod exchange;
    pub mod logger;
    pub mod operation;
    pub mod pagination;
    pub mod schema_index;
    pub mod transport;
    pub mod uploads;
    pub mod validation;
}

pub mod stores {
    pub mod manifest_schema_store;
    pub mod sqlite_schema_store;
}

pub mod utils {
    pub mod data_path;
    pub mod merge;
    pub mod output;
    pub mod redact;
    pub mod suggest;
    pub mod text;
    pub mod tool_errors;
}
