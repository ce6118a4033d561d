use crate::errors::InitError;
use crate::managers::discovery::{DiscoveryAction, DiscoveryHandler, DiscoveryManager};
use crate::managers::raw_api::{RawApiManager, RUN_API_TOOL};
use crate::mcp::catalog::ToolCatalog;
use crate::services::config::Config;
use crate::services::coordinator::Coordinator;
use crate::services::credentials::CredentialProvider;
use crate::services::dispatch::{PlanExecutor, ToolHandler, ToolRouter};
use crate::services::endpoint::DescriptorSource;
use crate::services::exchange::HttpExchange;
use crate::services::logger::Logger;
use crate::services::operation::OperationRunner;
use crate::services::pagination::PaginationWalker;
use crate::services::schema_index::SchemaIndex;
use crate::services::transport::{HttpTransport, ReqwestTransport};
use crate::services::uploads::AttachmentLoader;
use crate::stores::manifest_schema_store::ManifestSchemaStore;
use crate::stores::sqlite_schema_store::SqliteSchemaStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a server needs, built once at startup and shared read-only.
pub struct App {
    pub logger: Logger,
    pub config: Arc<Config>,
    pub credentials: Arc<CredentialProvider>,
    pub index: Arc<SchemaIndex>,
    pub exchange: Arc<HttpExchange>,
    pub catalog: Arc<ToolCatalog>,
    pub router: ToolRouter,
}

impl App {
    pub fn initialize(config: Config) -> Result<Self, InitError> {
        let transport = ReqwestTransport::new(config.insecure_tls)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: Config,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, InitError> {
        let logger = Logger::new("opproxy", config.log_level);
        let credentials = Arc::new(CredentialProvider::from_config(&config)?);

        let manifest = ManifestSchemaStore::embedded().load()?;
        let database = match &config.schema_db {
            Some(path) => Some(SqliteSchemaStore::new(path, logger.clone()).load()?),
            None => None,
        };
        let index = Arc::new(SchemaIndex::build(manifest, database, &logger)?);
        let catalog = Arc::new(ToolCatalog::embedded(&index)?);

        let exchange = Arc::new(HttpExchange::new(
            &config,
            credentials.clone(),
            transport,
            &logger,
        ));
        let runner = OperationRunner::new(
            exchange.clone(),
            AttachmentLoader::new(config.max_upload_bytes),
        );
        let walker = PaginationWalker::new(exchange.clone(), config.pagination.max_pages, &logger);
        let executor = PlanExecutor::new(runner.clone(), walker);
        let coordinator = Coordinator::new(index.clone(), runner, &logger);

        let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
        let discovery = Arc::new(DiscoveryManager::new(
            &logger,
            index.clone(),
            exchange.clone(),
            catalog.clone(),
        ));
        for action in DiscoveryAction::ALL {
            handlers.insert(
                action.tool_name().to_string(),
                Arc::new(DiscoveryHandler::new(discovery.clone(), action)),
            );
        }
        handlers.insert(
            RUN_API_TOOL.to_string(),
            Arc::new(RawApiManager::new(&logger, index.clone(), executor.clone())),
        );

        let router = ToolRouter::new(
            &logger,
            catalog.clone(),
            executor,
            coordinator,
            handlers,
            credentials.secrets(),
        )?;

        let app = Self {
            logger,
            config: Arc::new(config),
            credentials,
            index,
            exchange,
            catalog,
            router,
        };
        app.logger.info("initialized", Some(&app.summary()));
        Ok(app)
    }

    pub fn summary(&self) -> Value {
        serde_json::json!({
            "host": self.credentials.base_url().as_str(),
            "operations": self.index.len(),
            "manifest_operations": self.index.count_by_source(DescriptorSource::Manifest),
            "schema_db_operations": self.index.count_by_source(DescriptorSource::SchemaDb),
            "schema_version": self.index.version(),
            "fingerprint": self.index.fingerprint(),
            "tools": self.catalog.len(),
            "retry_max_attempts": self.config.retry.max_attempts,
            "timeout_ms": self.config.timeout.as_millis() as u64,
        })
    }
}
