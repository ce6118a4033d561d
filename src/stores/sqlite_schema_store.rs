use crate::constants::schema::DB_TABLE;
use crate::errors::InitError;
use crate::services::endpoint::{
    placeholders, DescriptorSource, EndpointDescriptor, Encoding, HttpMethod, ParamLocation,
    ParamSpec, ParamType, ResponseShape,
};
use crate::services::logger::Logger;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Rows of the pre-built endpoint database, converted to descriptors.
#[derive(Debug, Clone)]
pub struct SqliteSchema {
    pub version: Option<i64>,
    pub descriptors: Vec<EndpointDescriptor>,
}

#[derive(Debug, Clone)]
pub struct SqliteSchemaStore {
    path: PathBuf,
    logger: Logger,
}

impl SqliteSchemaStore {
    pub fn new(path: impl AsRef<Path>, logger: Logger) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            logger: logger.child("schema_db"),
        }
    }

    pub fn load(&self) -> Result<SqliteSchema, InitError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        let sql = format!(
            "SELECT path, method, description, request_body, responses FROM {} ORDER BY path, method",
            DB_TABLE
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(EndpointRow {
                path: row.get(0)?,
                method: row.get(1)?,
                description: row.get::<_, Option<String>>(2)?,
                request_body: row.get::<_, Option<String>>(3)?,
                responses: row.get::<_, Option<String>>(4)?,
            })
        })?;

        let mut descriptors = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            let row = row?;
            match row.into_descriptor() {
                Some(descriptor) => descriptors.push(descriptor),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            self.logger.debug(
                "skipped rows with unsupported methods",
                Some(&serde_json::json!({ "skipped": skipped })),
            );
        }
        self.logger.info(
            "schema database loaded",
            Some(&serde_json::json!({
                "path": self.path.display().to_string(),
                "version": version,
                "operations": descriptors.len(),
            })),
        );
        Ok(SqliteSchema {
            version: Some(version),
            descriptors,
        })
    }
}

struct EndpointRow {
    path: String,
    method: String,
    description: Option<String>,
    request_body: Option<String>,
    responses: Option<String>,
}

impl EndpointRow {
    fn into_descriptor(self) -> Option<EndpointDescriptor> {
        let method = HttpMethod::parse(&self.method)?;
        let mut params: Vec<ParamSpec> = placeholders(&self.path)
            .into_iter()
            .map(|name| {
                let mut spec = ParamSpec::new(name, ParamLocation::Path, ParamType::Id);
                spec.required = true;
                spec
            })
            .collect();

        let mut query = ParamSpec::new("query", ParamLocation::Query, ParamType::Object);
        query.encoding = Encoding::Expand;
        query.description = Some("Extra query parameters, sent as given".to_string());
        params.push(query);

        let request_schema = self
            .request_body
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty() && *raw != "None")
            .map(parse_loose_json);
        if request_schema.is_some() {
            let mut body = ParamSpec::new("body", ParamLocation::Body, ParamType::Object);
            body.wire = Some(String::new());
            body.description = Some("Request body, sent as JSON".to_string());
            params.push(body);
        }

        Some(EndpointDescriptor {
            key: format!("{} {}", method, self.path),
            method,
            path: self.path,
            summary: self.description.unwrap_or_default(),
            params,
            response: ResponseShape::Raw,
            idempotent: None,
            body_template: None,
            require_any: Vec::new(),
            source: DescriptorSource::SchemaDb,
            request_schema,
            responses: self
                .responses
                .as_deref()
                .map(str::trim)
                .filter(|raw| !raw.is_empty() && *raw != "None")
                .map(parse_loose_json),
        })
    }
}

fn parse_loose_json(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
