//! Administrative operations
//!
//! Database, table and extension management built entirely on
//! [`Session::execute`], [`Session::q`] and [`Session::run_all`]. Names are
//! substituted without escaping, so pass only trusted identifiers.

use crate::db::schema::{self, Extension, SchemaTables, TableEntry};
use crate::db::types::QueryResults;
use crate::error::{SessionError, SessionResult};
use crate::session::Session;
use std::fmt;

const LIST_DATABASES: &str = "SELECT datname FROM pg_database WHERE datistemplate = false;";
const LIST_TEMPLATES: &str = "SELECT datname FROM pg_database WHERE datistemplate = true;";
const LIST_ENCODINGS: &str =
    "select pg_encoding_to_char(i) as encoding from generate_series(0,100) i";
const PUBLIC_TABLES: &str =
    "SELECT * FROM information_schema.tables where table_schema = 'public';";
const TABLES_AND_SCHEMAS: &str =
    "SELECT * FROM information_schema.tables order by table_schema != 'public', table_name;";
const MATERIALIZED_VIEWS: &str = "select schemaname as table_schema, matviewname as table_name, \
     'MATERIALIZED VIEW' as table_type from pg_matviews \
     order by schemaname != 'public', matviewname";
const TABLE_SCHEMAS: &str = "select table_schema from information_schema.tables \
     group by table_schema order by table_schema != 'public'";
const EXTENSIONS: &str = "select * from pg_available_extensions order by name;";

/// Functions before 11 flag aggregates with `proisagg`
const USER_FUNCTIONS_LEGACY: &str = "SELECT 'DROP ' || (CASE WHEN proisagg THEN 'AGGREGATE' \
     ELSE 'FUNCTION' END) || ' IF EXISTS ' || ns.nspname || '.' || proname || \
     '(' || oidvectortypes(proargtypes) || ');' as cmd \
     FROM pg_proc INNER JOIN pg_namespace ns ON (pg_proc.pronamespace = ns.oid) \
     WHERE ns.nspname = '%s' order by proname;";
const USER_FUNCTIONS: &str = "SELECT 'DROP ' || (CASE prokind WHEN 'a' THEN 'AGGREGATE' \
     WHEN 'p' THEN 'PROCEDURE' ELSE 'FUNCTION' END) || ' IF EXISTS ' || ns.nspname || '.' || \
     proname || '(' || oidvectortypes(proargtypes) || ');' as cmd \
     FROM pg_proc INNER JOIN pg_namespace ns ON (pg_proc.pronamespace = ns.oid) \
     WHERE ns.nspname = '%s' order by proname;";
const SEQUENCES: &str =
    "SELECT 'drop sequence ' || c.relname || ';' as cmd FROM pg_class c WHERE (c.relkind = 'S');";

impl Session {
    /// Names of all non-template databases
    pub async fn list_databases(&self) -> SessionResult<Vec<String>> {
        Ok(self.execute(LIST_DATABASES).await?.column_text("datname"))
    }

    /// Names of template databases
    pub async fn database_templates(&self) -> SessionResult<Vec<String>> {
        Ok(self.execute(LIST_TEMPLATES).await?.column_text("datname"))
    }

    /// Encodings the server knows
    pub async fn available_encodings(&self) -> SessionResult<Vec<String>> {
        let results = self.execute(LIST_ENCODINGS).await?;
        Ok(results
            .column_text("encoding")
            .into_iter()
            .filter(|e| !e.is_empty())
            .collect())
    }

    /// Value of a run-time parameter (`SHOW name`)
    pub async fn get_variable(&self, name: &str) -> SessionResult<String> {
        let query = self.q("show %s", &[&name]);
        let results = query.await?;
        results
            .first_text()
            .map(str::to_string)
            .ok_or_else(|| SessionError::UnexpectedResult(format!("SHOW {} returned no value", name)))
    }

    pub async fn public_tables(&self) -> SessionResult<Vec<TableEntry>> {
        Ok(schema::table_entries(&self.execute(PUBLIC_TABLES).await?))
    }

    /// Tables grouped by schema, `public` first
    pub async fn tables_and_schemas(&self) -> SessionResult<Vec<SchemaTables>> {
        let results = self.execute(TABLES_AND_SCHEMAS).await?;
        Ok(schema::group_by_schema(schema::table_entries(&results)))
    }

    /// Materialized views grouped by schema.
    ///
    /// Empty when the server is older than 9.3 or the query fails.
    pub async fn materialized_views(&self) -> SessionResult<Vec<SchemaTables>> {
        let supported = match self.server_version().await {
            Ok(version) => version.supports_materialized_views(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not determine server version");
                false
            }
        };
        if !supported {
            return Ok(Vec::new());
        }
        match self.execute(MATERIALIZED_VIEWS).await {
            Ok(results) => Ok(schema::group_by_schema(schema::table_entries(&results))),
            Err(e) if e.is_connection_lost() => Err(e),
            Err(e) => {
                tracing::error!(error = %e, "Failed to list materialized views");
                Ok(Vec::new())
            }
        }
    }

    /// Schema names that contain tables, `public` first
    pub async fn table_schemas(&self) -> SessionResult<Vec<String>> {
        Ok(self.execute(TABLE_SCHEMAS).await?.column_text("table_schema"))
    }

    pub async fn extensions(&self) -> SessionResult<Vec<Extension>> {
        Ok(schema::extensions(&self.execute(EXTENSIONS).await?))
    }

    pub async fn install_extension(&self, name: &str) -> SessionResult<QueryResults> {
        let query = self.q("CREATE EXTENSION \"%s\"", &[&name]);
        query.await
    }

    pub async fn uninstall_extension(&self, name: &str) -> SessionResult<QueryResults> {
        let query = self.q("DROP EXTENSION \"%s\"", &[&name]);
        query.await
    }

    /// `CREATE DATABASE`, optionally with an encoding and a template
    pub async fn create_database(
        &self,
        name: &str,
        template: Option<&str>,
        encoding: Option<&str>,
    ) -> SessionResult<QueryResults> {
        let encoding = encoding.filter(|e| !e.is_empty());
        let template = template.filter(|t| !t.is_empty());
        let query = {
            let mut sql = String::from("CREATE DATABASE %s");
            let mut args: Vec<&dyn fmt::Display> = vec![&name];
            if let Some(encoding) = &encoding {
                sql.push_str(" ENCODING '%s'");
                args.push(encoding);
            }
            if let Some(template) = &template {
                sql.push_str(" TEMPLATE %s");
                args.push(template);
            }
            self.q(&sql, &args)
        };
        query.await
    }

    /// Drop a database after moving this session to the maintenance database
    pub async fn drop_database(&self, name: &str) -> SessionResult<QueryResults> {
        self.switch_database(&self.maintenance_database()).await?;
        let query = self.q("drop database \"%s\"", &[&name]);
        query.await
    }

    /// Rename a database, then follow it under its new name.
    ///
    /// On failure the session goes back to the original name.
    pub async fn rename_database(&self, name: &str, new_name: &str) -> SessionResult<QueryResults> {
        self.switch_database(&self.maintenance_database()).await?;
        let query = self.q("ALTER DATABASE \"%s\" RENAME TO \"%s\";", &[&name, &new_name]);
        let renamed = query.await;
        let target = if renamed.is_ok() { new_name } else { name };
        let switched = self.switch_database(target).await;
        let results = renamed?;
        switched?;
        Ok(results)
    }

    /// Drop every function and aggregate in `namespace` (default `public`)
    ///
    /// Returns the result of the last `DROP`, or the empty listing when
    /// there was nothing to drop.
    pub async fn drop_user_functions(
        &self,
        namespace: Option<&str>,
    ) -> SessionResult<Option<QueryResults>> {
        let namespace = namespace.filter(|n| !n.is_empty()).unwrap_or("public");
        let template = if self.server_version().await?.has_prokind() {
            USER_FUNCTIONS
        } else {
            USER_FUNCTIONS_LEGACY
        };
        let query = self.q(template, &[&namespace]);
        let listing = query.await?;
        self.run_generated(listing).await
    }

    /// Drop every sequence in the database
    pub async fn drop_all_sequences(&self) -> SessionResult<Option<QueryResults>> {
        let listing = self.execute(SEQUENCES).await?;
        self.run_generated(listing).await
    }

    /// Run the `cmd` column of a listing query as a batch
    async fn run_generated(&self, listing: QueryResults) -> SessionResult<Option<QueryResults>> {
        let commands = listing.column_text("cmd");
        if commands.is_empty() {
            return Ok(Some(listing));
        }
        tracing::info!(session_id = %self.id(), count = commands.len(), "Running generated DDL");
        self.run_all(commands).await
    }
}
