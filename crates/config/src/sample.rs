//! Plugin identity and the sample configuration block.

/// Name the processor registers under.
pub const PLUGIN_NAME: &str = "db_query_tagger";

/// One-line plugin description.
pub const DESCRIPTION: &str = "Tag metrics that pass through this filter according to db (sqlite3, mssql, mysql or postgres) query results.";

/// Sample configuration block, valid as a flat TOML tagger table.
pub const SAMPLE_CONFIG: &str = r#"
  ## Database driver
  ## Valid options: sqlite3, mssql, mysql, postgres
  ## Aliases: sqlite, sqlserver, mariadb, postgresql, pgx
  database_type = "sqlite3"

  ## Connection string or file path for sqlite3.
  ## Credentials in URLs and password= segments are never logged.
  database = "/var/lib/grafana/grafana.db"

  ## SQL query with driver-native placeholders:
  ##   ? for sqlite3 and mysql, $1 for postgres, @P1 for mssql
  ## The first returned row is used; extra rows are ignored.
  query = "select something1, something2 from tablename where value = ?"

  ## Existing tags whose values are bound to the placeholders, in order.
  ## A missing tag is bound as NULL.
  query_params_tags = ["existing_tag_as_query_parameter"]

  ## New tags receiving the result columns, in column order.
  query_results_tags = ["new_tag_for_something1", "new_tag_for_something2"]

  ## Remove the query parameter tags from metrics that matched a row.
  remove_query_params_tags = false

  ## Per-lookup deadline in milliseconds.
  # query_timeout_ms = 5000
"#;
