use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::client::{ClientError, SqlClient};
use crate::credentials::{ConnectOptions, Credentials};
use crate::query::Flavor;
use crate::schema::{FieldType, NativeColumn};

pub mod mssql;
pub mod mysql;
pub mod postgres;

// ---------- dialect ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgresql,
    Mysql,
    /// Wire- and SQL-compatible with MySQL.
    Mariadb,
    Mssql,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [
        Dialect::Postgresql,
        Dialect::Mysql,
        Dialect::Mariadb,
        Dialect::Mssql,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Postgresql => "postgresql",
            Dialect::Mysql => "mysql",
            Dialect::Mariadb => "mariadb",
            Dialect::Mssql => "mssql",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Dialect::Postgresql => "PostgreSQL",
            Dialect::Mysql => "MySQL",
            Dialect::Mariadb => "MariaDB",
            Dialect::Mssql => "SQL Server",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Dialect::Postgresql => 5432,
            Dialect::Mysql | Dialect::Mariadb => 3306,
            Dialect::Mssql => 1433,
        }
    }

    pub fn flavor(self) -> Flavor {
        match self {
            Dialect::Postgresql => Flavor::Postgresql,
            Dialect::Mysql | Dialect::Mariadb => Flavor::Mysql,
            Dialect::Mssql => Flavor::Mssql,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dialect {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(Dialect::Postgresql),
            "mysql" => Ok(Dialect::Mysql),
            "mariadb" | "maria_db" => Ok(Dialect::Mariadb),
            "mssql" | "sqlserver" => Ok(Dialect::Mssql),
            _ => Err(ClientError::UnsupportedDialect(s.to_string())),
        }
    }
}

// ---------- driver trait ----------

/// Per-dialect behaviour. Shared CRUD logic lives in `executor`; a driver
/// only knows how to open a client, classify native column types, and
/// introspect its catalog.
///
/// Introspection queries take the table name as their single bound
/// parameter and alias their columns to the names `schema::introspect`
/// reads (`name`, `data_type`, `udt_name`, `nullable`, `max_length`,
/// `default_value`, `primary_key`; `constraint_name`, `column_name`,
/// `foreign_table_name`, `foreign_column_name`).
pub trait DialectDriver: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn get_client(&self, credentials: Credentials, options: ConnectOptions) -> Arc<dyn SqlClient>;

    /// Classify a native column. Must be total: unknown types map to `Text`.
    fn infer_field_type(&self, column: &NativeColumn) -> FieldType;

    fn tables_query(&self) -> &'static str;

    fn columns_query(&self) -> &'static str;

    fn foreign_keys_query(&self) -> &'static str;
}

static POSTGRES: postgres::PostgresDriver = postgres::PostgresDriver;
static MYSQL: mysql::MysqlDriver = mysql::MysqlDriver::new(Dialect::Mysql);
static MARIADB: mysql::MysqlDriver = mysql::MysqlDriver::new(Dialect::Mariadb);
static MSSQL: mssql::MssqlDriver = mssql::MssqlDriver;

/// Static registry lookup.
pub fn driver(dialect: Dialect) -> &'static dyn DialectDriver {
    match dialect {
        Dialect::Postgresql => &POSTGRES,
        Dialect::Mysql => &MYSQL,
        Dialect::Mariadb => &MARIADB,
        Dialect::Mssql => &MSSQL,
    }
}

/// `id` and `*_id` style names, used to tell identifiers from plain numbers.
pub(crate) fn is_id_like(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "id" || lower.ends_with("_id")
}
