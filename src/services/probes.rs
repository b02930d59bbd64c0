//! Built-in read-only store probes.

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};

use super::RegisteredService;
use crate::config::is_valid_table_name;
use crate::error::ManagerError;

/// `SELECT 1` against the record store
#[derive(Debug, Clone)]
pub struct DatabaseProbe {
    db: DatabaseConnection,
}

impl DatabaseProbe {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RegisteredService for DatabaseProbe {
    async fn probe(&self) -> Result<(), ManagerError> {
        let stmt = Statement::from_string(self.db.get_database_backend(), "SELECT 1".to_string());
        self.db.query_one(stmt).await?;
        Ok(())
    }
}

/// Fetches at most one row from a table, the cheapest read that proves the
/// table exists and is readable.
#[derive(Debug, Clone)]
pub struct TableProbe {
    db: DatabaseConnection,
    table: String,
}

impl TableProbe {
    /// The table name is interpolated into SQL, so only plain identifiers are
    /// accepted.
    pub fn new(db: DatabaseConnection, table: &str) -> Result<Self, ManagerError> {
        if !is_valid_table_name(table) {
            return Err(ManagerError::invalid_input(format!(
                "invalid table name '{}'",
                table
            )));
        }
        Ok(Self {
            db,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl RegisteredService for TableProbe {
    async fn probe(&self) -> Result<(), ManagerError> {
        let sql = format!("SELECT 1 FROM {} LIMIT 1", self.table);
        let stmt = Statement::from_string(self.db.get_database_backend(), sql);
        self.db.query_one(stmt).await?;
        Ok(())
    }
}
