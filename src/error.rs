use sqlx::error::ErrorKind;

/// Failures surfaced by [`crate::store::HatchStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
    #[error("malformed {column} value {value:?}")]
    Decode { column: &'static str, value: String },
    #[error("migration {version} failed: {source}")]
    Migration {
        version: u32,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => Self::Constraint(db.message().to_string()),
                _ => Self::Connection(sqlx::Error::Database(db)),
            },
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                key: String::new(),
            },
            other => Self::Connection(other),
        }
    }
}
