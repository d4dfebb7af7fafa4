use sea_orm::{ConnectionTrait, DbConn, DbErr};
use tracing::{info, instrument};

#[allow(warnings, clippy::all)]
pub(crate) mod url_mapping {
    use sea_orm::entity::prelude::*;

    #[sea_orm::model]
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "url_mappings")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub short_token: String,
        #[sea_orm(column_type = "Text")]
        pub long_url: String,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

// NOTE: short_token is the primary key so the database rejects duplicate tokens
const CREATE_URL_MAPPINGS: &str = "CREATE TABLE IF NOT EXISTS url_mappings (
    short_token VARCHAR(32) NOT NULL PRIMARY KEY,
    long_url TEXT NOT NULL
)";

/// Creates the `url_mappings` table when it does not exist yet.
///
/// # Errors
/// Will return [`Err`] if the statement fails to execute.
#[instrument(skip(db))]
pub async fn ensure_schema(db: &DbConn) -> Result<(), DbErr> {
    db.execute_unprepared(CREATE_URL_MAPPINGS).await?;
    info!("url_mappings table is present");
    Ok(())
}
