use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityName, EntityTrait,
    Schema,
};
use tracing::{debug, info};

use entities::{
    alert, alert_notification, monitor, monitor_check, notification_channel, webhook_delivery,
};

pub mod entities;
pub mod enums;
pub mod services;

/// Opens the connection pool. Postgres in production, `sqlite::memory:` in tests
/// (which needs `max_connections == 1`, every pooled connection being its own database).
pub async fn connect(database_url: &str, max_connections: u32) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url.to_owned());
    opt.max_connections(max_connections).sqlx_logging(false);
    Database::connect(opt).await
}

/// Creates every table (and its declared indexes) that does not exist yet.
///
/// Referenced tables are created before the tables pointing at them.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    create_table(db, monitor::Entity).await?;
    create_table(db, monitor_check::Entity).await?;
    create_table(db, webhook_delivery::Entity).await?;
    create_table(db, alert::Entity).await?;
    create_table(db, notification_channel::Entity).await?;
    create_table(db, alert_notification::Entity).await?;
    info!("Database schema is up to date.");
    Ok(())
}

async fn create_table<E>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    db.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }
    debug!(table = %entity.table_name(), "Ensured table.");
    Ok(())
}
