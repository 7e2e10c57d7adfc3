pub use sea_orm_migration::prelude::*;

mod m20260104_000001_create_portal_tables;
mod m20260104_000002_add_discussion_polls;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260104_000001_create_portal_tables::Migration),
            Box::new(m20260104_000002_add_discussion_polls::Migration),
        ]
    }
}
