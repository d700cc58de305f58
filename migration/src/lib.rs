pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_spot_price_history;
mod m20261001_000002_create_survival_cases;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_spot_price_history::Migration),
            Box::new(m20261001_000002_create_survival_cases::Migration),
        ]
    }
}
