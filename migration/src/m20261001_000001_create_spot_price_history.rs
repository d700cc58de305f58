use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SpotPriceHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SpotPriceHistory::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SpotPriceHistory::Region).string().not_null())
                    .col(ColumnDef::new(SpotPriceHistory::Zone).string().not_null())
                    .col(ColumnDef::new(SpotPriceHistory::Instance).string().not_null())
                    .col(
                        ColumnDef::new(SpotPriceHistory::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SpotPriceHistory::Price)
                            .decimal_len(20, 8)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SpotPriceHistory::TimeEpochMs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SpotPriceHistory::ExecutionTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One price per series per instant; ingestion relies on ON CONFLICT DO NOTHING
        manager
            .create_index(
                Index::create()
                    .name("idx_spot_price_history_unique")
                    .table(SpotPriceHistory::Table)
                    .col(SpotPriceHistory::Region)
                    .col(SpotPriceHistory::Zone)
                    .col(SpotPriceHistory::Instance)
                    .col(SpotPriceHistory::Timestamp)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Resume lookups: MAX(timestamp) per series
        manager
            .create_index(
                Index::create()
                    .name("idx_spot_price_history_series_latest")
                    .table(SpotPriceHistory::Table)
                    .col(SpotPriceHistory::Region)
                    .col(SpotPriceHistory::Zone)
                    .col(SpotPriceHistory::Instance)
                    .col((SpotPriceHistory::Timestamp, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SpotPriceHistory::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SpotPriceHistory {
    Table,
    Id,
    Region,
    Zone,
    Instance,
    Timestamp,
    Price,
    TimeEpochMs,
    ExecutionTime,
}
