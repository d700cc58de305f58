use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SurvivalCases::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SurvivalCases::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SurvivalCases::Region).string().not_null())
                    .col(ColumnDef::new(SurvivalCases::Zone).string().not_null())
                    .col(ColumnDef::new(SurvivalCases::Instance).string().not_null())
                    .col(ColumnDef::new(SurvivalCases::DayOfWeek).small_integer().not_null())
                    .col(ColumnDef::new(SurvivalCases::HourOfDay).small_integer().not_null())
                    .col(ColumnDef::new(SurvivalCases::Censored).boolean().not_null())
                    // Epoch milliseconds, same encoding as the exchange files
                    .col(ColumnDef::new(SurvivalCases::InitTime).big_integer().not_null())
                    .col(ColumnDef::new(SurvivalCases::EndTime).big_integer().not_null())
                    .col(
                        ColumnDef::new(SurvivalCases::TimeToRevocation)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SurvivalCases::SkipRecords).big_integer().not_null())
                    .col(
                        ColumnDef::new(SurvivalCases::InitValue)
                            .decimal_len(20, 8)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SurvivalCases::EndValue)
                            .decimal_len(20, 8)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SurvivalCases::Multiplier)
                            .decimal_len(10, 4)
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Survival lookups by instance/day/hour, ordered by time to revocation
        manager
            .create_index(
                Index::create()
                    .name("idx_survival_cases_lookup")
                    .table(SurvivalCases::Table)
                    .col(SurvivalCases::Instance)
                    .col(SurvivalCases::DayOfWeek)
                    .col(SurvivalCases::HourOfDay)
                    .col(SurvivalCases::TimeToRevocation)
                    .to_owned(),
            )
            .await?;

        // Regeneration clears one series at a time
        manager
            .create_index(
                Index::create()
                    .name("idx_survival_cases_series")
                    .table(SurvivalCases::Table)
                    .col(SurvivalCases::Region)
                    .col(SurvivalCases::Zone)
                    .col(SurvivalCases::Instance)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SurvivalCases::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SurvivalCases {
    Table,
    Id,
    Region,
    Zone,
    Instance,
    DayOfWeek,
    HourOfDay,
    Censored,
    InitTime,
    EndTime,
    TimeToRevocation,
    SkipRecords,
    InitValue,
    EndValue,
    Multiplier,
}
