//! `SeaORM` Entity for the survival_cases table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "survival_cases")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub region: String,
    pub zone: String,
    pub instance: String,
    /// 1 = Sunday ... 7 = Saturday
    pub day_of_week: i16,
    pub hour_of_day: i16,
    pub censored: bool,
    /// Epoch milliseconds
    pub init_time: i64,
    /// Epoch milliseconds
    pub end_time: i64,
    /// Minutes
    pub time_to_revocation: i64,
    pub skip_records: i64,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub init_value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub end_value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 4)))")]
    pub multiplier: Decimal,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
