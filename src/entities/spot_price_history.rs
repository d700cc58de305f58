//! `SeaORM` Entity for the spot_price_history table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "spot_price_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub region: String,
    pub zone: String,
    /// Instance type, e.g. m4.large
    pub instance: String,
    pub timestamp: DateTimeWithTimeZone,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub price: Decimal,
    /// Same instant as `timestamp`, in epoch milliseconds
    pub time_epoch_ms: i64,
    /// Start of the ingestion process that stored the row
    pub execution_time: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
