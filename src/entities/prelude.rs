pub use super::spot_price_history::Entity as SpotPriceHistory;
pub use super::survival_cases::Entity as SurvivalCases;
