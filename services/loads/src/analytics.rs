use crate::cache::{KvStore, TtlCache};
use crate::config::AnalyticsConfig;
use crate::model::{DriverFuelProfile, FuelType, LoadRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Per-gallon fuel prices in USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuelPrices {
    pub diesel: f64,
    pub gasoline: f64,
}

impl FuelPrices {
    pub fn price_for(&self, fuel_type: FuelType) -> f64 {
        match fuel_type {
            FuelType::Diesel => self.diesel,
            FuelType::Gasoline => self.gasoline,
        }
    }

    /// Apply any overrides on top of these prices
    pub fn with_overrides(self, overrides: Option<&PriceOverrides>) -> Self {
        match overrides {
            Some(o) => Self {
                diesel: o.diesel.unwrap_or(self.diesel),
                gasoline: o.gasoline.unwrap_or(self.gasoline),
            },
            None => self,
        }
    }
}

impl Default for FuelPrices {
    fn default() -> Self {
        Self {
            diesel: 4.10,
            gasoline: 3.65,
        }
    }
}

impl From<&AnalyticsConfig> for FuelPrices {
    fn from(config: &AnalyticsConfig) -> Self {
        Self {
            diesel: config.diesel_price_per_gallon,
            gasoline: config.gasoline_price_per_gallon,
        }
    }
}

/// Caller-supplied prices, e.g. from a live fuel feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceOverrides {
    #[serde(default)]
    pub diesel: Option<f64>,
    #[serde(default)]
    pub gasoline: Option<f64>,
}

/// Distance and revenue fields a calculation needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuelAnalyticsInput {
    pub distance_miles: Option<f64>,
    #[serde(rename = "rateTotalUSD")]
    pub rate_total_usd: Option<f64>,
    pub rpm: Option<f64>,
    pub rate: Option<f64>,
}

impl From<&LoadRecord> for FuelAnalyticsInput {
    fn from(load: &LoadRecord) -> Self {
        Self {
            distance_miles: load.distance_miles,
            rate_total_usd: load.rate_total_usd,
            rpm: load.rpm,
            rate: Some(load.rate),
        }
    }
}

/// Where gross revenue came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenueSource {
    TotalRate,
    RatePerMile,
    FlatRate,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResult {
    pub miles: f64,
    pub mpg: f64,
    pub fuel_type: FuelType,
    pub price_per_gallon: f64,
    pub gallons_needed: f64,
    pub fuel_cost: f64,
    pub gross_revenue: f64,
    pub revenue_source: RevenueSource,
    pub net_revenue: f64,
}

/// A usable number: finite and positive
fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn resolve_revenue(input: &FuelAnalyticsInput, miles: f64) -> (f64, RevenueSource) {
    if let Some(total) = usable(input.rate_total_usd) {
        return (total, RevenueSource::TotalRate);
    }
    if let Some(rpm) = usable(input.rpm) {
        return (rpm * miles, RevenueSource::RatePerMile);
    }
    if let Some(rate) = usable(input.rate) {
        return (rate, RevenueSource::FlatRate);
    }
    (0.0, RevenueSource::None)
}

/// Compute fuel economics; `None` when miles or mpg are missing or non-positive.
///
/// Plain `f64` arithmetic with no intermediate rounding.
pub fn compute(
    input: &FuelAnalyticsInput,
    driver: &DriverFuelProfile,
    defaults: FuelPrices,
    overrides: Option<&PriceOverrides>,
) -> Option<AnalyticsResult> {
    let miles = input.distance_miles.filter(|m| m.is_finite()).unwrap_or(0.0);
    let mpg = driver.mpg_rated.filter(|m| m.is_finite()).unwrap_or(0.0);

    if miles <= 0.0 || mpg <= 0.0 {
        return None;
    }

    let fuel_type = FuelType::resolve(driver.fuel_type.as_deref());
    let price_per_gallon = defaults.with_overrides(overrides).price_for(fuel_type);
    let (gross_revenue, revenue_source) = resolve_revenue(input, miles);

    let gallons_needed = miles / mpg;
    let fuel_cost = gallons_needed * price_per_gallon;

    Some(AnalyticsResult {
        miles,
        mpg,
        fuel_type,
        price_per_gallon,
        gallons_needed,
        fuel_cost,
        gross_revenue,
        revenue_source,
        net_revenue: gross_revenue - fuel_cost,
    })
}

/// `compute` memoized through a TTL cache
pub struct AnalyticsService<S> {
    cache: TtlCache<S>,
    prices: FuelPrices,
    ttl_ms: i64,
}

impl<S: KvStore> AnalyticsService<S> {
    pub fn new(cache: TtlCache<S>, config: &AnalyticsConfig) -> Self {
        Self {
            cache,
            prices: FuelPrices::from(config),
            ttl_ms: config.cache_ttl_ms,
        }
    }

    /// Analytics for `load` driven under `driver`, served from cache when fresh
    #[instrument(skip(self, load, driver, overrides), fields(load_id = %load.id))]
    pub async fn analyze(
        &self,
        load: &LoadRecord,
        driver: &DriverFuelProfile,
        overrides: Option<&PriceOverrides>,
    ) -> Option<AnalyticsResult> {
        let prices = self.prices.with_overrides(overrides);
        let input = FuelAnalyticsInput::from(load);
        let key = cache_key(&load.id, &input, driver, prices);

        let cached = self.cache.get::<Option<AnalyticsResult>>(&key).await;
        if let Some(result) = cached.data {
            debug!(key = %key, "Analytics cache hit");
            return result;
        }

        let result = compute(&input, driver, prices, None);
        self.cache.set(&key, &result, self.ttl_ms).await;
        result
    }

    /// Drop a memoized result
    pub async fn invalidate(&self, load: &LoadRecord, driver: &DriverFuelProfile, overrides: Option<&PriceOverrides>) {
        let prices = self.prices.with_overrides(overrides);
        let key = cache_key(&load.id, &FuelAnalyticsInput::from(load), driver, prices);
        self.cache.clear(&key).await;
    }

    pub fn default_prices(&self) -> FuelPrices {
        self.prices
    }
}

/// Every value the result depends on is part of the key
fn cache_key(load_id: &str, input: &FuelAnalyticsInput, driver: &DriverFuelProfile, prices: FuelPrices) -> String {
    fn part(v: Option<f64>) -> String {
        v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string())
    }

    format!(
        "analytics:{load_id}:{}:{}:{}:{}:{}:{}:{}:{}",
        part(input.distance_miles),
        part(input.rate_total_usd),
        part(input.rpm),
        part(input.rate),
        part(driver.mpg_rated),
        FuelType::resolve(driver.fuel_type.as_deref()).as_str(),
        prices.diesel,
        prices.gasoline,
    )
}
