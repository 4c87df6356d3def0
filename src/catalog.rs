//! Vehicle catalog: ingress validation and the filtered, sorted, paginated
//! search over vehicle records.
//!
//! Search is pure. The engine snapshots vehicles and hands them to
//! [`search`]; nothing here touches locks or the WAL.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// A search parameter whose value could not be interpreted.
    InvalidParameter { name: &'static str, value: String },
    MissingField(&'static str),
    OutOfRange(&'static str),
    InvalidValue(String),
    TooLong(&'static str),
    TooMany(&'static str),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::InvalidParameter { name, value } => {
                write!(f, "invalid value for {name}: {value:?}")
            }
            CatalogError::MissingField(name) => write!(f, "{name} is required"),
            CatalogError::OutOfRange(msg) => write!(f, "{msg}"),
            CatalogError::InvalidValue(msg) => write!(f, "{msg}"),
            CatalogError::TooLong(name) => write!(f, "{name} too long"),
            CatalogError::TooMany(name) => write!(f, "too many {name}"),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<UnknownVariant> for CatalogError {
    fn from(e: UnknownVariant) -> Self {
        CatalogError::InvalidValue(e.to_string())
    }
}

// ── Search parameters ────────────────────────────────────────────

/// Raw search parameters under their external names. Every value arrives
/// as text and is interpreted by [`SearchParams::into_query`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub q: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub category: Option<String>,
    pub transmission: Option<String>,
    pub fuel: Option<String>,
    pub status: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub min_year: Option<String>,
    pub max_year: Option<String>,
    pub min_mileage: Option<String>,
    pub max_mileage: Option<String>,
    pub seats: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort: Option<String>,
}

pub const SEARCH_PARAM_NAMES: &[&str] = &[
    "q",
    "brand",
    "model",
    "category",
    "transmission",
    "fuel",
    "status",
    "minPrice",
    "maxPrice",
    "minYear",
    "maxYear",
    "minMileage",
    "maxMileage",
    "seats",
    "page",
    "limit",
    "sort",
];

/// Treat blank as absent, like an empty query string value.
fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_param<T: FromStr>(name: &'static str, v: &Option<String>) -> Result<Option<T>, CatalogError> {
    match present(v) {
        None => Ok(None),
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|_| CatalogError::InvalidParameter {
                name,
                value: s.to_string(),
            }),
    }
}

fn parse_enum<T: FromStr<Err = UnknownVariant>>(
    name: &'static str,
    v: &Option<String>,
) -> Result<Option<T>, CatalogError> {
    match present(v) {
        None => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(|_| CatalogError::InvalidParameter {
            name,
            value: s.to_string(),
        }),
    }
}

impl SearchParams {
    /// Build from `(external name, value)` pairs. Later pairs win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = serde_json::Map::new();
        for (k, v) in pairs {
            let k = k.into();
            if !SEARCH_PARAM_NAMES.contains(&k.as_str()) {
                return Err(CatalogError::InvalidValue(format!(
                    "unknown search parameter: {k}"
                )));
            }
            map.insert(k, serde_json::Value::String(v.into()));
        }
        serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| CatalogError::InvalidValue(e.to_string()))
    }

    pub fn into_query(self) -> Result<VehicleQuery, CatalogError> {
        let q_tokens = present(&self.q)
            .map(|q| q.split_whitespace().map(str::to_lowercase).collect())
            .unwrap_or_default();

        let filter = VehicleFilter {
            q_tokens,
            brand: present(&self.brand).map(str::to_lowercase),
            model: present(&self.model).map(str::to_lowercase),
            category: parse_enum("category", &self.category)?,
            transmission: parse_enum("transmission", &self.transmission)?,
            fuel: parse_enum("fuel", &self.fuel)?,
            status: parse_enum("status", &self.status)?,
            min_price: parse_param("minPrice", &self.min_price)?,
            max_price: parse_param("maxPrice", &self.max_price)?,
            min_year: parse_param("minYear", &self.min_year)?,
            max_year: parse_param("maxYear", &self.max_year)?,
            min_mileage: parse_param("minMileage", &self.min_mileage)?,
            max_mileage: parse_param("maxMileage", &self.max_mileage)?,
            min_seats: parse_param("seats", &self.seats)?,
        };

        // Unparseable paging falls back to the defaults, like a missing value.
        let page = present(&self.page).and_then(|s| s.parse::<i64>().ok()).unwrap_or(1);
        let limit = present(&self.limit)
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(DEFAULT_PAGE_LIMIT as i64);

        Ok(VehicleQuery {
            filter,
            sort: present(&self.sort).map(SortKey::parse_or_default).unwrap_or_default(),
            page: if page < 1 { 1 } else { page as usize },
            limit: if limit < 1 { DEFAULT_PAGE_LIMIT } else { limit as usize },
        })
    }
}

// ── Typed criteria ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Year,
}

impl SortKey {
    /// Unknown keys sort newest first.
    pub fn parse_or_default(s: &str) -> SortKey {
        match s.trim().to_lowercase().as_str() {
            "price_asc" => SortKey::PriceAsc,
            "price_desc" => SortKey::PriceDesc,
            "year" => SortKey::Year,
            _ => SortKey::Newest,
        }
    }

    fn compare(&self, a: &Vehicle, b: &Vehicle) -> Ordering {
        let primary = match self {
            SortKey::Newest => b.created_at.cmp(&a.created_at),
            SortKey::PriceAsc => a.daily_price.cmp(&b.daily_price),
            SortKey::PriceDesc => b.daily_price.cmp(&a.daily_price),
            SortKey::Year => b.year.cmp(&a.year),
        };
        // ULIDs grow with time, so this keeps ties newest first.
        primary.then_with(|| b.id.cmp(&a.id))
    }
}

/// All filters are optional and combine with AND. Text fields are stored
/// lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleFilter {
    pub q_tokens: Vec<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub category: Option<Category>,
    pub transmission: Option<Transmission>,
    pub fuel: Option<Fuel>,
    pub status: Option<VehicleStatus>,
    pub min_price: Option<Money>,
    pub max_price: Option<Money>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    pub min_mileage: Option<u32>,
    pub max_mileage: Option<u32>,
    pub min_seats: Option<u32>,
}

/// One independent test against a vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Every token must start the name or start a word inside it.
    TokenPrefix(Vec<String>),
    BrandEquals(String),
    ModelContains(String),
    Category(Category),
    Transmission(Transmission),
    Fuel(Fuel),
    Status(VehicleStatus),
    PriceAtLeast(Money),
    PriceAtMost(Money),
    YearAtLeast(i32),
    YearAtMost(i32),
    MileageAtLeast(u32),
    MileageAtMost(u32),
    SeatsAtLeast(u32),
}

/// `term` starts `haystack` or starts a word in it.
pub fn token_prefix_match(haystack: &str, term: &str) -> bool {
    haystack.starts_with(term) || haystack.contains(&format!(" {term}"))
}

impl Predicate {
    pub fn matches(&self, v: &Vehicle) -> bool {
        match self {
            Predicate::TokenPrefix(tokens) => {
                let name = v.display_name();
                tokens.iter().all(|t| token_prefix_match(&name, t))
            }
            Predicate::BrandEquals(brand) => v.brand.to_lowercase() == *brand,
            Predicate::ModelContains(model) => v.model.to_lowercase().contains(model.as_str()),
            Predicate::Category(c) => v.category == *c,
            Predicate::Transmission(t) => v.transmission == *t,
            Predicate::Fuel(f) => v.fuel == *f,
            Predicate::Status(s) => v.status == *s,
            Predicate::PriceAtLeast(p) => v.daily_price >= *p,
            Predicate::PriceAtMost(p) => v.daily_price <= *p,
            Predicate::YearAtLeast(y) => v.year >= *y,
            Predicate::YearAtMost(y) => v.year <= *y,
            Predicate::MileageAtLeast(m) => v.mileage >= *m,
            Predicate::MileageAtMost(m) => v.mileage <= *m,
            Predicate::SeatsAtLeast(s) => v.seats >= *s,
        }
    }
}

impl VehicleFilter {
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut out = Vec::new();
        if !self.q_tokens.is_empty() {
            out.push(Predicate::TokenPrefix(self.q_tokens.clone()));
        }
        if let Some(b) = &self.brand {
            out.push(Predicate::BrandEquals(b.clone()));
        }
        if let Some(m) = &self.model {
            out.push(Predicate::ModelContains(m.clone()));
        }
        out.extend(self.category.map(Predicate::Category));
        out.extend(self.transmission.map(Predicate::Transmission));
        out.extend(self.fuel.map(Predicate::Fuel));
        out.extend(self.status.map(Predicate::Status));
        out.extend(self.min_price.map(Predicate::PriceAtLeast));
        out.extend(self.max_price.map(Predicate::PriceAtMost));
        out.extend(self.min_year.map(Predicate::YearAtLeast));
        out.extend(self.max_year.map(Predicate::YearAtMost));
        out.extend(self.min_mileage.map(Predicate::MileageAtLeast));
        out.extend(self.max_mileage.map(Predicate::MileageAtMost));
        out.extend(self.min_seats.map(Predicate::SeatsAtLeast));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleQuery {
    pub filter: VehicleFilter,
    pub sort: SortKey,
    /// 1-indexed.
    pub page: usize,
    pub limit: usize,
}

impl Default for VehicleQuery {
    fn default() -> Self {
        Self {
            filter: VehicleFilter::default(),
            sort: SortKey::Newest,
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl VehicleQuery {
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub items: Vec<Vehicle>,
    /// Matches before pagination.
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

pub fn search(vehicles: Vec<Vehicle>, query: &VehicleQuery) -> SearchResult {
    let predicates = query.filter.predicates();
    let mut matched: Vec<Vehicle> = vehicles
        .into_iter()
        .filter(|v| predicates.iter().all(|p| p.matches(v)))
        .collect();
    let total = matched.len();
    matched.sort_by(|a, b| query.sort.compare(a, b));
    let items = matched
        .into_iter()
        .skip(query.offset())
        .take(query.limit)
        .collect();
    SearchResult {
        items,
        total,
        page: query.page,
        limit: query.limit,
    }
}

// ── Admin ingress ────────────────────────────────────────────────

/// Vehicle fields as an administrator submits them. Enum fields are free
/// text until validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleInput {
    pub id: Ulid,
    pub brand: String,
    pub model: String,
    pub year: i64,
    pub category: String,
    pub transmission: String,
    pub fuel: String,
    pub seats: i64,
    pub daily_price: Money,
    pub status: Option<String>,
    pub mileage: i64,
    pub description: String,
    pub images: Vec<String>,
}

fn required(name: &'static str, value: &str) -> Result<String, CatalogError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::MissingField(name));
    }
    if trimmed.len() > MAX_SHORT_TEXT_LEN {
        return Err(CatalogError::TooLong(name));
    }
    Ok(trimmed.to_string())
}

fn required_enum<T: FromStr<Err = UnknownVariant>>(
    name: &'static str,
    value: &str,
) -> Result<T, CatalogError> {
    if value.trim().is_empty() {
        return Err(CatalogError::MissingField(name));
    }
    Ok(value.parse::<T>()?)
}

impl VehicleInput {
    pub fn into_vehicle(self, created_at: Ms) -> Result<Vehicle, CatalogError> {
        let brand = required("brand", &self.brand)?;
        let model = required("model", &self.model)?;
        let category = required_enum::<Category>("category", &self.category)?;
        let transmission = required_enum::<Transmission>("transmission", &self.transmission)?;
        let fuel = required_enum::<Fuel>("fuel", &self.fuel)?;

        let year = i32::try_from(self.year)
            .ok()
            .filter(|y| *y >= MIN_VEHICLE_YEAR)
            .ok_or(CatalogError::OutOfRange("year must be 1900 or later"))?;
        let seats = u32::try_from(self.seats)
            .ok()
            .filter(|s| *s >= 1)
            .ok_or(CatalogError::OutOfRange("seats must be at least 1"))?;
        if self.daily_price <= Money::ZERO {
            return Err(CatalogError::OutOfRange("daily price must be positive"));
        }
        let mileage = u32::try_from(self.mileage)
            .map_err(|_| CatalogError::OutOfRange("mileage must be zero or more"))?;
        let status = match present(&self.status) {
            None => VehicleStatus::Available,
            Some(s) => s.parse::<VehicleStatus>()?,
        };

        if self.description.len() > MAX_LONG_TEXT_LEN {
            return Err(CatalogError::TooLong("description"));
        }
        if self.images.len() > MAX_IMAGES_PER_VEHICLE {
            return Err(CatalogError::TooMany("images"));
        }
        if self.images.iter().any(|i| i.len() > MAX_LONG_TEXT_LEN) {
            return Err(CatalogError::TooLong("image reference"));
        }

        Ok(Vehicle {
            id: self.id,
            brand,
            model,
            year,
            category,
            transmission,
            fuel,
            seats,
            daily_price: self.daily_price,
            status,
            mileage,
            description: self.description,
            images: self.images,
            created_at,
        })
    }
}
